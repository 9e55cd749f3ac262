//! Link Manager
//!
//! Owns the scan → connect → discover → subscribe state machine for the one
//! companion device. All transitions happen on a single task; everything
//! else talks to it through a cloneable [`LinkHandle`].

use crate::domain::models::{DeviceHandle, LinkEvent, LinkState, ScannedDevice};
use crate::infrastructure::bluetooth::backend::{
    BackendError, Central, CharacteristicInfo, Peripheral, PeripheralEvent,
};
use crate::infrastructure::bluetooth::protocol::LinkConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("no companion device found within {0:?}")]
    ScanTimeout(Duration),
    #[error("scan could not start: {0}")]
    Scan(BackendError),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("service discovery failed: {0}")]
    Discovery(String),
    #[error("characteristic {0} is missing or lacks the required property")]
    MissingCharacteristic(Uuid),
    #[error("notification subscription failed: {0}")]
    Subscribe(String),
    #[error("cancelled by disconnect")]
    Cancelled,
    #[error("not connected")]
    NotConnected,
    #[error("write failed: {0}")]
    Write(BackendError),
    #[error("link manager has stopped")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Connected(DeviceHandle),
    /// A sweep or connection attempt was already running; nothing was started.
    AlreadyInProgress,
    AlreadyConnected(DeviceHandle),
}

enum Command {
    StartScan(oneshot::Sender<Result<ScanOutcome, LinkError>>),
    Disconnect(oneshot::Sender<()>),
    Write {
        payload: Vec<u8>,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
}

/// Client side of the link manager.
#[derive(Clone)]
pub struct LinkHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<LinkState>,
}

impl LinkHandle {
    /// Scan for the companion device and bring the link up. Resolves once
    /// the link is subscribed or the attempt failed.
    pub async fn start_scan(&self) -> Result<ScanOutcome, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::StartScan(reply))
            .map_err(|_| LinkError::Closed)?;
        rx.await.map_err(|_| LinkError::Closed)?
    }

    pub async fn disconnect(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect(reply)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Write to the device's write characteristic. Fails immediately with
    /// [`LinkError::NotConnected`] unless the link is subscribed.
    pub async fn write(&self, payload: Vec<u8>) -> Result<(), LinkError> {
        if self.state() != LinkState::Subscribed {
            return Err(LinkError::NotConnected);
        }
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Write { payload, reply })
            .map_err(|_| LinkError::NotConnected)?;
        rx.await.map_err(|_| LinkError::NotConnected)?
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }
}

struct ActiveLink {
    device: DeviceHandle,
    peripheral: Box<dyn Peripheral>,
}

pub struct LinkManager {
    central: Arc<dyn Central>,
    config: LinkConfig,
    events: mpsc::UnboundedSender<LinkEvent>,
    state: watch::Sender<LinkState>,
    commands: mpsc::UnboundedReceiver<Command>,

    // Scanning
    scan_found: Option<mpsc::UnboundedReceiver<ScannedDevice>>,
    scan_deadline: Option<Instant>,
    scan_reply: Option<oneshot::Sender<Result<ScanOutcome, LinkError>>>,

    // Connected
    link: Option<ActiveLink>,
    link_events: Option<mpsc::UnboundedReceiver<PeripheralEvent>>,
}

impl LinkManager {
    /// Start the manager task. Notifications, state changes and link loss
    /// are published on `events`.
    pub fn spawn(
        central: Arc<dyn Central>,
        config: LinkConfig,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> (LinkHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Idle);

        let manager = Self {
            central,
            config,
            events,
            state: state_tx,
            commands: command_rx,
            scan_found: None,
            scan_deadline: None,
            scan_reply: None,
            link: None,
            link_events: None,
        };
        let task = tokio::spawn(manager.run());

        (
            LinkHandle {
                commands: command_tx,
                state: state_rx,
            },
            task,
        )
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                found = next_event(&mut self.scan_found) => match found {
                    Some(device) => self.on_advertisement(device).await,
                    None => self.scan_found = None,
                },
                _ = wait_deadline(self.scan_deadline) => self.on_scan_timeout().await,
                event = next_event(&mut self.link_events) => match event {
                    Some(event) => self.on_peripheral_event(event).await,
                    None => self.link_events = None,
                },
            }
        }

        debug!("Link manager shutting down");
        self.cancel_scan().await;
        self.release_link(true).await;
    }

    fn current(&self) -> LinkState {
        *self.state.borrow()
    }

    fn set_state(&self, next: LinkState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("Link state {:?} -> {:?}", previous, next);
            let _ = self.events.send(LinkEvent::State(next));
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartScan(reply) => match self.current() {
                LinkState::Idle => self.begin_scan(reply).await,
                LinkState::Subscribed => {
                    let outcome = match &self.link {
                        Some(link) => Ok(ScanOutcome::AlreadyConnected(link.device.clone())),
                        None => Ok(ScanOutcome::AlreadyInProgress),
                    };
                    let _ = reply.send(outcome);
                }
                state => {
                    debug!("start_scan ignored in state {:?}", state);
                    let _ = reply.send(Ok(ScanOutcome::AlreadyInProgress));
                }
            },
            Command::Disconnect(reply) => {
                self.cancel_scan().await;
                self.release_link(true).await;
                let _ = reply.send(());
            }
            Command::Write { payload, reply } => {
                let result = self.write(&payload).await;
                let _ = reply.send(result);
            }
        }
    }

    async fn begin_scan(&mut self, reply: oneshot::Sender<Result<ScanOutcome, LinkError>>) {
        info!(
            "Scanning for {:?} (up to {:?})",
            self.config.device_name, self.config.scan_timeout
        );

        let (found_tx, found_rx) = mpsc::unbounded_channel();
        if let Err(e) = self.central.start_scan(found_tx).await {
            error!("Failed to start scan: {}", e);
            let _ = reply.send(Err(LinkError::Scan(e)));
            return;
        }

        self.scan_found = Some(found_rx);
        self.scan_deadline = Some(Instant::now() + self.config.scan_timeout);
        self.scan_reply = Some(reply);
        self.set_state(LinkState::Scanning);
    }

    async fn stop_scanning(&mut self) -> Option<oneshot::Sender<Result<ScanOutcome, LinkError>>> {
        self.scan_found = None;
        self.scan_deadline = None;
        if let Err(e) = self.central.stop_scan().await {
            warn!("Failed to stop scan: {}", e);
        }
        self.scan_reply.take()
    }

    async fn cancel_scan(&mut self) {
        if self.current() != LinkState::Scanning {
            return;
        }
        info!("Scan cancelled");
        if let Some(reply) = self.stop_scanning().await {
            let _ = reply.send(Err(LinkError::Cancelled));
        }
        self.set_state(LinkState::Idle);
    }

    async fn on_scan_timeout(&mut self) {
        info!("Scan timed out");
        let reply = self.stop_scanning().await;
        self.set_state(LinkState::Idle);
        if let Some(reply) = reply {
            let _ = reply.send(Err(LinkError::ScanTimeout(self.config.scan_timeout)));
        }
    }

    async fn on_advertisement(&mut self, device: ScannedDevice) {
        if self.current() != LinkState::Scanning {
            return;
        }
        if device.name != self.config.device_name {
            trace!("Skipping advertisement from {:?} ({})", device.name, device.id);
            return;
        }

        info!(
            "Found {} at {} (RSSI {} dBm)",
            device.name, device.id, device.signal_strength
        );
        let reply = self.stop_scanning().await;
        let handle = DeviceHandle {
            id: device.id,
            name: device.name,
        };

        let result = self.establish(handle).await;
        if let Some(reply) = reply {
            let _ = reply.send(result.map(ScanOutcome::Connected));
        }
    }

    async fn establish(&mut self, handle: DeviceHandle) -> Result<DeviceHandle, LinkError> {
        self.set_state(LinkState::Connecting);
        info!("Connecting to {}...", handle.id);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connect = timeout(
            self.config.connect_timeout,
            self.central.connect(&handle, events_tx),
        );
        let peripheral = match interruptible(&mut self.commands, connect).await {
            Ok(Ok(Ok(peripheral))) => peripheral,
            Ok(Ok(Err(e))) => return self.fail(LinkError::Connect(e.to_string())),
            Ok(Err(_)) => {
                return self.fail(LinkError::Connect(format!(
                    "timed out after {:?}",
                    self.config.connect_timeout
                )))
            }
            Err(interrupted) => return self.abandon(None, interrupted).await,
        };

        self.set_state(LinkState::Discovering);
        let discovery = discover_and_subscribe(&self.config, peripheral.as_ref());
        match interruptible(&mut self.commands, discovery).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                close_half_open(peripheral.as_ref()).await;
                return self.fail(e);
            }
            Err(interrupted) => return self.abandon(Some(peripheral), interrupted).await,
        }

        self.link = Some(ActiveLink {
            device: handle.clone(),
            peripheral,
        });
        self.link_events = Some(events_rx);
        self.set_state(LinkState::Subscribed);
        info!("Companion device {} ready", handle.name);
        Ok(handle)
    }

    /// A disconnect (or shutdown) arrived while the link was coming up.
    async fn abandon(
        &mut self,
        peripheral: Option<Box<dyn Peripheral>>,
        interrupted: Interrupted,
    ) -> Result<DeviceHandle, LinkError> {
        info!("Connection attempt abandoned");
        if let Some(peripheral) = peripheral {
            close_half_open(peripheral.as_ref()).await;
        }
        self.set_state(LinkState::Idle);
        if let Interrupted::Disconnect(reply) = interrupted {
            let _ = reply.send(());
        }
        Err(LinkError::Cancelled)
    }

    /// Peripheral events keep flowing while the write is outstanding, so a
    /// link drop fails the write instead of waiting for the platform.
    async fn write(&mut self, payload: &[u8]) -> Result<(), LinkError> {
        if self.current() != LinkState::Subscribed {
            return Err(LinkError::NotConnected);
        }

        let completed = {
            let Some(link) = &self.link else {
                return Err(LinkError::NotConnected);
            };
            let write =
                link.peripheral
                    .write(self.config.service_uuid, self.config.write_char_uuid, payload);
            tokio::pin!(write);
            loop {
                tokio::select! {
                    result = &mut write => break Some(result),
                    event = next_event(&mut self.link_events) => match event {
                        Some(PeripheralEvent::Notification { characteristic, value }) => {
                            forward_notification(&self.config, &self.events, characteristic, value)
                        }
                        Some(PeripheralEvent::Disconnected) => break None,
                        None => self.link_events = None,
                    },
                }
            }
        };

        match completed {
            Some(result) => result.map_err(LinkError::Write),
            None => {
                warn!("Companion device dropped the link during a write");
                self.release_link(false).await;
                Err(LinkError::NotConnected)
            }
        }
    }

    fn fail(&self, error: LinkError) -> Result<DeviceHandle, LinkError> {
        warn!("Link setup failed: {}", error);
        self.set_state(LinkState::Idle);
        Err(error)
    }

    async fn on_peripheral_event(&mut self, event: PeripheralEvent) {
        match event {
            PeripheralEvent::Notification {
                characteristic,
                value,
            } => forward_notification(&self.config, &self.events, characteristic, value),
            PeripheralEvent::Disconnected => {
                warn!("Companion device dropped the link");
                self.release_link(false).await;
            }
        }
    }

    /// Tear down the active link, if any, and tell consumers it is gone.
    async fn release_link(&mut self, requested: bool) {
        let Some(link) = self.link.take() else {
            return;
        };
        self.link_events = None;
        self.set_state(LinkState::Disconnecting);

        if let Err(e) = link.peripheral.disconnect().await {
            // After an unsolicited drop the platform may already have closed it.
            if requested {
                warn!("Disconnect failed: {}", e);
            } else {
                debug!("Closing dropped link: {}", e);
            }
        }

        info!("Disconnected from {}", link.device.name);
        self.set_state(LinkState::Idle);
        let _ = self.events.send(LinkEvent::Disconnected);
    }
}

enum Interrupted {
    Disconnect(oneshot::Sender<()>),
    Closed,
}

/// Drive `operation` while still answering commands. A scan or write request
/// gets the answer for a link that is not up yet; a disconnect or a closed
/// command channel abandons the operation.
async fn interruptible<F: Future>(
    commands: &mut mpsc::UnboundedReceiver<Command>,
    operation: F,
) -> Result<F::Output, Interrupted> {
    tokio::pin!(operation);
    loop {
        tokio::select! {
            output = &mut operation => return Ok(output),
            command = commands.recv() => match command {
                Some(Command::Disconnect(reply)) => return Err(Interrupted::Disconnect(reply)),
                Some(Command::StartScan(reply)) => {
                    let _ = reply.send(Ok(ScanOutcome::AlreadyInProgress));
                }
                Some(Command::Write { reply, .. }) => {
                    let _ = reply.send(Err(LinkError::NotConnected));
                }
                None => return Err(Interrupted::Closed),
            },
        }
    }
}

async fn discover_and_subscribe(
    config: &LinkConfig,
    peripheral: &dyn Peripheral,
) -> Result<(), LinkError> {
    let service = config.service_uuid;
    let characteristics =
        match timeout(config.connect_timeout, peripheral.characteristics(service)).await {
            Ok(Ok(characteristics)) => characteristics,
            Ok(Err(e)) => return Err(LinkError::Discovery(e.to_string())),
            Err(_) => return Err(LinkError::Discovery("timed out".to_string())),
        };
    debug!("Found {} characteristics", characteristics.len());

    let find = |uuid: Uuid| characteristics.iter().find(|c: &&CharacteristicInfo| c.uuid == uuid);
    let write_uuid = config.write_char_uuid;
    let notify_uuid = config.notify_char_uuid;
    if !find(write_uuid).is_some_and(|c| c.can_write) {
        return Err(LinkError::MissingCharacteristic(write_uuid));
    }
    if !find(notify_uuid).is_some_and(|c| c.can_notify) {
        return Err(LinkError::MissingCharacteristic(notify_uuid));
    }

    match timeout(config.connect_timeout, peripheral.subscribe(service, notify_uuid)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(LinkError::Subscribe(e.to_string())),
        Err(_) => Err(LinkError::Subscribe("timed out".to_string())),
    }
}

async fn close_half_open(peripheral: &dyn Peripheral) {
    if let Err(e) = peripheral.disconnect().await {
        warn!("Failed to close half-open link: {}", e);
    }
}

fn forward_notification(
    config: &LinkConfig,
    events: &mpsc::UnboundedSender<LinkEvent>,
    characteristic: Uuid,
    value: Vec<u8>,
) {
    if characteristic != config.notify_char_uuid {
        trace!("Notification from unexpected characteristic {}", characteristic);
        return;
    }
    let _ = events.send(LinkEvent::Notification {
        value,
        received_at: Instant::now().into_std(),
    });
}

async fn next_event<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
