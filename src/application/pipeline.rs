//! Pipeline service
//!
//! Wires the link manager, trigger channel and orchestrator together:
//!
//! ```text
//! LinkManager ──LinkEvent──▶ pump ──TriggerSender──▶ [slot] ──▶ worker ──▶ Orchestrator
//!      ▲                                                                     │
//!      └──────────────────────────── LinkHandle::write ◀── CommandSender ◀───┘
//! ```
//!
//! The worker runs one orchestration at a time; triggers that arrive while
//! it is busy collapse into a single follow-up run.

use crate::application::orchestrator::{Orchestrator, OrchestratorConfig, RunReport};
use crate::application::sender::CommandSender;
use crate::domain::models::{LinkEvent, LinkState};
use crate::domain::ports::{Announcer, Camera, Recognizer};
use crate::domain::settings::Settings;
use crate::domain::trigger::{self, Delivery, TriggerFilter, TriggerReceiver, TriggerSender};
use crate::infrastructure::bluetooth::backend::Central;
use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::protocol::LinkConfig;
use crate::infrastructure::bluetooth::{LinkHandle, LinkManager, ScanOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

pub struct Pipeline {
    link: LinkHandle,
    auto_reconnect: bool,
    rescan_delay: Duration,
    reports: Option<mpsc::UnboundedReceiver<RunReport>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn the link manager, the notification pump and the orchestration
    /// worker. Nothing is scanned until [`run_until_shutdown`](Self::run_until_shutdown)
    /// or an explicit [`LinkHandle::start_scan`].
    pub fn start(
        central: Arc<dyn Central>,
        camera: Arc<dyn Camera>,
        recognizer: Arc<dyn Recognizer>,
        announcer: Arc<dyn Announcer>,
        settings: &Settings,
    ) -> anyhow::Result<Self> {
        let link_config = LinkConfig::from_settings(&settings.ble)?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (link, link_task) = LinkManager::spawn(central, link_config, events_tx);

        let filter = TriggerFilter::new(
            settings.trigger.sentinel.clone(),
            Duration::from_millis(settings.trigger.debounce_ms),
        );
        let (trigger_tx, trigger_rx) = trigger::channel(filter);

        let sender = CommandSender::new(
            link.clone(),
            settings.ble.max_payload_len,
            Duration::from_millis(settings.sender.retry_backoff_ms),
        );
        let orchestrator = Orchestrator::new(
            camera,
            recognizer,
            announcer,
            sender,
            OrchestratorConfig::from_settings(&settings.recognition, &settings.speech),
        );

        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let pump_task = tokio::spawn(pump(events_rx, trigger_tx));
        let worker_task = tokio::spawn(work(trigger_rx, orchestrator, reports_tx));

        Ok(Self {
            link,
            auto_reconnect: settings.ble.auto_reconnect,
            rescan_delay: settings.ble.rescan_delay(),
            reports: Some(reports_rx),
            tasks: vec![link_task, pump_task, worker_task],
        })
    }

    pub fn link(&self) -> &LinkHandle {
        &self.link
    }

    /// Completed runs, in order. Can be taken once.
    pub fn take_reports(&mut self) -> Option<mpsc::UnboundedReceiver<RunReport>> {
        self.reports.take()
    }

    /// Keep the link up until `shutdown` resolves. When a scan fails or the
    /// link drops, a new scan starts after the rescan delay unless
    /// auto-reconnect is off, in which case this returns.
    pub async fn run_until_shutdown<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut state = self.link.subscribe_state();

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                result = self.link.start_scan() => match result {
                    Ok(ScanOutcome::Connected(device)) | Ok(ScanOutcome::AlreadyConnected(device)) => {
                        info!("Companion device {} ({}) ready", device.name, device.id);
                    }
                    Ok(ScanOutcome::AlreadyInProgress) => debug!("Scan already in progress"),
                    Err(e) => warn!("Could not bring up link: {}", e),
                },
            }

            if self.link.state() == LinkState::Subscribed {
                let dropped = async {
                    let _ = state.wait_for(|s| *s != LinkState::Subscribed).await;
                };
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = dropped => info!("Companion device link lost"),
                }
            }

            if !self.auto_reconnect {
                info!("Auto-reconnect disabled, stopping");
                break;
            }

            debug!("Rescanning in {:?}", self.rescan_delay);
            tokio::select! {
                _ = &mut shutdown => break,
                _ = tokio::time::sleep(self.rescan_delay) => {}
            }
        }

        self.shutdown().await;
    }

    pub async fn shutdown(self) {
        info!("Shutting down pipeline");
        self.link.disconnect().await;
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Link events → trigger channel.
async fn pump(mut events: mpsc::UnboundedReceiver<LinkEvent>, mut triggers: TriggerSender) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Notification { value, received_at } => {
                let text = codec::decode(&value);
                let payload = codec::normalize_notification(&text);
                if triggers.on_notification(payload, received_at) {
                    info!("Button press received");
                }
            }
            LinkEvent::Disconnected => triggers.link_lost(),
            LinkEvent::State(state) => trace!("Link state now {:?}", state),
        }
    }
}

async fn work(
    mut triggers: TriggerReceiver,
    orchestrator: Orchestrator,
    reports: mpsc::UnboundedSender<RunReport>,
) {
    while let Some(delivery) = triggers.recv().await {
        match delivery {
            Delivery::Trigger(trigger) => match orchestrator.on_trigger(trigger).await {
                Ok(report) => {
                    let _ = reports.send(report);
                }
                Err(e) => warn!("Run aborted: {}", e),
            },
            Delivery::LinkLost => debug!("Link lost, pending trigger discarded"),
        }
    }
}
