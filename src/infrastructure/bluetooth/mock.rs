//! Scripted in-memory backend for tests.

use crate::domain::models::{DeviceHandle, DeviceId, ScannedDevice};
use crate::infrastructure::bluetooth::backend::{
    BackendError, Central, CharacteristicInfo, Peripheral, PeripheralEvent,
};
use crate::infrastructure::bluetooth::protocol::LinkConfig;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

struct MockState {
    queued_advertisements: Vec<ScannedDevice>,
    scan_sender: Option<mpsc::UnboundedSender<ScannedDevice>>,
    start_scan_calls: usize,
    connect_error: Option<BackendError>,
    stall_connect: bool,
    characteristics: Vec<CharacteristicInfo>,
    subscriptions: Vec<Uuid>,
    write_results: VecDeque<Result<(), BackendError>>,
    writes: Vec<Vec<u8>>,
    stall_writes: bool,
    events: Option<mpsc::UnboundedSender<PeripheralEvent>>,
    disconnect_calls: usize,
}

#[derive(Clone)]
pub struct MockCentral {
    state: Arc<Mutex<MockState>>,
}

impl MockCentral {
    pub fn new() -> Self {
        let config = LinkConfig::default();
        Self {
            state: Arc::new(Mutex::new(MockState {
                queued_advertisements: Vec::new(),
                scan_sender: None,
                start_scan_calls: 0,
                connect_error: None,
                stall_connect: false,
                characteristics: vec![
                    CharacteristicInfo {
                        uuid: config.write_char_uuid,
                        can_write: true,
                        can_notify: false,
                    },
                    CharacteristicInfo {
                        uuid: config.notify_char_uuid,
                        can_write: false,
                        can_notify: true,
                    },
                ],
                subscriptions: Vec::new(),
                write_results: VecDeque::new(),
                writes: Vec::new(),
                stall_writes: false,
                events: None,
                disconnect_calls: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Deliver an advertisement now if scanning, otherwise on the next scan.
    pub fn advertise(&self, id: u64, name: &str) {
        let device = ScannedDevice {
            id: DeviceId(id),
            name: name.to_string(),
            signal_strength: -60,
        };
        let mut state = self.state();
        match &state.scan_sender {
            Some(sender) => {
                let _ = sender.send(device);
            }
            None => state.queued_advertisements.push(device),
        }
    }

    pub fn notify(&self, value: &[u8]) {
        let characteristic = LinkConfig::default().notify_char_uuid;
        if let Some(events) = &self.state().events {
            let _ = events.send(PeripheralEvent::Notification {
                characteristic,
                value: value.to_vec(),
            });
        }
    }

    pub fn drop_link(&self) {
        if let Some(events) = self.state().events.take() {
            let _ = events.send(PeripheralEvent::Disconnected);
        }
    }

    pub fn fail_connect(&self, error: BackendError) {
        self.state().connect_error = Some(error);
    }

    pub fn clear_connect_failure(&self) {
        self.state().connect_error = None;
    }

    /// Connection attempts never complete.
    pub fn stall_connect(&self) {
        self.state().stall_connect = true;
    }

    /// Writes never complete.
    pub fn stall_writes(&self) {
        self.state().stall_writes = true;
    }

    pub fn without_notify_characteristic(&self) {
        let notify = LinkConfig::default().notify_char_uuid;
        self.state().characteristics.retain(|c| c.uuid != notify);
    }

    /// Script the next write results; unscripted writes succeed.
    pub fn script_writes(&self, results: Vec<Result<(), BackendError>>) {
        self.state().write_results.extend(results);
    }

    pub fn is_scanning(&self) -> bool {
        self.state().scan_sender.is_some()
    }

    pub fn start_scan_calls(&self) -> usize {
        self.state().start_scan_calls
    }

    pub fn subscriptions(&self) -> Vec<Uuid> {
        self.state().subscriptions.clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn disconnect_calls(&self) -> usize {
        self.state().disconnect_calls
    }
}

#[async_trait]
impl Central for MockCentral {
    async fn start_scan(
        &self,
        found: mpsc::UnboundedSender<ScannedDevice>,
    ) -> Result<(), BackendError> {
        let mut state = self.state();
        state.start_scan_calls += 1;
        for device in state.queued_advertisements.drain(..) {
            let _ = found.send(device);
        }
        state.scan_sender = Some(found);
        Ok(())
    }

    async fn stop_scan(&self) -> Result<(), BackendError> {
        self.state().scan_sender = None;
        Ok(())
    }

    async fn connect(
        &self,
        _device: &DeviceHandle,
        events: mpsc::UnboundedSender<PeripheralEvent>,
    ) -> Result<Box<dyn Peripheral>, BackendError> {
        let stalled = self.state().stall_connect;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state();
        if let Some(error) = state.connect_error.clone() {
            return Err(error);
        }
        state.events = Some(events);
        Ok(Box::new(MockPeripheral {
            state: self.state.clone(),
        }))
    }
}

struct MockPeripheral {
    state: Arc<Mutex<MockState>>,
}

#[async_trait]
impl Peripheral for MockPeripheral {
    async fn characteristics(&self, _service: Uuid) -> Result<Vec<CharacteristicInfo>, BackendError> {
        Ok(self.state.lock().unwrap().characteristics.clone())
    }

    async fn subscribe(&self, _service: Uuid, characteristic: Uuid) -> Result<(), BackendError> {
        self.state.lock().unwrap().subscriptions.push(characteristic);
        Ok(())
    }

    async fn write(
        &self,
        _service: Uuid,
        _characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BackendError> {
        let stalled = self.state.lock().unwrap().stall_writes;
        if stalled {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        let result = state.write_results.pop_front().unwrap_or(Ok(()));
        if result.is_ok() {
            state.writes.push(payload.to_vec());
        }
        result
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let mut state = self.state.lock().unwrap();
        state.disconnect_calls += 1;
        state.events = None;
        Ok(())
    }
}
