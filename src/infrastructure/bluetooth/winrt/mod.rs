//! WinRT Bluetooth LE backend (Windows only).

mod connection;
mod scanner;

use crate::domain::models::{DeviceHandle, ScannedDevice};
use crate::infrastructure::bluetooth::backend::{
    BackendError, Central, Peripheral, PeripheralEvent,
};
use async_trait::async_trait;
use tokio::sync::mpsc;

impl From<windows::core::Error> for BackendError {
    fn from(e: windows::core::Error) -> Self {
        BackendError::Platform(e.to_string())
    }
}

pub struct WinRtCentral {
    scanner: scanner::BleScanner,
}

impl WinRtCentral {
    pub fn new() -> Self {
        Self {
            scanner: scanner::BleScanner::new(),
        }
    }
}

#[async_trait]
impl Central for WinRtCentral {
    async fn start_scan(
        &self,
        found: mpsc::UnboundedSender<ScannedDevice>,
    ) -> Result<(), BackendError> {
        Ok(self.scanner.start(found)?)
    }

    async fn stop_scan(&self) -> Result<(), BackendError> {
        Ok(self.scanner.stop()?)
    }

    async fn connect(
        &self,
        device: &DeviceHandle,
        events: mpsc::UnboundedSender<PeripheralEvent>,
    ) -> Result<Box<dyn Peripheral>, BackendError> {
        let peripheral = connection::connect(device, events).await?;
        Ok(Box::new(peripheral))
    }
}
