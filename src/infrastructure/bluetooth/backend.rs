//! Platform seam between the link manager and the OS Bluetooth LE stack.

use crate::domain::models::{DeviceHandle, ScannedDevice};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("GATT operation failed: {0}")]
    Gatt(String),
    #[error("platform error: {0}")]
    Platform(String),
}

/// What a characteristic supports, as far as the link manager cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub uuid: Uuid,
    pub can_write: bool,
    pub can_notify: bool,
}

/// Asynchronous events raised by a connected peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralEvent {
    Notification { characteristic: Uuid, value: Vec<u8> },
    Disconnected,
}

/// The adapter side: discovery and connection.
#[async_trait]
pub trait Central: Send + Sync {
    /// Start delivering advertisements into `found` until `stop_scan`.
    async fn start_scan(&self, found: mpsc::UnboundedSender<ScannedDevice>)
        -> Result<(), BackendError>;

    async fn stop_scan(&self) -> Result<(), BackendError>;

    /// Open a link. Notifications and link loss are reported on `events`
    /// for as long as the returned peripheral is alive.
    async fn connect(
        &self,
        device: &DeviceHandle,
        events: mpsc::UnboundedSender<PeripheralEvent>,
    ) -> Result<Box<dyn Peripheral>, BackendError>;
}

/// A connected companion device.
#[async_trait]
pub trait Peripheral: Send + Sync {
    async fn characteristics(&self, service: Uuid) -> Result<Vec<CharacteristicInfo>, BackendError>;

    async fn subscribe(&self, service: Uuid, characteristic: Uuid) -> Result<(), BackendError>;

    /// Write with response.
    async fn write(
        &self,
        service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BackendError>;

    async fn disconnect(&self) -> Result<(), BackendError>;
}
