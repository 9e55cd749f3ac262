//! Companion Device Protocol
//!
//! GATT layout and payload formats shared with the ESP32 button firmware.
//!
//! ```text
//! Service  f6c2a2a7-2ac6-4b93-a34a-1eac0e7d9f77
//!   ├─ a0b1c4f9-…-a0c352b92604  Write   app → device  {"name":..,"relation":..}
//!   └─ 3b9dbf27-…-7c781ffdd09e  Notify  device → app  "BUTTON_PRESSED"
//! ```
//!
//! The defaults below are mirrored in `domain::settings`; the running
//! values always come from [`LinkConfig`].

use crate::domain::models::OutboundMessage;
use crate::domain::settings::BleSettings;
use crate::infrastructure::bluetooth::codec::{self, CodecError};
use anyhow::{Context, Result};
use std::time::Duration;
use uuid::Uuid;

/// Advertised local name of the companion hardware.
pub const DEVICE_NAME: &str = "Capstone-ESP32";

pub const SERVICE_UUID: &str = "f6c2a2a7-2ac6-4b93-a34a-1eac0e7d9f77";

/// RX on the device side: results are written here.
pub const WRITE_CHAR_UUID: &str = "a0b1c4f9-6f26-4da3-8f79-a0c352b92604";

/// TX on the device side: button events arrive here.
pub const NOTIFY_CHAR_UUID: &str = "3b9dbf27-0cd4-41b2-b2f8-7c781ffdd09e";

/// Resolved link parameters.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub device_name: String,
    pub service_uuid: Uuid,
    pub write_char_uuid: Uuid,
    pub notify_char_uuid: Uuid,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            service_uuid: Uuid::from_u128(0xf6c2a2a7_2ac6_4b93_a34a_1eac0e7d9f77),
            write_char_uuid: Uuid::from_u128(0xa0b1c4f9_6f26_4da3_8f79_a0c352b92604),
            notify_char_uuid: Uuid::from_u128(0x3b9dbf27_0cd4_41b2_b2f8_7c781ffdd09e),
            scan_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl LinkConfig {
    pub fn from_settings(settings: &BleSettings) -> Result<Self> {
        Ok(Self {
            device_name: settings.device_name.clone(),
            service_uuid: parse_uuid(&settings.service_uuid).context("service UUID")?,
            write_char_uuid: parse_uuid(&settings.write_char_uuid)
                .context("write characteristic UUID")?,
            notify_char_uuid: parse_uuid(&settings.notify_char_uuid)
                .context("notify characteristic UUID")?,
            scan_timeout: settings.scan_timeout(),
            connect_timeout: settings.connect_timeout(),
        })
    }
}

/// Parse a UUID string as written in the firmware sources.
pub fn parse_uuid(uuid_str: &str) -> Result<Uuid> {
    Uuid::parse_str(uuid_str.trim()).map_err(|e| anyhow::anyhow!("Invalid UUID format: {}", e))
}

/// Serialize a result for the write characteristic.
pub fn encode_message(message: &OutboundMessage, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let json = serde_json::to_string(message)?;
    codec::encode_bounded(&json, max_len)
}
