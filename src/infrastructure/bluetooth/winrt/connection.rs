//! BLE Connection Module
//!
//! Device connection, GATT discovery, notification subscription and writes
//! on top of WinRT.

use crate::domain::models::DeviceHandle;
use crate::infrastructure::bluetooth::backend::{
    BackendError, CharacteristicInfo, Peripheral, PeripheralEvent,
};
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;
use windows::core::GUID;
use windows::Devices::Bluetooth::GenericAttributeProfile::{
    GattCharacteristic, GattCharacteristicProperties,
    GattClientCharacteristicConfigurationDescriptorValue, GattCommunicationStatus, GattSession,
    GattValueChangedEventArgs, GattWriteOption,
};
use windows::Devices::Bluetooth::{BluetoothConnectionStatus, BluetoothLEDevice};
use windows::Foundation::TypedEventHandler;
use windows::Storage::Streams::{DataReader, DataWriter};

/// Attempts at enabling notifications before giving up.
const SUBSCRIBE_ATTEMPTS: u32 = 3;
const SUBSCRIBE_RETRY_DELAY_MS: u64 = 500;

fn guid(uuid: Uuid) -> GUID {
    GUID::from_u128(uuid.as_u128())
}

fn gatt_status(what: &str, status: GattCommunicationStatus) -> Result<(), BackendError> {
    if status == GattCommunicationStatus::Success {
        Ok(())
    } else {
        Err(BackendError::Gatt(format!("{} returned {:?}", what, status)))
    }
}

/// Open a link to `device`; link loss is reported on `events`.
pub async fn connect(
    device: &DeviceHandle,
    events: mpsc::UnboundedSender<PeripheralEvent>,
) -> Result<WinRtPeripheral, BackendError> {
    info!("Connecting to Bluetooth device: {}", device.id);

    let ble_device = BluetoothLEDevice::FromBluetoothAddressAsync(device.id.0)?
        .await
        .map_err(|e| BackendError::Unreachable(e.to_string()))?;
    info!("Device object acquired: {:?}", ble_device.Name()?);

    // A GattSession with MaintainConnection keeps Windows from dropping the
    // link between GATT operations.
    let session = match GattSession::FromDeviceIdAsync(&ble_device.BluetoothDeviceId()?)?.await {
        Ok(session) => {
            session.SetMaintainConnection(true)?;
            Some(session)
        }
        Err(e) => {
            warn!("Failed to create GattSession, continuing anyway: {}", e);
            None
        }
    };

    let status_events = events.clone();
    let status_handler =
        TypedEventHandler::new(move |dev: windows::core::Ref<BluetoothLEDevice>, _| {
            if let Some(dev) = dev.as_ref() {
                if dev.ConnectionStatus()? == BluetoothConnectionStatus::Disconnected {
                    let _ = status_events.send(PeripheralEvent::Disconnected);
                }
            }
            Ok(())
        });
    let status_token = ble_device.ConnectionStatusChanged(&status_handler)?;

    Ok(WinRtPeripheral {
        device: ble_device,
        session,
        events,
        status_token,
        characteristics: Mutex::new(Vec::new()),
        notify_tokens: Mutex::new(Vec::new()),
    })
}

pub struct WinRtPeripheral {
    device: BluetoothLEDevice,
    session: Option<GattSession>,
    events: mpsc::UnboundedSender<PeripheralEvent>,
    status_token: i64,
    characteristics: Mutex<Vec<GattCharacteristic>>,
    notify_tokens: Mutex<Vec<(GattCharacteristic, i64)>>,
}

impl WinRtPeripheral {
    fn find(&self, characteristic: Uuid) -> Result<GattCharacteristic, BackendError> {
        let target = guid(characteristic);
        let cached = self.characteristics.lock().unwrap_or_else(|e| e.into_inner());
        for c in cached.iter() {
            if c.Uuid()? == target {
                return Ok(c.clone());
            }
        }
        Err(BackendError::Gatt(format!(
            "characteristic {} not discovered",
            characteristic
        )))
    }

    async fn enable_notifications(&self, c: &GattCharacteristic) -> Result<(), BackendError> {
        for attempt in 1..=SUBSCRIBE_ATTEMPTS {
            let status = c
                .WriteClientCharacteristicConfigurationDescriptorAsync(
                    GattClientCharacteristicConfigurationDescriptorValue::Notify,
                )?
                .await;
            match status {
                Ok(status) if status == GattCommunicationStatus::Success => {
                    info!("Notifications enabled");
                    return Ok(());
                }
                Ok(status) => warn!(
                    "Notification subscription attempt {} returned {:?}",
                    attempt, status
                ),
                Err(e) => warn!("Notification subscription attempt {} failed: {}", attempt, e),
            }
            if attempt < SUBSCRIBE_ATTEMPTS {
                tokio::time::sleep(tokio::time::Duration::from_millis(SUBSCRIBE_RETRY_DELAY_MS))
                    .await;
            }
        }
        Err(BackendError::Gatt(format!(
            "failed to enable notifications after {} attempts",
            SUBSCRIBE_ATTEMPTS
        )))
    }
}

#[async_trait]
impl Peripheral for WinRtPeripheral {
    async fn characteristics(&self, service: Uuid) -> Result<Vec<CharacteristicInfo>, BackendError> {
        let services_result = self
            .device
            .GetGattServicesForUuidAsync(guid(service))?
            .await?;
        gatt_status("GetGattServicesForUuidAsync", services_result.Status()?)?;

        let services = services_result.Services()?;
        if services.Size()? == 0 {
            return Err(BackendError::Gatt(format!("service {} not found", service)));
        }
        let gatt_service = services.GetAt(0)?;

        let access_status = gatt_service.RequestAccessAsync()?.await?;
        info!("Service access status: {:?}", access_status);

        let chars_result = gatt_service.GetCharacteristicsAsync()?.await?;
        gatt_status("GetCharacteristicsAsync", chars_result.Status()?)?;

        let characteristics = chars_result.Characteristics()?;
        info!("Found {} characteristics", characteristics.Size()?);

        let mut infos = Vec::new();
        let mut cached = Vec::new();
        for i in 0..characteristics.Size()? {
            let c = characteristics.GetAt(i)?;
            let props = c.CharacteristicProperties()?.0;
            infos.push(CharacteristicInfo {
                uuid: Uuid::from_u128(c.Uuid()?.to_u128()),
                can_write: props
                    & (GattCharacteristicProperties::Write.0
                        | GattCharacteristicProperties::WriteWithoutResponse.0)
                    != 0,
                can_notify: props & GattCharacteristicProperties::Notify.0 != 0,
            });
            cached.push(c);
        }
        *self.characteristics.lock().unwrap_or_else(|e| e.into_inner()) = cached;

        Ok(infos)
    }

    async fn subscribe(&self, _service: Uuid, characteristic: Uuid) -> Result<(), BackendError> {
        let c = self.find(characteristic)?;

        let sender = self.events.clone();
        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<GattCharacteristic>,
                  args: windows::core::Ref<GattValueChangedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let reader = DataReader::FromBuffer(&args.CharacteristicValue()?)?;
                    let mut value = vec![0u8; reader.UnconsumedBufferLength()? as usize];
                    reader.ReadBytes(&mut value)?;
                    let _ = sender.send(PeripheralEvent::Notification {
                        characteristic,
                        value,
                    });
                }
                Ok(())
            },
        );
        let token = c.ValueChanged(&handler)?;
        self.notify_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((c.clone(), token));

        self.enable_notifications(&c).await
    }

    async fn write(
        &self,
        _service: Uuid,
        characteristic: Uuid,
        payload: &[u8],
    ) -> Result<(), BackendError> {
        let c = self.find(characteristic)?;

        let writer = DataWriter::new()?;
        writer.WriteBytes(payload)?;
        let buffer = writer.DetachBuffer()?;

        let status = c
            .WriteValueWithOptionAsync(&buffer, GattWriteOption::WriteWithResponse)?
            .await?;
        gatt_status("WriteValueWithOptionAsync", status)
    }

    async fn disconnect(&self) -> Result<(), BackendError> {
        let tokens: Vec<_> = self
            .notify_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for (c, token) in tokens {
            let _ = c.RemoveValueChanged(token);
        }
        let _ = self.device.RemoveConnectionStatusChanged(self.status_token);

        if let Some(session) = &self.session {
            let _ = session.Close();
        }
        self.device.Close()?;
        info!("Closed Bluetooth device");
        Ok(())
    }
}
