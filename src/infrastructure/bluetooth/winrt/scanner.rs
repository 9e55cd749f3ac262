//! BLE Scanner Module
//!
//! Advertisement watcher feeding the link manager's discovery sweep.

use crate::domain::models::{DeviceId, ScannedDevice};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{info, trace};
use windows::Devices::Bluetooth::Advertisement::{
    BluetoothLEAdvertisementReceivedEventArgs, BluetoothLEAdvertisementWatcher,
    BluetoothLEScanningMode,
};
use windows::Foundation::TypedEventHandler;

/// BLE Scanner reporting every named advertisement
pub struct BleScanner {
    watcher: Mutex<Option<BluetoothLEAdvertisementWatcher>>,
}

impl BleScanner {
    pub fn new() -> Self {
        Self {
            watcher: Mutex::new(None),
        }
    }

    /// Start an active scan. Matching by name is left to the caller.
    pub fn start(&self, found: mpsc::UnboundedSender<ScannedDevice>) -> windows::core::Result<()> {
        // Stop any existing scan
        self.stop()?;

        info!("Starting BLE advertisement watcher");
        let watcher = BluetoothLEAdvertisementWatcher::new()?;
        // Active mode so scan responses carrying the local name are reported.
        watcher.SetScanningMode(BluetoothLEScanningMode::Active)?;

        let handler = TypedEventHandler::new(
            move |_: windows::core::Ref<BluetoothLEAdvertisementWatcher>,
                  args: windows::core::Ref<BluetoothLEAdvertisementReceivedEventArgs>| {
                if let Some(args) = args.as_ref() {
                    let name = args.Advertisement()?.LocalName()?.to_string();
                    if name.is_empty() {
                        return Ok(());
                    }

                    let device = ScannedDevice {
                        name,
                        id: DeviceId(args.BluetoothAddress()?),
                        signal_strength: args.RawSignalStrengthInDBm()?,
                    };
                    trace!("Advertisement: {:?}", device);
                    let _ = found.send(device);
                }
                Ok(())
            },
        );

        watcher.Received(&handler)?;
        watcher.Start()?;
        *self.watcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(watcher);

        Ok(())
    }

    pub fn stop(&self) -> windows::core::Result<()> {
        let watcher = self.watcher.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(watcher) = watcher {
            info!("Stopping BLE advertisement watcher");
            watcher.Stop()?;
        }
        Ok(())
    }
}

impl Drop for BleScanner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
