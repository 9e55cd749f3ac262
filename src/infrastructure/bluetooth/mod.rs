//! Bluetooth Module
//!
//! BLE link to the companion button device.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                      LinkManager                          │
//! │  (single task owning LinkState and the peripheral)        │
//! └─────────────────────┬────────────────────────────────────┘
//!                       │  Central / Peripheral traits
//!         ┌─────────────┴─────────────┐
//!         ▼                           ▼
//! ┌───────────────┐          ┌─────────────────┐
//! │  winrt        │          │  mock (tests)   │
//! │ - watcher     │          │ - scripted ads  │
//! │ - GATT access │          │ - write results │
//! └───────────────┘          └─────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - GATT layout, device name, result message format
//! - [`codec`] - text ⇄ bytes for the characteristics
//! - [`backend`] - platform seam
//! - [`link`] - scan/connect/subscribe state machine and write path

pub mod backend;
pub mod codec;
pub mod link;
pub mod protocol;

#[cfg(test)]
pub mod mock;

#[cfg(windows)]
pub mod winrt;

pub use link::{LinkError, LinkHandle, LinkManager, ScanOutcome};
