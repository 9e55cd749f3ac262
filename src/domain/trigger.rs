//! Trigger Channel
//!
//! Turns decoded notify payloads into [`TriggerEvent`]s: only the sentinel
//! counts, a bouncing button is debounced, and delivery to the single
//! consumer goes through a one-slot mailbox where the latest trigger wins.

use crate::domain::models::TriggerEvent;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Sentinel filter with a quiet window measured from the last emitted trigger.
#[derive(Debug, Clone)]
pub struct TriggerFilter {
    sentinel: String,
    quiet_window: Duration,
    last_emitted: Option<Instant>,
}

impl TriggerFilter {
    pub fn new(sentinel: impl Into<String>, quiet_window: Duration) -> Self {
        Self {
            sentinel: sentinel.into(),
            quiet_window,
            last_emitted: None,
        }
    }

    pub fn accept(&mut self, payload: &str, at: Instant) -> Option<TriggerEvent> {
        if payload != self.sentinel {
            debug!("Ignoring notification payload: {:?}", payload);
            return None;
        }

        if let Some(last) = self.last_emitted {
            if at.saturating_duration_since(last) < self.quiet_window {
                trace!("Trigger suppressed inside quiet window");
                return None;
            }
        }

        self.last_emitted = Some(at);
        Some(TriggerEvent { at })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Trigger(TriggerEvent),
    /// The link dropped. Any trigger still pending was discarded.
    LinkLost,
}

#[derive(Default)]
struct Slot {
    pending: Option<TriggerEvent>,
    link_lost: bool,
    closed: bool,
}

struct Shared {
    slot: Mutex<Slot>,
    ready: Notify,
}

impl Shared {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Create a connected producer/consumer pair.
pub fn channel(filter: TriggerFilter) -> (TriggerSender, TriggerReceiver) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot::default()),
        ready: Notify::new(),
    });
    (
        TriggerSender {
            filter,
            shared: shared.clone(),
        },
        TriggerReceiver { shared },
    )
}

/// Producer half, fed by the notification pump.
pub struct TriggerSender {
    filter: TriggerFilter,
    shared: Arc<Shared>,
}

impl TriggerSender {
    /// Returns `true` when the payload produced a trigger.
    pub fn on_notification(&mut self, payload: &str, at: Instant) -> bool {
        let Some(event) = self.filter.accept(payload, at) else {
            return false;
        };

        let replaced = self.shared.slot().pending.replace(event).is_some();
        if replaced {
            debug!("Coalesced trigger into pending slot");
        }
        self.shared.ready.notify_one();
        true
    }

    pub fn link_lost(&mut self) {
        {
            let mut slot = self.shared.slot();
            if slot.pending.take().is_some() {
                debug!("Dropping pending trigger, link is gone");
            }
            slot.link_lost = true;
        }
        self.shared.ready.notify_one();
    }
}

impl Drop for TriggerSender {
    fn drop(&mut self) {
        self.shared.slot().closed = true;
        self.shared.ready.notify_one();
    }
}

/// Consumer half, owned by the orchestrator worker.
pub struct TriggerReceiver {
    shared: Arc<Shared>,
}

impl TriggerReceiver {
    /// Wait for the next delivery. `None` once the sender is gone and
    /// nothing is left in the slot.
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            if let Some(delivery) = self.take() {
                return Some(delivery);
            }
            if self.shared.slot().closed {
                return None;
            }
            self.shared.ready.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.take()
    }

    fn take(&self) -> Option<Delivery> {
        let mut slot = self.shared.slot();
        if slot.link_lost {
            slot.link_lost = false;
            return Some(Delivery::LinkLost);
        }
        slot.pending.take().map(Delivery::Trigger)
    }
}
