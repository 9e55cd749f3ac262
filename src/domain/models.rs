use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Opaque platform identifier of a discovered peripheral
/// (the 48-bit Bluetooth address on WinRT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u64);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#X}", self.0)
    }
}

/// The companion device the link manager found and connected to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub id: DeviceId,
    pub name: String,
}

/// An advertisement seen during a scan.
#[derive(Debug, Clone)]
pub struct ScannedDevice {
    pub id: DeviceId,
    pub name: String,
    pub signal_strength: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    Discovering,
    Subscribed,
    Disconnecting,
}

/// Events the link manager pushes to its consumers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    State(LinkState),
    /// A notify-characteristic value, stamped on arrival.
    Notification { value: Vec<u8>, received_at: Instant },
    /// The link is gone; no further notifications will follow.
    Disconnected,
}

/// "The physical button was activated."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub at: Instant,
}

/// A single candidate returned by the recognition service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub relation: String,
    #[serde(default)]
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionReply {
    Match(Candidate),
    NoMatch,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionOutcome {
    Known {
        name: String,
        relation: String,
        confidence: f64,
    },
    Unknown,
    Failed {
        reason: FailureReason,
    },
}

/// Why a run produced no transmittable answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("recognition timed out after {0:?}")]
    RecognitionTimeout(Duration),
    #[error("{0}")]
    RecognitionService(String),
    #[error("incomplete match (name {name:?}, relation {relation:?})")]
    IncompleteMatch { name: String, relation: String },
}

/// Result record written back to the companion device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub name: String,
    pub relation: String,
}

impl OutboundMessage {
    pub fn known(name: impl Into<String>, relation: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relation: relation.into(),
        }
    }

    /// The unknown marker: the reserved sentinel in both fields.
    pub fn unknown(sentinel: &str) -> Self {
        Self {
            name: sentinel.to_string(),
            relation: sentinel.to_string(),
        }
    }

    /// Transmittable form of an outcome. `Failed` never goes over the link.
    pub fn from_outcome(outcome: &RecognitionOutcome, unknown_sentinel: &str) -> Option<Self> {
        match outcome {
            RecognitionOutcome::Known { name, relation, .. } => {
                Some(Self::known(name.clone(), relation.clone()))
            }
            RecognitionOutcome::Unknown => Some(Self::unknown(unknown_sentinel)),
            RecognitionOutcome::Failed { .. } => None,
        }
    }
}

/// A person registered with the recognition service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub relation: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_marker_serialization() {
        let json = serde_json::to_string(&OutboundMessage::unknown("unknown")).unwrap();
        assert_eq!(json, r#"{"name":"unknown","relation":"unknown"}"#);
    }

    #[test]
    fn test_failed_outcome_is_not_transmitted() {
        let failed = RecognitionOutcome::Failed {
            reason: FailureReason::RecognitionTimeout(Duration::from_secs(10)),
        };
        assert_eq!(OutboundMessage::from_outcome(&failed, "unknown"), None);

        let known = RecognitionOutcome::Known {
            name: "딸".to_string(),
            relation: "딸".to_string(),
            confidence: 92.0,
        };
        assert_eq!(
            OutboundMessage::from_outcome(&known, "unknown"),
            Some(OutboundMessage::known("딸", "딸"))
        );
    }
}
