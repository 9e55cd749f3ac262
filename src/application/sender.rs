//! Command Sender
//!
//! Pushes recognition results to the companion device through the link
//! manager's write path. One retry on a transient failure, nothing queued.

use crate::domain::models::OutboundMessage;
use crate::infrastructure::bluetooth::codec::CodecError;
use crate::infrastructure::bluetooth::protocol;
use crate::infrastructure::bluetooth::{LinkError, LinkHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error(transparent)]
    Encode(#[from] CodecError),
    #[error("companion device is not connected")]
    NotConnected,
    #[error("write failed after retry: {0}")]
    SendFailed(String),
}

pub struct CommandSender {
    link: LinkHandle,
    max_payload_len: usize,
    retry_backoff: Duration,
}

impl CommandSender {
    pub fn new(link: LinkHandle, max_payload_len: usize, retry_backoff: Duration) -> Self {
        Self {
            link,
            max_payload_len,
            retry_backoff,
        }
    }

    pub async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        let payload = protocol::encode_message(message, self.max_payload_len)?;
        debug!("Sending {} byte result to companion device", payload.len());

        let first = match self.link.write(payload.clone()).await {
            Ok(()) => {
                info!("Result delivered: {} ({})", message.name, message.relation);
                return Ok(());
            }
            Err(LinkError::NotConnected) => return Err(SendError::NotConnected),
            Err(e) => e,
        };

        warn!(
            "Write failed ({}), retrying in {:?}",
            first, self.retry_backoff
        );
        tokio::time::sleep(self.retry_backoff).await;

        match self.link.write(payload).await {
            Ok(()) => {
                info!("Result delivered on retry: {} ({})", message.name, message.relation);
                Ok(())
            }
            Err(LinkError::NotConnected) => Err(SendError::NotConnected),
            Err(e) => Err(SendError::SendFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::LinkState;
    use crate::infrastructure::bluetooth::backend::BackendError;
    use crate::infrastructure::bluetooth::mock::MockCentral;
    use crate::infrastructure::bluetooth::protocol::LinkConfig;
    use crate::infrastructure::bluetooth::{LinkManager, ScanOutcome};
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const BACKOFF: Duration = Duration::from_millis(300);

    async fn connected_sender(mock: &MockCentral, max_payload_len: usize) -> (CommandSender, LinkHandle) {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (link, _task) =
            LinkManager::spawn(Arc::new(mock.clone()), LinkConfig::default(), events_tx);
        mock.advertise(7, "Capstone-ESP32");
        assert!(matches!(
            link.start_scan().await,
            Ok(ScanOutcome::Connected(_))
        ));
        (CommandSender::new(link.clone(), max_payload_len, BACKOFF), link)
    }

    fn transient() -> Result<(), BackendError> {
        Err(BackendError::Gatt("busy".to_string()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_backoff_succeeds() {
        let mock = MockCentral::new();
        let (sender, _link) = connected_sender(&mock, 512).await;
        mock.script_writes(vec![transient()]);

        let started = Instant::now();
        sender.send(&OutboundMessage::known("딸", "딸")).await.unwrap();

        assert!(started.elapsed() >= BACKOFF);
        assert_eq!(
            mock.writes(),
            vec![r#"{"name":"딸","relation":"딸"}"#.as_bytes().to_vec()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_failure_is_send_failed() {
        let mock = MockCentral::new();
        let (sender, link) = connected_sender(&mock, 512).await;
        mock.script_writes(vec![transient(), transient(), Ok(())]);

        let result = sender.send(&OutboundMessage::unknown("unknown")).await;

        assert!(matches!(result, Err(SendError::SendFailed(_))));
        assert!(mock.writes().is_empty());
        assert_eq!(link.state(), LinkState::Subscribed);
    }

    #[tokio::test]
    async fn test_not_connected_is_not_retried() {
        let mock = MockCentral::new();
        let (sender, link) = connected_sender(&mock, 512).await;
        link.disconnect().await;

        let started = Instant::now();
        let result = sender.send(&OutboundMessage::unknown("unknown")).await;

        assert_eq!(result, Err(SendError::NotConnected));
        assert!(started.elapsed() < BACKOFF);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected_before_writing() {
        let mock = MockCentral::new();
        let (sender, _link) = connected_sender(&mock, 20).await;

        let result = sender.send(&OutboundMessage::known("딸", "딸")).await;

        assert!(matches!(
            result,
            Err(SendError::Encode(CodecError::PayloadTooLarge { max: 20, .. }))
        ));
        assert!(mock.writes().is_empty());
    }
}
