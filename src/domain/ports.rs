//! Collaborator seams used by the orchestrator.

use crate::domain::models::RecognitionReply;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera is not available: {0}")]
    Unavailable(String),
    #[error("capture failed: {0}")]
    Failed(String),
}

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("recognition service unreachable: {0}")]
    Transport(String),
    #[error("recognition service error: {0}")]
    Service(String),
}

#[async_trait]
pub trait Camera: Send + Sync {
    /// Capture one encoded (JPEG) frame.
    async fn capture(&self) -> Result<Vec<u8>, CameraError>;
}

#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, frame: &[u8]) -> Result<RecognitionReply, RecognizerError>;
}

/// Fire-and-forget speech output.
pub trait Announcer: Send + Sync {
    fn announce(&self, text: &str);
}
