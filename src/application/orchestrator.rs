//! Capture-Recognize Orchestrator
//!
//! One run per trigger: capture a frame, ask the recognizer who it is,
//! announce the answer locally and push it to the companion device.

use crate::application::sender::{CommandSender, SendError};
use crate::domain::models::{
    FailureReason, OutboundMessage, RecognitionOutcome, RecognitionReply, TriggerEvent,
};
use crate::domain::ports::{Announcer, Camera, CameraError, Recognizer};
use crate::domain::settings::{RecognitionSettings, SpeechSettings};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that abort a run before recognition.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("camera unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
}

impl From<CameraError> for RunError {
    fn from(e: CameraError) -> Self {
        match e {
            CameraError::Unavailable(reason) => RunError::CaptureUnavailable(reason),
            CameraError::Failed(reason) => RunError::CaptureFailed(reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transmission {
    Sent,
    /// Failed outcomes stay local.
    NotTransmitted,
    Failed(SendError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub trigger: TriggerEvent,
    pub outcome: RecognitionOutcome,
    pub transmission: Transmission,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub recognition_timeout: Duration,
    pub unknown_sentinel: String,
    pub known_template: String,
    pub unknown_phrase: String,
    pub failed_phrase: String,
}

impl OrchestratorConfig {
    pub fn from_settings(recognition: &RecognitionSettings, speech: &SpeechSettings) -> Self {
        Self {
            recognition_timeout: Duration::from_millis(recognition.timeout_ms),
            unknown_sentinel: recognition.unknown_sentinel.clone(),
            known_template: speech.known_template.clone(),
            unknown_phrase: speech.unknown_phrase.clone(),
            failed_phrase: speech.failed_phrase.clone(),
        }
    }

    fn phrase(&self, outcome: &RecognitionOutcome) -> String {
        match outcome {
            RecognitionOutcome::Known { name, relation, .. } => self
                .known_template
                .replace("{name}", name)
                .replace("{relation}", relation),
            RecognitionOutcome::Unknown => self.unknown_phrase.clone(),
            RecognitionOutcome::Failed { .. } => self.failed_phrase.clone(),
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::from_settings(&RecognitionSettings::default(), &SpeechSettings::default())
    }
}

/// Map the recognizer's answer onto an outcome.
pub fn classify(reply: RecognitionReply, unknown_sentinel: &str) -> RecognitionOutcome {
    match reply {
        RecognitionReply::NoMatch => RecognitionOutcome::Unknown,
        RecognitionReply::Match(candidate) if candidate.name == unknown_sentinel => {
            RecognitionOutcome::Unknown
        }
        RecognitionReply::Match(candidate)
            if !candidate.name.trim().is_empty() && !candidate.relation.trim().is_empty() =>
        {
            RecognitionOutcome::Known {
                name: candidate.name,
                relation: candidate.relation,
                confidence: candidate.confidence,
            }
        }
        RecognitionReply::Match(candidate) => RecognitionOutcome::Failed {
            reason: FailureReason::IncompleteMatch {
                name: candidate.name,
                relation: candidate.relation,
            },
        },
    }
}

pub struct Orchestrator {
    camera: Arc<dyn Camera>,
    recognizer: Arc<dyn Recognizer>,
    announcer: Arc<dyn Announcer>,
    sender: CommandSender,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        camera: Arc<dyn Camera>,
        recognizer: Arc<dyn Recognizer>,
        announcer: Arc<dyn Announcer>,
        sender: CommandSender,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            camera,
            recognizer,
            announcer,
            sender,
            config,
        }
    }

    /// Run the whole capture → recognize → announce → send sequence.
    /// Callers must not overlap runs; the trigger channel worker runs them
    /// back to back.
    pub async fn on_trigger(&self, trigger: TriggerEvent) -> Result<RunReport, RunError> {
        info!("Trigger received, capturing frame");
        let frame = self.camera.capture().await?;

        let outcome = self.recognize(&frame).await;
        match &outcome {
            RecognitionOutcome::Known {
                name,
                relation,
                confidence,
            } => info!("Recognized {} ({}) at {:.1}%", name, relation, confidence),
            RecognitionOutcome::Unknown => info!("Face not recognized"),
            RecognitionOutcome::Failed { reason } => warn!("Recognition failed: {}", reason),
        }

        self.announcer.announce(&self.config.phrase(&outcome));

        let transmission =
            match OutboundMessage::from_outcome(&outcome, &self.config.unknown_sentinel) {
                Some(message) => match self.sender.send(&message).await {
                    Ok(()) => Transmission::Sent,
                    Err(e) => {
                        warn!("Result not delivered: {}", e);
                        Transmission::Failed(e)
                    }
                },
                None => Transmission::NotTransmitted,
            };

        Ok(RunReport {
            trigger,
            outcome,
            transmission,
        })
    }

    async fn recognize(&self, frame: &[u8]) -> RecognitionOutcome {
        match tokio::time::timeout(
            self.config.recognition_timeout,
            self.recognizer.recognize(frame),
        )
        .await
        {
            Ok(Ok(reply)) => classify(reply, &self.config.unknown_sentinel),
            Ok(Err(e)) => RecognitionOutcome::Failed {
                reason: FailureReason::RecognitionService(e.to_string()),
            },
            Err(_) => RecognitionOutcome::Failed {
                reason: FailureReason::RecognitionTimeout(self.config.recognition_timeout),
            },
        }
    }
}
