//! In-memory collaborators for orchestrator and pipeline tests.

use crate::domain::models::RecognitionReply;
use crate::domain::ports::{Announcer, Camera, CameraError, Recognizer, RecognizerError};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

pub const FRAME: &[u8] = b"JPEG";

pub struct FakeCamera {
    next_error: Mutex<Option<CameraError>>,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            next_error: Mutex::new(None),
        }
    }

    pub fn fail_next(&self, error: CameraError) {
        *self.next_error.lock().unwrap() = Some(error);
    }
}

#[async_trait]
impl Camera for FakeCamera {
    async fn capture(&self) -> Result<Vec<u8>, CameraError> {
        match self.next_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(FRAME.to_vec()),
        }
    }
}

/// Answers every call with the configured reply. With [`hold`](Self::hold)
/// each call parks until [`release`](Self::release) hands it a permit.
pub struct FakeRecognizer {
    reply: Mutex<Result<RecognitionReply, String>>,
    delay: Mutex<Option<Duration>>,
    frames: Mutex<Vec<Vec<u8>>>,
    held: AtomicBool,
    permits: Semaphore,
    entered: Notify,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeRecognizer {
    pub fn new() -> Self {
        Self {
            reply: Mutex::new(Ok(RecognitionReply::NoMatch)),
            delay: Mutex::new(None),
            frames: Mutex::new(Vec::new()),
            held: AtomicBool::new(false),
            permits: Semaphore::new(0),
            entered: Notify::new(),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// Service errors are replayed as [`RecognizerError::Service`].
    pub fn reply(&self, reply: Result<RecognitionReply, RecognizerError>) {
        *self.reply.lock().unwrap() = reply.map_err(|e| match e {
            RecognizerError::Service(message) | RecognizerError::Transport(message) => message,
        });
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn hold(&self) {
        self.held.store(true, Ordering::SeqCst);
    }

    pub fn release(&self, calls: usize) {
        self.permits.add_permits(calls);
    }

    /// Resolves once a call is inside `recognize`.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.frames.lock().unwrap().len()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn recognize(&self, frame: &[u8]) -> Result<RecognitionReply, RecognizerError> {
        self.frames.lock().unwrap().push(frame.to_vec());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        self.entered.notify_one();

        if self.held.load(Ordering::SeqCst) {
            self.permits.acquire().await.unwrap().forget();
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.reply
            .lock()
            .unwrap()
            .clone()
            .map_err(RecognizerError::Service)
    }
}

#[derive(Default)]
pub struct RecordingAnnouncer {
    phrases: Mutex<Vec<String>>,
}

impl RecordingAnnouncer {
    pub fn phrases(&self) -> Vec<String> {
        self.phrases.lock().unwrap().clone()
    }
}

impl Announcer for RecordingAnnouncer {
    fn announce(&self, text: &str) {
        self.phrases.lock().unwrap().push(text.to_string());
    }
}
