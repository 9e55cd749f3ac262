use crate::domain::ports::{Camera, CameraError};
use crate::domain::settings::CameraSettings;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Captures a frame by running an external program (ffmpeg, fswebcam,
/// a vendor CLI...) that writes a JPEG to `output_path`.
pub struct CommandCamera {
    command: Vec<String>,
    output_path: PathBuf,
    timeout: Duration,
}

impl CommandCamera {
    pub fn from_settings(settings: &CameraSettings) -> Self {
        let output_path = if settings.output_path.is_empty() {
            std::env::temp_dir().join("capstone_capture.jpg")
        } else {
            PathBuf::from(&settings.output_path)
        };
        Self {
            command: settings.command.clone(),
            output_path,
            timeout: Duration::from_millis(settings.timeout_ms),
        }
    }
}

#[async_trait]
impl Camera for CommandCamera {
    async fn capture(&self) -> Result<Vec<u8>, CameraError> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(CameraError::Unavailable(
                "no capture command configured".to_string(),
            ));
        };

        // A stale frame from a previous run must never be reported as fresh.
        let _ = tokio::fs::remove_file(&self.output_path).await;

        let output_arg = self.output_path.to_string_lossy();
        let args: Vec<String> = args
            .iter()
            .map(|arg| arg.replace(OUTPUT_PLACEHOLDER, &output_arg))
            .collect();
        debug!("Running capture command: {} {:?}", program, args);

        // The child is killed if the deadline passes or the run is dropped.
        let capture = Command::new(program).args(&args).kill_on_drop(true).output();
        let output = match tokio::time::timeout(self.timeout, capture).await {
            Ok(result) => {
                result.map_err(|e| CameraError::Unavailable(format!("{}: {}", program, e)))?
            }
            Err(_) => {
                return Err(CameraError::Failed(format!(
                    "{} did not finish within {:?}",
                    program, self.timeout
                )))
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CameraError::Failed(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }

        let frame = tokio::fs::read(&self.output_path).await.map_err(|e| {
            CameraError::Failed(format!("reading {}: {}", self.output_path.display(), e))
        })?;
        if frame.is_empty() {
            return Err(CameraError::Failed("capture produced an empty file".to_string()));
        }

        info!("Captured {} byte frame", frame.len());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(command: &[&str], name: &str) -> CameraSettings {
        CameraSettings {
            command: command.iter().map(|s| s.to_string()).collect(),
            output_path: std::env::temp_dir()
                .join(format!("{}_{}.jpg", name, std::process::id()))
                .to_string_lossy()
                .into_owned(),
            ..CameraSettings::default()
        }
    }

    #[tokio::test]
    async fn test_no_command_is_unavailable() {
        let camera = CommandCamera::from_settings(&CameraSettings::default());
        assert!(matches!(
            camera.capture().await,
            Err(CameraError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let camera =
            CommandCamera::from_settings(&settings(&["capstone-no-such-camera-tool"], "missing"));
        assert!(matches!(
            camera.capture().await,
            Err(CameraError::Unavailable(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_frame_written_by_command() {
        let camera = CommandCamera::from_settings(&settings(
            &["sh", "-c", "printf JPEG > {output}"],
            "capture_ok",
        ));
        assert_eq!(camera.capture().await.unwrap(), b"JPEG");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_command_is_capture_failure() {
        let camera = CommandCamera::from_settings(&settings(&["sh", "-c", "exit 3"], "capture_fail"));
        assert!(matches!(camera.capture().await, Err(CameraError::Failed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_command_times_out() {
        let mut hung = settings(&["sh", "-c", "sleep 5; printf JPEG > {output}"], "capture_hung");
        hung.timeout_ms = 200;
        let camera = CommandCamera::from_settings(&hung);

        let started = std::time::Instant::now();
        let result = camera.capture().await;

        assert!(matches!(result, Err(CameraError::Failed(reason)) if reason.contains("did not finish")));
        assert!(started.elapsed() < Duration::from_secs(2));
        // The killed program never got to write its frame.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!camera.output_path.exists());
    }
}
