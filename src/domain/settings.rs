use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

/// Companion link: discovery filter, GATT layout and link policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BleSettings {
    pub device_name: String,
    pub service_uuid: String,
    /// App → device.
    pub write_char_uuid: String,
    /// Device → app.
    pub notify_char_uuid: String,
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub max_payload_len: usize,
    pub auto_reconnect: bool,
    pub rescan_delay_ms: u64,
}

impl Default for BleSettings {
    fn default() -> Self {
        Self {
            device_name: "Capstone-ESP32".to_string(),
            service_uuid: "f6c2a2a7-2ac6-4b93-a34a-1eac0e7d9f77".to_string(),
            write_char_uuid: "a0b1c4f9-6f26-4da3-8f79-a0c352b92604".to_string(),
            notify_char_uuid: "3b9dbf27-0cd4-41b2-b2f8-7c781ffdd09e".to_string(),
            scan_timeout_ms: 10_000,
            connect_timeout_ms: 10_000,
            max_payload_len: 512,
            auto_reconnect: true,
            rescan_delay_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    pub sentinel: String,
    pub debounce_ms: u64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            sentinel: "BUTTON_PRESSED".to_string(),
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionSettings {
    pub api_url: String,
    pub timeout_ms: u64,
    /// Name the service reports when no registered face is close enough.
    pub unknown_sentinel: String,
}

impl Default for RecognitionSettings {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5000".to_string(),
            timeout_ms: 10_000,
            unknown_sentinel: "unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SenderSettings {
    pub retry_backoff_ms: u64,
}

impl Default for SenderSettings {
    fn default() -> Self {
        Self {
            retry_backoff_ms: 300,
        }
    }
}

/// External capture program. `{output}` in any argument is replaced with
/// `output_path`; the program must leave a JPEG there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub command: Vec<String>,
    pub output_path: String,
    /// The capture program is killed after this long.
    pub timeout_ms: u64,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            output_path: String::new(),
            timeout_ms: 5_000,
        }
    }
}

/// External text-to-speech program. `{text}` is replaced with the phrase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechSettings {
    pub command: Vec<String>,
    /// `{name}` and `{relation}` are substituted.
    pub known_template: String,
    pub unknown_phrase: String,
    pub failed_phrase: String,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            known_template: "{relation}인 {name}입니다.".to_string(),
            unknown_phrase: "모르는 사람입니다.".to_string(),
            failed_phrase: "얼굴을 인식할 수 없습니다.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub ble: BleSettings,
    #[serde(default)]
    pub trigger: TriggerSettings,
    #[serde(default)]
    pub recognition: RecognitionSettings,
    #[serde(default)]
    pub sender: SenderSettings,

    // Collaborators
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub speech: SpeechSettings,
}

impl BleSettings {
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn rescan_delay(&self) -> Duration {
        Duration::from_millis(self.rescan_delay_ms)
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "capstone_companion".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, or from `path` when given.
    /// A missing or unreadable file yields defaults.
    pub fn new(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let settings_path = match path {
            Some(path) => path,
            None => Self::get_settings_path()?,
        };
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                // Logging is not up yet; the settings decide how it gets configured.
                eprintln!(
                    "Using default settings ({}): {:#}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Ok(Self {
            settings,
            settings_path,
        })
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("CapstoneCompanion");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let settings = serde_json::from_str(&contents)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }
}
