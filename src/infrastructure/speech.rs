use crate::domain::ports::Announcer;
use crate::domain::settings::SpeechSettings;
use std::process::Command;
use tracing::{info, warn};

const TEXT_PLACEHOLDER: &str = "{text}";
const QUOTES: [char; 5] = ['\'', '\u{2018}', '\u{2019}', '\u{201A}', '\u{201B}'];

/// Speaks through an external text-to-speech program, e.g.
/// `["powershell", "-Command", "Add-Type -AssemblyName System.Speech; (New-Object System.Speech.Synthesis.SpeechSynthesizer).Speak('{text}')"]`.
/// With no program configured the phrase is only logged.
pub struct CommandAnnouncer {
    command: Vec<String>,
}

impl CommandAnnouncer {
    pub fn from_settings(settings: &SpeechSettings) -> Self {
        Self {
            command: settings.command.clone(),
        }
    }

    fn build(&self, text: &str) -> Option<Command> {
        let (program, args) = self.command.split_first()?;
        // Any of these ends a single-quoted PowerShell string; `'` alone does in sh.
        let text: String = text.chars().filter(|c| !QUOTES.contains(c)).collect();
        let mut command = Command::new(program);
        command.args(args.iter().map(|arg| arg.replace(TEXT_PLACEHOLDER, &text)));
        Some(command)
    }
}

impl Announcer for CommandAnnouncer {
    fn announce(&self, text: &str) {
        info!("Announcing: {}", text);
        let Some(mut command) = self.build(text) else {
            return;
        };

        std::thread::spawn(move || match command.status() {
            Ok(status) if !status.success() => warn!("Speech command exited with {}", status),
            Ok(_) => {}
            Err(e) => warn!("Failed to run speech command: {}", e),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_substitution() {
        let announcer = CommandAnnouncer::from_settings(&SpeechSettings {
            command: vec!["say".to_string(), "--text={text}".to_string()],
            ..SpeechSettings::default()
        });
        let command = announcer.build("딸인 지수's 입니다").unwrap();
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(command.get_program(), "say");
        assert_eq!(args, vec!["--text=딸인 지수s 입니다"]);
    }

    #[test]
    fn test_without_command_only_logs() {
        let announcer = CommandAnnouncer::from_settings(&SpeechSettings::default());
        assert!(announcer.build("모르는 사람입니다.").is_none());
        announcer.announce("모르는 사람입니다.");
    }

    #[test]
    fn test_typographic_quotes_are_stripped() {
        let announcer = CommandAnnouncer::from_settings(&SpeechSettings {
            command: vec!["powershell".to_string(), "-Command".to_string(), "Speak('{text}')".to_string()],
            ..SpeechSettings::default()
        });
        let command = announcer
            .build("a\u{2018}b\u{2019}c\u{201A}d\u{201B}e'f")
            .unwrap();
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-Command", "Speak('abcdef')"]);
    }
}
