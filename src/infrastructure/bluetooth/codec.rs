//! Transport Codec
//!
//! Text ⇄ bytes for the GATT write/notify characteristics. The companion
//! firmware speaks plain UTF-8, so encoding is the identity on bytes; the
//! only policy here is the payload ceiling, which is enforced instead of
//! truncating.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("message could not be serialized: {0}")]
    Serialize(String),
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Serialize(e.to_string())
    }
}

pub fn encode(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Never fails; invalid sequences become U+FFFD.
pub fn decode(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

pub fn encode_bounded(text: &str, max_len: usize) -> Result<Vec<u8>, CodecError> {
    let len = text.len();
    if len > max_len {
        return Err(CodecError::PayloadTooLarge { len, max: max_len });
    }
    Ok(encode(text))
}

/// Strip the NUL / CR / LF padding firmware tends to append to notify values.
pub fn normalize_notification(text: &str) -> &str {
    text.trim_end_matches(['\0', '\r', '\n'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        for s in [
            "",
            "BUTTON_PRESSED",
            r#"{"name":"딸","relation":"딸"}"#,
            "emoji 👋 and tabs\t",
        ] {
            assert_eq!(decode(&encode(s)), s);
        }
    }

    #[test]
    fn test_bounded_rejects_instead_of_truncating() {
        // Hangul syllables are three bytes each.
        let text = "딸딸";
        assert_eq!(encode_bounded(text, 6).unwrap().len(), 6);
        assert_eq!(
            encode_bounded(text, 5),
            Err(CodecError::PayloadTooLarge { len: 6, max: 5 })
        );
    }

    #[test]
    fn test_decode_is_total() {
        assert_eq!(decode(&[0x42, 0xFF, 0x43]), "B\u{FFFD}C");
    }

    #[test]
    fn test_normalize_notification() {
        assert_eq!(normalize_notification("BUTTON_PRESSED\0\0"), "BUTTON_PRESSED");
        assert_eq!(normalize_notification("BUTTON_PRESSED\r\n"), "BUTTON_PRESSED");
        assert_eq!(normalize_notification(" BUTTON_PRESSED"), " BUTTON_PRESSED");
    }

    #[test]
    fn test_serialization_error_is_not_an_empty_payload() {
        let json_error = serde_json::from_str::<u8>("not json").unwrap_err();
        let err: CodecError = json_error.into();
        assert!(matches!(err, CodecError::Serialize(message) if !message.is_empty()));
    }
}
