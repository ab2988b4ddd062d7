// src/stt/types.rs
// Wire Types and Error Definitions

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One timed unit of recognized speech from the transcription result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start offset in milliseconds
    pub begin_ms: u64,
    /// End offset in milliseconds
    pub end_ms: u64,
    /// Best-hypothesis text
    pub text: String,
}

/// Response envelope shared by all five endpoints. `ok == 0` means success;
/// anything else is a rejection and `failed` carries the remote reason.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope {
    pub ok: i64,
    #[serde(default)]
    pub data: Option<String>,
    #[serde(default)]
    pub failed: Option<String>,
}

impl ApiEnvelope {
    pub fn is_success(&self) -> bool {
        self.ok == 0
    }

    pub fn failure_reason(&self) -> String {
        self.failed
            .clone()
            .unwrap_or_else(|| format!("remote returned ok={}", self.ok))
    }
}

/// Nested payload of a getProgress `data` field.
#[derive(Debug, Deserialize)]
struct ProgressPayload {
    status: i64,
}

/// Segment as serialized inside a getResult `data` field. Offsets arrive as
/// decimal strings.
#[derive(Debug, Deserialize)]
struct RawSegment {
    bg: String,
    ed: String,
    onebest: String,
}

/// Parse the JSON string nested in a getProgress response.
pub fn parse_progress(data: &str) -> Result<i64, SttError> {
    let payload: ProgressPayload = serde_json::from_str(data)
        .map_err(|e| SttError::Protocol(format!("bad progress payload: {}", e)))?;
    Ok(payload.status)
}

/// Parse the JSON string nested in a getResult response into ordered segments.
pub fn parse_segments(data: &str) -> Result<Vec<TranscriptSegment>, SttError> {
    let raw: Vec<RawSegment> = serde_json::from_str(data)
        .map_err(|e| SttError::Protocol(format!("bad result payload: {}", e)))?;

    let mut segments = Vec::with_capacity(raw.len());
    for item in raw {
        let begin_ms = item
            .bg
            .parse::<u64>()
            .map_err(|_| SttError::Protocol(format!("non-numeric bg offset: {:?}", item.bg)))?;
        let end_ms = item
            .ed
            .parse::<u64>()
            .map_err(|_| SttError::Protocol(format!("non-numeric ed offset: {:?}", item.ed)))?;
        segments.push(TranscriptSegment {
            begin_ms,
            end_ms,
            text: item.onebest,
        });
    }
    Ok(segments)
}

/// Transcription workflow errors with retry classification.
#[derive(Debug, Error)]
pub enum SttError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Remote rejected {step}: {reason}")]
    RemoteRejected { step: &'static str, reason: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Timed out waiting for completion after {attempts} progress checks")]
    PollBudgetExhausted { attempts: u32 },

    #[error("Session cancelled")]
    Cancelled,

    #[error("Invalid session state: {actual:?} (expected {expected:?})")]
    InvalidState {
        expected: crate::stt::SessionState,
        actual: crate::stt::SessionState,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SttError {
    /// Returns true if this error is retryable. Only transport failures
    /// qualify; remote rejections and malformed payloads are definitive.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SttError::Network(_) | SttError::Timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_progress() {
        assert_eq!(parse_progress(r#"{"status": 3}"#).unwrap(), 3);
        assert_eq!(parse_progress(r#"{"status": 9}"#).unwrap(), 9);
    }

    #[test]
    fn test_parse_progress_malformed() {
        let err = parse_progress("not json").unwrap_err();
        assert!(matches!(err, SttError::Protocol(_)));
        assert!(!err.is_retryable(), "Protocol violations must not retry");
    }

    #[test]
    fn test_parse_segments() {
        let data = r#"[{"bg":"0","ed":"1500","onebest":"hi"},{"bg":"1500","ed":"3000","onebest":"bye"}]"#;
        let segments = parse_segments(data).unwrap();
        assert_eq!(
            segments,
            vec![
                TranscriptSegment {
                    begin_ms: 0,
                    end_ms: 1500,
                    text: "hi".to_string()
                },
                TranscriptSegment {
                    begin_ms: 1500,
                    end_ms: 3000,
                    text: "bye".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_parse_segments_non_numeric_offset() {
        let data = r#"[{"bg":"abc","ed":"3000","onebest":"bye"}]"#;
        assert!(matches!(parse_segments(data), Err(SttError::Protocol(_))));
    }

    #[test]
    fn test_retry_classification() {
        assert!(SttError::Network("reset".to_string()).is_retryable());
        assert!(SttError::Timeout.is_retryable());
        assert!(!SttError::RemoteRejected {
            step: "merge",
            reason: "bad task".to_string()
        }
        .is_retryable());
        assert!(!SttError::Config("no key".to_string()).is_retryable());
    }
}
