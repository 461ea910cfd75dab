//! Upload session state machine
//!
//! A session tracks one upload request from first byte to final placement:
//!
//! ```text
//! UPLOADING ─┬─> DUPLICATE
//!            ├─> COMPLETED                      (no transcode needed)
//!            ├─> FAILED                         (placement I/O error)
//!            └─> CONVERTING ─┬─> CONVERTED ─────────> COMPLETED
//!                            ├─> ENCODER_NOT_FOUND ─> COMPLETED_NO_CONVERSION
//!                            └─> CONVERSION_FAILED
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Upload lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    /// Payload bytes still arriving
    Uploading,
    /// Content already stored; nothing written
    Duplicate,
    /// Background encoder running
    Converting,
    /// Encoder finished, index not yet updated
    Converted,
    /// Encoder failed or timed out; original kept
    ConversionFailed,
    /// Encoder binary unavailable; original kept
    EncoderNotFound,
    /// File stored (and normalized, if applicable)
    Completed,
    /// File stored in its original container
    CompletedNoConversion,
    /// Placement failed after the payload was received
    Failed,
}

impl UploadStatus {
    /// No further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Duplicate
                | UploadStatus::Completed
                | UploadStatus::CompletedNoConversion
                | UploadStatus::ConversionFailed
                | UploadStatus::Failed
        )
    }
}

/// Optional fields applied together with a status transition
#[derive(Debug, Clone, Default)]
pub struct SessionUpdate {
    pub filename: Option<String>,
    pub path: Option<PathBuf>,
    pub warning: Option<String>,
    pub error: Option<String>,
}

impl SessionUpdate {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            warning: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Tracked state of one upload request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    /// Unique session identifier
    pub session_id: Uuid,

    /// Current lifecycle state
    pub status: UploadStatus,

    /// Bytes written to scratch storage so far
    pub bytes_received: u64,

    /// Declared payload length, when the client sent one
    pub total_bytes: Option<u64>,

    /// Final (or client-supplied) file name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// Resolved storage path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Non-fatal problem, e.g. encoder unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,

    /// Failure detail for FAILED / CONVERSION_FAILED
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadSession {
    /// Create a session in the UPLOADING state
    pub fn new(session_id: Uuid, filename: Option<String>, total_bytes: Option<u64>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            status: UploadStatus::Uploading,
            bytes_received: 0,
            total_bytes,
            filename,
            path: None,
            warning: None,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record received byte count
    pub fn update_bytes(&mut self, received: u64, total: Option<u64>) {
        self.bytes_received = received;
        if total.is_some() {
            self.total_bytes = total;
        }
        self.updated_at = Utc::now();
    }

    /// Move to `status`, merging any supplied fields
    ///
    /// Fields left `None` in `update` keep their previous value.
    pub fn transition_to(&mut self, status: UploadStatus, update: SessionUpdate) {
        self.status = status;
        if let Some(filename) = update.filename {
            self.filename = Some(filename);
        }
        if let Some(path) = update.path {
            self.path = Some(path);
        }
        if let Some(warning) = update.warning {
            self.warning = Some(warning);
        }
        if let Some(error) = update.error {
            self.error = Some(error);
        }
        self.updated_at = Utc::now();
    }

    /// Percentage of declared length received, if known
    pub fn percent(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.bytes_received as f64 / total as f64 * 100.0).min(100.0))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_uploading() {
        let session = UploadSession::new(Uuid::new_v4(), None, Some(10));
        assert_eq!(session.status, UploadStatus::Uploading);
        assert_eq!(session.bytes_received, 0);
        assert!(!session.status.is_terminal());
    }

    #[test]
    fn test_transition_merges_fields() {
        let mut session = UploadSession::new(Uuid::new_v4(), Some("a.mov".into()), None);
        session.transition_to(UploadStatus::Converting, SessionUpdate::path("/r/2024/a.mov"));
        session.transition_to(
            UploadStatus::EncoderNotFound,
            SessionUpdate::warning("ffmpeg not found"),
        );

        assert_eq!(session.status, UploadStatus::EncoderNotFound);
        assert_eq!(session.path, Some(PathBuf::from("/r/2024/a.mov")));
        assert_eq!(session.warning.as_deref(), Some("ffmpeg not found"));
        assert_eq!(session.filename.as_deref(), Some("a.mov"));
    }

    #[test]
    fn test_percent() {
        let mut session = UploadSession::new(Uuid::new_v4(), None, Some(200));
        session.update_bytes(50, None);
        assert_eq!(session.percent(), Some(25.0));

        let unknown = UploadSession::new(Uuid::new_v4(), None, None);
        assert_eq!(unknown.percent(), None);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&UploadStatus::CompletedNoConversion).unwrap();
        assert_eq!(json, "\"completed_no_conversion\"");
    }
}
