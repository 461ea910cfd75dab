//! Data models for camsync-rx
//!
//! - Upload session lifecycle and status state machine
//! - Content fingerprints

pub mod fingerprint;
pub mod upload_session;

pub use fingerprint::{Fingerprint, FingerprintParseError};
pub use upload_session::{SessionUpdate, UploadSession, UploadStatus};
