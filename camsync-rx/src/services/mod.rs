//! Service modules for the upload pipeline
//!
//! Dependency order (leaves first): receiver, dedup index, placement,
//! transcoder; the session tracker and storage root store are shared by
//! all of them. `ingest` wires them together for one request.

pub mod dedup_index;
pub mod ingest;
pub mod placement;
pub mod receiver;
pub mod session_tracker;
pub mod storage_root;
pub mod transcoder;

pub use dedup_index::{DedupIndex, Durability, Lookup, INDEX_FILE_NAME};
pub use ingest::{IngestError, IngestOutcome, IngestService, IngestStatus, UploadSource};
pub use placement::{ContentKind, PlacementPolicy};
pub use receiver::{ReceiveError, Received, ReceiverSettings, StreamingReceiver};
pub use session_tracker::SessionTracker;
pub use storage_root::{StorageConfig, StorageRootStore};
pub use transcoder::{EncodeError, Encoder, FfmpegEncoder, TranscodeJob, TranscodeQueue};
