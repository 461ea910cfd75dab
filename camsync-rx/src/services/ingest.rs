//! Upload pipeline for one request
//!
//! request bytes → receiver → {fingerprint, scratch file} → dedup lookup →
//! duplicate: discard scratch, session `duplicate`
//! fresh: placement → rename into bucket → index update →
//!        `.mov`: provisional index entry + background transcode
//!
//! The lookup and the later record are separate steps; two concurrent
//! uploads of identical bytes can both be placed, and the index keeps
//! whichever recorded last.

use axum::body::Body;
use axum::extract::Multipart;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use camsync_common::time::local_now;

use crate::models::{SessionUpdate, UploadStatus};
use crate::services::placement::{determine_date, name_file, place_file};
use crate::services::transcoder::needs_transcode;
use crate::services::{
    ContentKind, DedupIndex, Durability, Lookup, PlacementPolicy, ReceiveError, Received,
    ReceiverSettings, SessionTracker, StorageRootStore, StreamingReceiver, TranscodeJob, TranscodeQueue,
    INDEX_FILE_NAME,
};

/// Scratch directory name inside the storage root
pub const SCRATCH_DIR: &str = ".incoming";

/// Upload body as handed over by the HTTP layer
#[derive(Debug)]
pub enum UploadSource {
    /// `multipart/form-data` with a `file` part
    Multipart(Multipart),
    /// Raw body; naming comes from headers
    Raw {
        body: Body,
        content_type: Option<String>,
        filename: Option<String>,
    },
}

/// Response status for a finished upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Ok,
    Duplicate,
}

/// What the client is told once placement is done
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestOutcome {
    pub session_id: Uuid,
    pub path: PathBuf,
    pub status: IngestStatus,
}

/// Pipeline errors
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Receive(#[from] ReceiveError),

    #[error("Failed to store upload: {0}")]
    Placement(std::io::Error),

    /// Client reused the id of an upload still in progress
    #[error("Upload session {0} is already in progress")]
    SessionInUse(Uuid),
}

/// Wires receiver, index, placement and transcoder together
#[derive(Debug, Clone)]
pub struct IngestService {
    roots: Arc<StorageRootStore>,
    placement: PlacementPolicy,
    index: DedupIndex,
    sessions: SessionTracker,
    transcoder: TranscodeQueue,
    receiver_settings: ReceiverSettings,
}

impl IngestService {
    pub fn new(
        roots: Arc<StorageRootStore>,
        index: DedupIndex,
        sessions: SessionTracker,
        transcoder: TranscodeQueue,
        receiver_settings: ReceiverSettings,
    ) -> Self {
        Self {
            placement: PlacementPolicy::new(Arc::clone(&roots)),
            roots,
            index,
            sessions,
            transcoder,
            receiver_settings,
        }
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn index(&self) -> &DedupIndex {
        &self.index
    }

    pub fn transcoder(&self) -> &TranscodeQueue {
        &self.transcoder
    }

    pub fn roots(&self) -> &StorageRootStore {
        &self.roots
    }

    /// Swap the storage root and point the index at the new root's file
    pub async fn set_storage_root(&self, new_root: &Path) -> camsync_common::Result<Arc<PathBuf>> {
        let root = self.roots.set(new_root)?;
        self.index.relocate(root.join(INDEX_FILE_NAME)).await;
        Ok(root)
    }

    /// Receive, deduplicate and place one upload
    pub async fn ingest(
        &self,
        session_id: Uuid,
        source: UploadSource,
        declared_len: Option<u64>,
    ) -> Result<IngestOutcome, IngestError> {
        let raw_filename = match &source {
            UploadSource::Raw { filename, .. } => filename.clone(),
            UploadSource::Multipart(_) => None,
        };
        if !self.sessions.create(session_id, raw_filename, declared_len) {
            return Err(IngestError::SessionInUse(session_id));
        }

        let scratch_dir = self.placement.root().join(SCRATCH_DIR);
        let receiver = StreamingReceiver::new(scratch_dir, self.receiver_settings.clone());

        let received = match source {
            UploadSource::Multipart(multipart) => {
                receiver
                    .receive_multipart(multipart, declared_len, session_id, &self.sessions)
                    .await
            }
            UploadSource::Raw {
                body,
                content_type,
                filename,
            } => receiver
                .receive_stream(body.into_data_stream(), declared_len, session_id, &self.sessions)
                .await
                .map(|mut received| {
                    received.content_type = content_type;
                    received.filename = filename;
                    received
                }),
        };

        let received = match received {
            Ok(received) => received,
            Err(e) => {
                match e {
                    ReceiveError::EmptyPayload
                    | ReceiveError::MissingFilePart(_)
                    | ReceiveError::EmptyFilename => {
                        self.sessions.remove(session_id);
                    }
                    _ => {
                        self.sessions.transition(
                            session_id,
                            UploadStatus::Failed,
                            SessionUpdate::error(e.to_string()),
                        );
                    }
                }
                tracing::warn!(session_id = %session_id, error = %e, "Upload rejected");
                return Err(e.into());
            }
        };

        if let Lookup::Duplicate(existing) = self.index.lookup(&received.fingerprint).await {
            let _ = tokio::fs::remove_file(&received.temp_path).await;
            tracing::info!(
                session_id = %session_id,
                fingerprint = %received.fingerprint,
                existing = %existing.display(),
                "Duplicate upload discarded"
            );
            self.sessions.transition(
                session_id,
                UploadStatus::Duplicate,
                SessionUpdate::path(&existing),
            );
            return Ok(IngestOutcome {
                session_id,
                path: existing,
                status: IngestStatus::Duplicate,
            });
        }

        let final_path = match self.place(&received).await {
            Ok(path) => path,
            Err(e) => {
                let _ = tokio::fs::remove_file(&received.temp_path).await;
                tracing::error!(session_id = %session_id, error = %e, "Placement failed");
                self.sessions.transition(
                    session_id,
                    UploadStatus::Failed,
                    SessionUpdate::error(e.to_string()),
                );
                return Err(IngestError::Placement(e));
            }
        };

        let filename = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(
            session_id = %session_id,
            path = %final_path.display(),
            bytes = received.byte_count,
            "Upload stored"
        );

        if needs_transcode(&final_path, received.content_type.as_deref()) {
            // Provisional: lets duplicates of the original resolve while converting
            self.index
                .record(received.fingerprint, final_path.clone(), Durability::Deferred)
                .await;
            self.sessions.transition(
                session_id,
                UploadStatus::Converting,
                SessionUpdate::path(&final_path).with_filename(filename),
            );
            self.transcoder.submit(TranscodeJob {
                session_id,
                source: final_path.clone(),
                fingerprint: received.fingerprint,
            });
        } else {
            self.index
                .record(received.fingerprint, final_path.clone(), Durability::Immediate)
                .await;
            self.sessions.transition(
                session_id,
                UploadStatus::Completed,
                SessionUpdate::path(&final_path).with_filename(filename),
            );
        }

        Ok(IngestOutcome {
            session_id,
            path: final_path,
            status: IngestStatus::Ok,
        })
    }

    async fn place(&self, received: &Received) -> std::io::Result<PathBuf> {
        let content_type = received.content_type.as_deref();
        let kind = ContentKind::classify(content_type, received.filename.as_deref());
        let date = determine_date(&received.sample, kind);
        let bucket = self.placement.bucket_path(&date).await?;
        let name = name_file(received.filename.as_deref(), kind, content_type, &local_now());
        tracing::debug!(?kind, bucket = %bucket.display(), name = %name, "Placement decided");
        place_file(&received.temp_path, &bucket, &name).await
    }
}
