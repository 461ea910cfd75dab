//! Streaming payload receiver
//!
//! Consumes an upload body block by block: each 1 MiB block is appended to
//! a scratch file and folded into a running SHA-256, so memory use stays
//! flat regardless of payload size. Progress reaches the session tracker at
//! most every `report_every_bytes` or `report_interval`, whichever comes
//! first, plus once at the end.

use axum::body::Bytes;
use axum::extract::Multipart;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::models::{Fingerprint, SessionUpdate, UploadStatus};
use crate::services::SessionTracker;

/// Multipart field carrying the upload
pub const FILE_FIELD: &str = "file";

/// Receiver errors
#[derive(Debug, Error)]
pub enum ReceiveError {
    /// Zero bytes arrived
    #[error("No data received")]
    EmptyPayload,

    /// Multipart body without the expected file field
    #[error("No 'file' field found. Available fields: {0:?}")]
    MissingFilePart(Vec<String>),

    /// File field present but with an empty file name
    #[error("No file selected")]
    EmptyFilename,

    /// Malformed or interrupted request body
    #[error("Failed to read request body: {0}")]
    Body(String),

    /// Scratch file I/O
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReceiveError {
    /// Whether the client sent something unusable (as opposed to a server fault)
    pub fn is_client_error(&self) -> bool {
        !matches!(self, ReceiveError::Io(_))
    }
}

/// A fully received payload sitting in scratch storage
#[derive(Debug)]
pub struct Received {
    pub temp_path: PathBuf,
    pub fingerprint: Fingerprint,
    pub byte_count: u64,
    /// Leading bytes kept for metadata parsing
    pub sample: Vec<u8>,
    /// File name from the multipart field, if any
    pub filename: Option<String>,
    /// Content type from the multipart field, if any
    pub content_type: Option<String>,
}

/// Block and reporting parameters
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub block_size: usize,
    pub sample_limit: usize,
    pub report_every_bytes: u64,
    pub report_interval: Duration,
}

impl Default for ReceiverSettings {
    fn default() -> Self {
        Self {
            block_size: 1024 * 1024,
            sample_limit: 1024 * 1024,
            report_every_bytes: 8 * 1024 * 1024,
            report_interval: Duration::from_millis(250),
        }
    }
}

/// Scratch file removed on drop unless handed off
struct ScratchFile {
    path: PathBuf,
    keep: bool,
}

impl ScratchFile {
    fn into_path(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if !self.keep {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Streams request bodies into scratch files
#[derive(Debug, Clone)]
pub struct StreamingReceiver {
    scratch_dir: PathBuf,
    settings: ReceiverSettings,
}

impl StreamingReceiver {
    pub fn new(scratch_dir: impl Into<PathBuf>, settings: ReceiverSettings) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            settings,
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Receive the `file` part of a multipart body
    ///
    /// Other fields are skipped. The session must already exist; its file
    /// name is filled in once the part header has been read.
    pub async fn receive_multipart(
        &self,
        mut multipart: Multipart,
        declared_len: Option<u64>,
        session_id: Uuid,
        tracker: &SessionTracker,
    ) -> Result<Received, ReceiveError> {
        let mut seen = Vec::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ReceiveError::Body(e.to_string()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name != FILE_FIELD {
                tracing::debug!(session_id = %session_id, field = %name, "Skipping multipart field");
                seen.push(name);
                continue;
            }

            let filename = field.file_name().unwrap_or_default().to_string();
            if filename.is_empty() {
                return Err(ReceiveError::EmptyFilename);
            }
            let content_type = field.content_type().map(str::to_string);
            tracker.transition(
                session_id,
                UploadStatus::Uploading,
                SessionUpdate::default().with_filename(filename.clone()),
            );

            let mut received = self
                .receive_stream(field, declared_len, session_id, tracker)
                .await?;
            received.filename = Some(filename);
            received.content_type = content_type;
            return Ok(received);
        }

        Err(ReceiveError::MissingFilePart(seen))
    }

    /// Receive a raw byte stream
    pub async fn receive_stream<S, E>(
        &self,
        stream: S,
        declared_len: Option<u64>,
        session_id: Uuid,
        tracker: &SessionTracker,
    ) -> Result<Received, ReceiveError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let scratch = ScratchFile {
            path: self.scratch_dir.join(format!(
                ".incoming-{}-{}.part",
                session_id.simple(),
                Uuid::new_v4().simple()
            )),
            keep: false,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&scratch.path)
            .await?;

        let block_size = self.settings.block_size.max(1);
        let mut hasher = Sha256::new();
        let mut block: Vec<u8> = Vec::with_capacity(block_size);
        let mut sample: Vec<u8> = Vec::new();
        let mut written: u64 = 0;
        let mut reported_bytes: u64 = 0;
        let mut reported_at = Instant::now();

        let mut stream = std::pin::pin!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ReceiveError::Body(e.to_string()))?;
            let mut rest: &[u8] = &chunk;

            while !rest.is_empty() {
                let take = (block_size - block.len()).min(rest.len());
                block.extend_from_slice(&rest[..take]);
                rest = &rest[take..];

                if block.len() == block_size {
                    self.fold_block(&mut file, &mut hasher, &mut sample, &block).await?;
                    written += block.len() as u64;
                    block.clear();

                    if written - reported_bytes >= self.settings.report_every_bytes
                        || reported_at.elapsed() >= self.settings.report_interval
                    {
                        tracker.update_bytes(session_id, written, declared_len);
                        reported_bytes = written;
                        reported_at = Instant::now();
                    }
                }
            }
        }

        if !block.is_empty() {
            self.fold_block(&mut file, &mut hasher, &mut sample, &block).await?;
            written += block.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        tracker.update_bytes(session_id, written, declared_len);

        if written == 0 {
            tracing::warn!(session_id = %session_id, "Empty upload payload");
            return Err(ReceiveError::EmptyPayload);
        }

        let fingerprint = Fingerprint::from_hasher(hasher);
        tracing::debug!(
            session_id = %session_id,
            bytes = written,
            fingerprint = %fingerprint,
            "Payload received"
        );

        Ok(Received {
            temp_path: scratch.into_path(),
            fingerprint,
            byte_count: written,
            sample,
            filename: None,
            content_type: None,
        })
    }

    async fn fold_block(
        &self,
        file: &mut tokio::fs::File,
        hasher: &mut Sha256,
        sample: &mut Vec<u8>,
        block: &[u8],
    ) -> std::io::Result<()> {
        file.write_all(block).await?;
        hasher.update(block);
        let room = self.settings.sample_limit.saturating_sub(sample.len());
        if room > 0 {
            sample.extend_from_slice(&block[..room.min(block.len())]);
        }
        Ok(())
    }
}

/// Fingerprint an existing file, reading 1 MiB at a time
pub async fn fingerprint_file(path: &Path) -> std::io::Result<Fingerprint> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        use std::io::Read;

        let mut file = std::fs::File::open(&path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];
        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }
        Ok(Fingerprint::from_hasher(hasher))
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, format!("Hash task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use tempfile::TempDir;

    fn chunks(parts: Vec<&'static [u8]>) -> impl Stream<Item = Result<Bytes, Infallible>> {
        futures::stream::iter(parts.into_iter().map(|p| Ok(Bytes::from_static(p))))
    }

    fn small_blocks() -> ReceiverSettings {
        ReceiverSettings {
            block_size: 4,
            sample_limit: 6,
            report_every_bytes: 4,
            report_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn test_receive_stream_writes_and_hashes() {
        let dir = TempDir::new().unwrap();
        let tracker = SessionTracker::new();
        let id = Uuid::new_v4();
        tracker.create(id, None, Some(11));
        let receiver = StreamingReceiver::new(dir.path(), small_blocks());

        let received = receiver
            .receive_stream(chunks(vec![b"hello", b" ", b"world"]), Some(11), id, &tracker)
            .await
            .unwrap();

        assert_eq!(received.byte_count, 11);
        assert_eq!(received.fingerprint, Fingerprint::of(b"hello world"));
        assert_eq!(std::fs::read(&received.temp_path).unwrap(), b"hello world");
        assert_eq!(received.sample, b"hello ");
        assert_eq!(tracker.get(id).unwrap().bytes_received, 11);
    }

    #[tokio::test]
    async fn test_progress_reported_before_stream_ends() {
        let dir = TempDir::new().unwrap();
        let tracker = SessionTracker::new();
        let id = Uuid::new_v4();
        tracker.create(id, None, Some(12));
        let receiver = StreamingReceiver::new(dir.path(), small_blocks());
        let (tx, rx) = futures::channel::mpsc::unbounded::<Result<Bytes, Infallible>>();

        let tracker_ref = &tracker;
        let sender = async move {
            tx.unbounded_send(Ok(Bytes::from_static(b"abcdefgh"))).unwrap();
            let mut seen = 0;
            for _ in 0..200 {
                tokio::time::sleep(Duration::from_millis(5)).await;
                seen = tracker_ref.get(id).unwrap().bytes_received;
                if seen > 0 {
                    break;
                }
            }
            tx.unbounded_send(Ok(Bytes::from_static(b"ijkl"))).unwrap();
            seen
        };

        let (received, mid_upload) =
            tokio::join!(receiver.receive_stream(rx, Some(12), id, &tracker), sender);

        assert!(mid_upload > 0 && mid_upload < 12, "mid-upload progress {}", mid_upload);
        assert_eq!(received.unwrap().byte_count, 12);
        assert_eq!(tracker.get(id).unwrap().bytes_received, 12);
    }

    #[tokio::test]
    async fn test_empty_payload_removes_scratch() {
        let dir = TempDir::new().unwrap();
        let tracker = SessionTracker::new();
        let id = Uuid::new_v4();
        tracker.create(id, None, None);
        let receiver = StreamingReceiver::new(dir.path(), ReceiverSettings::default());

        let result = receiver
            .receive_stream(chunks(vec![]), None, id, &tracker)
            .await;

        assert!(matches!(result, Err(ReceiveError::EmptyPayload)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_body_error_removes_scratch() {
        let dir = TempDir::new().unwrap();
        let tracker = SessionTracker::new();
        let id = Uuid::new_v4();
        let receiver = StreamingReceiver::new(dir.path(), small_blocks());
        let stream = futures::stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err("connection reset"),
        ]);

        let result = receiver.receive_stream(stream, None, id, &tracker).await;

        assert!(matches!(result, Err(ReceiveError::Body(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_receives_use_distinct_scratch_files() {
        let dir = TempDir::new().unwrap();
        let tracker = SessionTracker::new();
        let receiver = StreamingReceiver::new(dir.path(), ReceiverSettings::default());
        let id = Uuid::new_v4();

        let (a, b) = tokio::join!(
            receiver.receive_stream(chunks(vec![b"one"]), None, id, &tracker),
            receiver.receive_stream(chunks(vec![b"two"]), None, id, &tracker),
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_ne!(a.temp_path, b.temp_path);
        assert_eq!(std::fs::read(&a.temp_path).unwrap(), b"one");
        assert_eq!(std::fs::read(&b.temp_path).unwrap(), b"two");
    }

    #[tokio::test]
    async fn test_fingerprint_file_matches_stream() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f.bin");
        std::fs::write(&path, b"test content").unwrap();

        let fp = fingerprint_file(&path).await.unwrap();

        assert_eq!(fp, Fingerprint::of(b"test content"));
    }
}
