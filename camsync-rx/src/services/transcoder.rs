//! Background normalization of QuickTime uploads
//!
//! `.mov` uploads are re-encoded to H.264/AAC MP4 by an external encoder on
//! a bounded worker pool. The upload response has already been sent when a
//! job starts; its outcome is visible only through the session tracker:
//!
//! - success: original deleted, both the original and the output
//!   fingerprints map to the MP4, session `converted` then `completed`
//! - encoder missing: original kept and indexed, session
//!   `encoder_not_found` then `completed_no_conversion` with a warning
//! - encoder error or timeout: original kept and indexed, session
//!   `conversion_failed`

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::models::{Fingerprint, SessionUpdate, UploadStatus};
use crate::services::placement::collision_name;
use crate::services::receiver::fingerprint_file;
use crate::services::{DedupIndex, Durability, SessionTracker};

/// Extension of transcoded output
pub const OUTPUT_EXTENSION: &str = "mp4";

/// Encoder errors
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Encoder binary not found
    #[error("Encoder binary not found: {0}")]
    BinaryNotFound(String),

    /// Encoder ran and reported failure
    #[error("Encoder failed: {0}")]
    Failed(String),

    /// Encoder exceeded its wall-clock limit and was killed
    #[error("Encoder timed out after {0:?}")]
    Timeout(Duration),

    /// Spawn or filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// External video encoder
#[async_trait]
pub trait Encoder: Send + Sync + std::fmt::Debug {
    /// Human-readable name for logs and warnings
    fn name(&self) -> &str;

    /// Whether the encoder can be invoked at all
    fn is_available(&self) -> bool;

    /// Re-encode `input` into `output`, overwriting `output`
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), EncodeError>;
}

/// ffmpeg invoked as a child process
#[derive(Debug, Clone)]
pub struct FfmpegEncoder {
    program: String,
    timeout: Duration,
}

impl FfmpegEncoder {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Fixed argument set: H.264 + AAC, speed-oriented preset, all cores
    fn arguments(input: &Path, output: &Path) -> Vec<std::ffi::OsString> {
        let mut args: Vec<std::ffi::OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i"]
            .iter()
            .map(Into::into)
            .collect();
        args.push(input.as_os_str().to_owned());
        args.extend(
            [
                "-c:v", "libx264", "-preset", "veryfast", "-crf", "23", "-c:a", "aac",
                "-b:a", "160k", "-threads", "0", "-movflags", "+faststart",
            ]
            .iter()
            .map(Into::into),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Encoder for FfmpegEncoder {
    fn name(&self) -> &str {
        &self.program
    }

    fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), EncodeError> {
        let program = which::which(&self.program)
            .map_err(|_| EncodeError::BinaryNotFound(self.program.clone()))?;

        tracing::debug!(
            encoder = %program.display(),
            input = %input.display(),
            output = %output.display(),
            "Running encoder"
        );

        let child = tokio::process::Command::new(&program)
            .args(Self::arguments(input, output))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on timeout drops the child, which kills it
        let result = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(EncodeError::Timeout(self.timeout)),
        };

        if result.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&result.stderr);
            Err(EncodeError::Failed(format!(
                "Exit code: {:?}, stderr: {}",
                result.status.code(),
                stderr.trim()
            )))
        }
    }
}

/// Whether an upload is the legacy container that gets normalized
pub fn needs_transcode(path: &Path, content_type: Option<&str>) -> bool {
    let is_mov = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("mov"))
        .unwrap_or(false);
    let is_quicktime = content_type
        .map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .eq_ignore_ascii_case("video/quicktime")
        })
        .unwrap_or(false);
    is_mov || is_quicktime
}

/// Free `<stem>.mp4` path next to `source`
async fn output_path_for(source: &Path) -> PathBuf {
    let dir = source.parent().unwrap_or_else(|| Path::new("."));
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let base = format!("{}.{}", stem, OUTPUT_EXTENSION);

    let mut n = 0;
    loop {
        let candidate = dir.join(collision_name(&base, n));
        if candidate != source && !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}

/// One placed file awaiting normalization
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub session_id: Uuid,
    pub source: PathBuf,
    pub fingerprint: Fingerprint,
}

/// Bounded pool of detached transcode workers
#[derive(Debug, Clone)]
pub struct TranscodeQueue {
    encoder: Arc<dyn Encoder>,
    index: DedupIndex,
    sessions: SessionTracker,
    permits: Arc<Semaphore>,
    tasks: TaskTracker,
}

impl TranscodeQueue {
    pub fn new(
        encoder: Arc<dyn Encoder>,
        index: DedupIndex,
        sessions: SessionTracker,
        max_concurrent: usize,
    ) -> Self {
        Self {
            encoder,
            index,
            sessions,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tasks: TaskTracker::new(),
        }
    }

    /// Start a detached job; returns immediately
    pub fn submit(&self, job: TranscodeJob) {
        let queue = self.clone();
        tracing::info!(
            session_id = %job.session_id,
            source = %job.source.display(),
            "Transcode scheduled"
        );
        self.tasks.spawn(async move {
            let Ok(_permit) = queue.permits.clone().acquire_owned().await else {
                return;
            };
            queue.run(job).await;
        });
    }

    /// Jobs submitted and not yet finished
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every submitted job has finished
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    async fn run(&self, job: TranscodeJob) {
        let TranscodeJob {
            session_id,
            source,
            fingerprint,
        } = job;

        if !self.encoder.is_available() {
            let warning = format!(
                "Encoder '{}' not found; stored original without conversion",
                self.encoder.name()
            );
            tracing::warn!(session_id = %session_id, source = %source.display(), "{}", warning);
            self.sessions.transition(
                session_id,
                UploadStatus::EncoderNotFound,
                SessionUpdate::warning(warning.clone()),
            );
            self.index
                .record(fingerprint, source.clone(), Durability::Immediate)
                .await;
            self.sessions.transition(
                session_id,
                UploadStatus::CompletedNoConversion,
                SessionUpdate::path(source),
            );
            return;
        }

        let output = output_path_for(&source).await;
        let started = std::time::Instant::now();
        let result = match self.encoder.transcode(&source, &output).await {
            Ok(()) => match tokio::fs::metadata(&output).await {
                Ok(meta) if meta.len() > 0 => Ok(()),
                _ => Err(EncodeError::Failed("Encoder produced no output".to_string())),
            },
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => self.finish_success(session_id, source, output, fingerprint, started).await,
            Err(e) => {
                tracing::error!(
                    session_id = %session_id,
                    source = %source.display(),
                    error = %e,
                    "Transcode failed; keeping original"
                );
                let _ = tokio::fs::remove_file(&output).await;
                self.index
                    .record(fingerprint, source.clone(), Durability::Immediate)
                    .await;
                self.sessions.transition(
                    session_id,
                    UploadStatus::ConversionFailed,
                    SessionUpdate {
                        path: Some(source),
                        error: Some(e.to_string()),
                        ..Default::default()
                    },
                );
            }
        }
    }

    async fn finish_success(
        &self,
        session_id: Uuid,
        source: PathBuf,
        output: PathBuf,
        original: Fingerprint,
        started: std::time::Instant,
    ) {
        self.sessions
            .transition(session_id, UploadStatus::Converted, SessionUpdate::path(&output));

        if let Err(e) = tokio::fs::remove_file(&source).await {
            tracing::warn!(source = %source.display(), error = %e, "Failed to remove original after transcode");
        }

        match fingerprint_file(&output).await {
            Ok(converted) => {
                self.index
                    .record(original, output.clone(), Durability::Deferred)
                    .await;
                self.index
                    .record(converted, output.clone(), Durability::Immediate)
                    .await;
            }
            Err(e) => {
                tracing::warn!(output = %output.display(), error = %e, "Failed to fingerprint transcoded file");
                self.index
                    .record(original, output.clone(), Durability::Immediate)
                    .await;
            }
        }

        let filename = output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        tracing::info!(
            session_id = %session_id,
            output = %output.display(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcode completed"
        );
        self.sessions.transition(
            session_id,
            UploadStatus::Completed,
            SessionUpdate::path(output).with_filename(filename),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_needs_transcode() {
        assert!(needs_transcode(Path::new("/r/2024/IMG_1.MOV"), None));
        assert!(needs_transcode(Path::new("/r/2024/clip"), Some("video/quicktime")));
        assert!(!needs_transcode(Path::new("/r/2024/clip.mp4"), Some("video/mp4")));
        assert!(!needs_transcode(Path::new("/r/2024/a.jpg"), Some("image/jpeg")));
    }

    #[test]
    fn test_ffmpeg_arguments() {
        let args = FfmpegEncoder::arguments(Path::new("in.mov"), Path::new("out.mp4"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();

        assert!(args.contains(&"-y".to_string()));
        assert!(args.windows(2).any(|w| w == ["-c:v", "libx264"]));
        assert!(args.windows(2).any(|w| w == ["-c:a", "aac"]));
        assert!(args.windows(2).any(|w| w == ["-threads", "0"]));
        assert!(args.windows(2).any(|w| w == ["-i", "in.mov"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[tokio::test]
    async fn test_output_path_avoids_existing_file() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("clip.mov");
        std::fs::write(&source, b"mov").unwrap();
        std::fs::write(dir.path().join("clip.mp4"), b"someone else").unwrap();

        let output = output_path_for(&source).await;

        assert_eq!(output, dir.path().join("clip (1).mp4"));
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let encoder = FfmpegEncoder::new("camsync-no-such-encoder", Duration::from_secs(1));
        assert!(!encoder.is_available());
    }

    #[cfg(unix)]
    fn script(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-encoder.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_timeout_kills_encoder() {
        let dir = TempDir::new().unwrap();
        let encoder = FfmpegEncoder::new(script(dir.path(), "sleep 30"), Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = encoder
            .transcode(&dir.path().join("in.mov"), &dir.path().join("out.mp4"))
            .await;

        assert!(matches!(result, Err(EncodeError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_ffmpeg_nonzero_exit_is_failure() {
        let dir = TempDir::new().unwrap();
        let encoder = FfmpegEncoder::new(
            script(dir.path(), "echo 'bad input' >&2; exit 3"),
            Duration::from_secs(10),
        );

        let result = encoder
            .transcode(&dir.path().join("in.mov"), &dir.path().join("out.mp4"))
            .await;

        match result {
            Err(EncodeError::Failed(msg)) => assert!(msg.contains("bad input")),
            other => panic!("Expected Failed, got {:?}", other),
        }
    }
}
