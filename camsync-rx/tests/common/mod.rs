//! Shared fixtures for camsync-rx integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use uuid::Uuid;

use camsync_rx::config::ServiceConfig;
use camsync_rx::services::{EncodeError, Encoder, IngestError, IngestOutcome, UploadSource};
use camsync_rx::AppState;

/// Encoder that "converts" by copying the input plus a marker
#[derive(Debug)]
pub struct CopyEncoder;

#[async_trait]
impl Encoder for CopyEncoder {
    fn name(&self) -> &str {
        "copy"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), EncodeError> {
        let mut bytes = tokio::fs::read(input).await?;
        bytes.extend_from_slice(b"\nconverted");
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

/// Encoder whose binary is absent
#[derive(Debug)]
pub struct MissingEncoder;

#[async_trait]
impl Encoder for MissingEncoder {
    fn name(&self) -> &str {
        "missing-ffmpeg"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn transcode(&self, _input: &Path, _output: &Path) -> Result<(), EncodeError> {
        Err(EncodeError::BinaryNotFound("missing-ffmpeg".to_string()))
    }
}

/// Encoder that leaves a partial output behind and fails
#[derive(Debug)]
pub struct FailingEncoder;

#[async_trait]
impl Encoder for FailingEncoder {
    fn name(&self) -> &str {
        "failing"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn transcode(&self, _input: &Path, output: &Path) -> Result<(), EncodeError> {
        tokio::fs::write(output, b"half a movie").await?;
        Err(EncodeError::Failed("moov atom not found".to_string()))
    }
}

/// Service assembled over a temporary storage root
pub struct TestService {
    pub state: AppState,
    pub dir: TempDir,
}

impl TestService {
    pub fn new(encoder: Arc<dyn Encoder>) -> Self {
        let dir = TempDir::new().unwrap();
        let config = ServiceConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            storage_root: dir.path().join("root"),
            config_dir: dir.path().join("config"),
            ffmpeg_path: "unused".to_string(),
            transcode_timeout: std::time::Duration::from_secs(5),
            max_concurrent_transcodes: 2,
        };
        let state = AppState::from_config(&config, encoder).unwrap();
        Self { state, dir }
    }

    pub fn root(&self) -> PathBuf {
        self.state.ingest.roots().current().as_ref().clone()
    }

    /// Upload a raw body as a phone app would
    pub async fn upload(
        &self,
        bytes: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<IngestOutcome, IngestError> {
        self.upload_as(Uuid::new_v4(), bytes, content_type, filename)
            .await
    }

    pub async fn upload_as(
        &self,
        session_id: Uuid,
        bytes: &[u8],
        content_type: Option<&str>,
        filename: Option<&str>,
    ) -> Result<IngestOutcome, IngestError> {
        let source = UploadSource::Raw {
            body: Body::from(bytes.to_vec()),
            content_type: content_type.map(str::to_string),
            filename: filename.map(str::to_string),
        };
        self.state
            .ingest
            .ingest(session_id, source, Some(bytes.len() as u64))
            .await
    }

    /// Wait for background transcodes and index flushes
    pub async fn settle(&self) {
        self.state.ingest.transcoder().wait_idle().await;
        self.state.ingest.index().wait_idle().await;
    }
}

/// Files directly inside `dir`, excluding dotfiles
pub fn visible_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.is_file()
                        && !p
                            .file_name()
                            .map(|n| n.to_string_lossy().starts_with('.'))
                            .unwrap_or(true)
                })
                .collect()
        })
        .unwrap_or_default();
    files.sort();
    files
}

fn ascii_value(s: &str) -> Vec<u8> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

fn ifd_entry(buf: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: u32) {
    buf.extend_from_slice(&tag.to_le_bytes());
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(&count.to_le_bytes());
    buf.extend_from_slice(&value.to_le_bytes());
}

/// Minimal JPEG carrying an EXIF block
///
/// `original` lands in DateTimeOriginal (Exif sub-IFD), `modified` in
/// DateTime (IFD0). `filler` follows the image so callers can make the
/// content unique.
pub fn jpeg_with_exif(original: Option<&str>, modified: Option<&str>, filler: &[u8]) -> Vec<u8> {
    const ASCII: u16 = 2;
    const LONG: u16 = 4;

    let ifd0_count = modified.is_some() as u16 + original.is_some() as u16;
    let ifd0_len = 2 + 12 * ifd0_count as u32 + 4;
    let exif_ifd_offset = 8 + ifd0_len;
    let exif_ifd_len = if original.is_some() { 2 + 12 + 4 } else { 0 };
    let mut data_offset = exif_ifd_offset + exif_ifd_len;

    let mut tiff = b"II\x2a\x00".to_vec();
    tiff.extend_from_slice(&8u32.to_le_bytes());
    let mut data = Vec::new();

    tiff.extend_from_slice(&ifd0_count.to_le_bytes());
    if let Some(modified) = modified {
        let value = ascii_value(modified);
        ifd_entry(&mut tiff, 0x0132, ASCII, value.len() as u32, data_offset);
        data_offset += value.len() as u32;
        data.extend(value);
    }
    if original.is_some() {
        ifd_entry(&mut tiff, 0x8769, LONG, 1, exif_ifd_offset);
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());

    if let Some(original) = original {
        tiff.extend_from_slice(&1u16.to_le_bytes());
        let value = ascii_value(original);
        ifd_entry(&mut tiff, 0x9003, ASCII, value.len() as u32, data_offset);
        data.extend(value);
        tiff.extend_from_slice(&0u32.to_le_bytes());
    }
    tiff.extend(data);

    let mut app1 = b"Exif\0\0".to_vec();
    app1.extend(tiff);

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    jpeg.extend_from_slice(&((app1.len() + 2) as u16).to_be_bytes());
    jpeg.extend(app1);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg.extend_from_slice(filler);
    jpeg
}
