//! Storage placement policy
//!
//! Decides where an upload lands: `<root>/<YYYY>/<name>`. The year comes
//! from the image's EXIF capture date when one can be read, otherwise from
//! the wall clock at upload time. Names come from the client when supplied,
//! otherwise they are synthesized from content kind and timestamp.

use chrono::{Datelike, NaiveDateTime};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use camsync_common::time::{filename_stamp, local_now, parse_exif_datetime};

use crate::services::StorageRootStore;

/// Coarse upload classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Image,
    Video,
    Other,
}

impl ContentKind {
    /// Classify from the declared content type, falling back to the extension
    pub fn classify(content_type: Option<&str>, filename: Option<&str>) -> Self {
        if let Some(essence) = content_type.map(mime_essence) {
            if essence.starts_with("image/") {
                return ContentKind::Image;
            }
            if essence.starts_with("video/") {
                return ContentKind::Video;
            }
        }

        let ext = filename
            .and_then(|name| Path::new(name).extension())
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase());
        match ext.as_deref() {
            Some("jpg" | "jpeg" | "png" | "heic" | "heif" | "gif" | "webp" | "tif" | "tiff"
            | "dng") => ContentKind::Image,
            Some("mov" | "mp4" | "m4v" | "3gp" | "avi" | "mkv" | "webm") => ContentKind::Video,
            _ => ContentKind::Other,
        }
    }

    /// Prefix for synthesized names
    pub fn prefix(&self) -> &'static str {
        match self {
            ContentKind::Image => "image",
            ContentKind::Video => "video",
            ContentKind::Other => "file",
        }
    }

    /// Extension used when the content type is unknown
    pub fn default_extension(&self) -> &'static str {
        match self {
            ContentKind::Image => "jpg",
            ContentKind::Video => "mp4",
            ContentKind::Other => "bin",
        }
    }
}

/// `type/subtype` without parameters, lowercased
fn mime_essence(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// File extension for a content type, if it is one we know
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let ext = match mime_essence(content_type).as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/heic" => "heic",
        "image/heif" => "heif",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/tiff" => "tiff",
        "image/x-adobe-dng" => "dng",
        "video/quicktime" => "mov",
        "video/mp4" => "mp4",
        "video/x-m4v" => "m4v",
        "video/3gpp" => "3gp",
        "video/webm" => "webm",
        "video/x-msvideo" => "avi",
        "video/x-matroska" => "mkv",
        "application/octet-stream" => "bin",
        "application/pdf" => "pdf",
        "application/zip" => "zip",
        "text/plain" => "txt",
        _ => return None,
    };
    Some(ext)
}

/// EXIF tags consulted for the capture date, most specific first
const DATE_TAGS: [exif::Tag; 3] = [
    exif::Tag::DateTimeOriginal,
    exif::Tag::DateTimeDigitized,
    exif::Tag::DateTime,
];

/// Read the EXIF capture date from leading image bytes
pub fn exif_capture_date(sample: &[u8]) -> Option<NaiveDateTime> {
    let exif = match exif::Reader::new().read_from_container(&mut Cursor::new(sample)) {
        Ok(exif) => exif,
        Err(e) => {
            tracing::debug!(error = %e, "No readable EXIF block");
            return None;
        }
    };

    DATE_TAGS.iter().find_map(|tag| {
        let field = exif.get_field(*tag, exif::In::PRIMARY)?;
        let exif::Value::Ascii(ref values) = field.value else {
            return None;
        };
        let raw = values.first()?;
        let parsed = parse_exif_datetime(&String::from_utf8_lossy(raw));
        if parsed.is_some() {
            tracing::debug!(tag = %tag, "Capture date from EXIF");
        }
        parsed
    })
}

/// Date that decides the storage bucket
///
/// Images use their EXIF capture date when available; everything else,
/// and images without a usable date, use the current local time.
pub fn determine_date(sample: &[u8], kind: ContentKind) -> NaiveDateTime {
    if kind == ContentKind::Image {
        if let Some(date) = exif_capture_date(sample) {
            return date;
        }
    }
    local_now()
}

/// Keep only the final path component of a client-supplied name
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let last = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '\0');
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.chars().filter(|c| !c.is_control()).collect())
}

/// Final file name: the client's, or `<prefix>_<timestamp>.<ext>`
pub fn name_file(
    explicit: Option<&str>,
    kind: ContentKind,
    content_type: Option<&str>,
    timestamp: &NaiveDateTime,
) -> String {
    if let Some(name) = explicit.and_then(sanitize_filename) {
        return name;
    }

    let ext = match content_type {
        Some(ct) => extension_for(ct)
            .map(str::to_string)
            .or_else(|| subtype_extension(ct))
            .unwrap_or_else(|| kind.default_extension().to_string()),
        None => kind.default_extension().to_string(),
    };
    format!("{}_{}.{}", kind.prefix(), filename_stamp(timestamp), ext)
}

/// Subtype of an unlisted content type (`image/x-foo` -> `x-foo`)
fn subtype_extension(content_type: &str) -> Option<String> {
    let essence = mime_essence(content_type);
    let (_, sub) = essence.split_once('/')?;
    let valid = !sub.is_empty()
        && sub
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.'));
    valid.then(|| sub.to_string())
}

/// `name (n).ext` for the n-th collision
pub(crate) fn collision_name(name: &str, n: u32) -> String {
    if n == 0 {
        return name.to_string();
    }
    let path = Path::new(name);
    match (path.file_stem(), path.extension()) {
        (Some(stem), Some(ext)) => format!(
            "{} ({}).{}",
            stem.to_string_lossy(),
            n,
            ext.to_string_lossy()
        ),
        _ => format!("{} ({})", name, n),
    }
}

/// Move a scratch file to `<bucket>/<name>` without overwriting anything
///
/// An existing file of the same name gets a ` (n)` suffix on the new one.
/// Hard-linking claims the name atomically; filesystems without hard links
/// (or a scratch dir on another device) fall back to an exclusive create
/// plus copy.
pub async fn place_file(temp: &Path, bucket: &Path, name: &str) -> std::io::Result<PathBuf> {
    for n in 0..10_000u32 {
        let candidate = bucket.join(collision_name(name, n));

        match tokio::fs::hard_link(temp, &candidate).await {
            Ok(()) => {
                tokio::fs::remove_file(temp).await?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Hard link unavailable, copying into place");
            }
        }

        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(mut dest) => {
                let mut src = tokio::fs::File::open(temp).await?;
                if let Err(e) = tokio::io::copy(&mut src, &mut dest).await {
                    drop(dest);
                    let _ = tokio::fs::remove_file(&candidate).await;
                    return Err(e);
                }
                dest.sync_all().await?;
                tokio::fs::remove_file(temp).await?;
                return Ok(candidate);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }

    Err(std::io::Error::new(
        std::io::ErrorKind::AlreadyExists,
        format!("No free name for {} in {}", name, bucket.display()),
    ))
}

/// Placement decisions bound to the live storage root
#[derive(Debug, Clone)]
pub struct PlacementPolicy {
    roots: Arc<StorageRootStore>,
}

impl PlacementPolicy {
    pub fn new(roots: Arc<StorageRootStore>) -> Self {
        Self { roots }
    }

    /// `<root>/<YYYY>` for `date`, created if absent
    pub async fn bucket_path(&self, date: &NaiveDateTime) -> std::io::Result<PathBuf> {
        let root = self
            .roots
            .get()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;
        let bucket = root.join(format!("{:04}", date.year()));
        tokio::fs::create_dir_all(&bucket).await?;
        Ok(bucket)
    }

    /// Current storage root (for scratch space and the index file)
    pub fn root(&self) -> Arc<PathBuf> {
        self.roots.current()
    }
}
