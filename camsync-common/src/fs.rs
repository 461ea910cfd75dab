//! Atomic file replacement
//!
//! Every persisted file (dedup index, storage config, bootstrap TOML) is
//! written to a uniquely named sibling temp file, synced, then renamed over
//! the target. Readers therefore observe either the previous complete
//! content or the new complete content, never a partial write.

use crate::{Error, Result};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A fully written temp file waiting to replace its target
///
/// Dropping a `StagedWrite` without calling [`StagedWrite::commit`] removes
/// the temp file and leaves the target untouched.
#[derive(Debug)]
pub struct StagedWrite {
    temp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedWrite {
    /// Path of the staged temp file
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Atomically replace the target with the staged content
    pub fn commit(mut self) -> Result<()> {
        fs::rename(&self.temp_path, &self.target)?;
        self.committed = true;
        sync_parent_dir(&self.target);
        debug!(target = %self.target.display(), "Atomic replace committed");
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

/// Temp path beside `target`, unique per call so concurrent writers never
/// share a scratch file
pub fn sibling_temp_path(target: &Path) -> PathBuf {
    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    target.with_file_name(format!(".{}.tmp-{}", file_name, uuid::Uuid::new_v4().simple()))
}

/// Write `bytes` to a synced temp file next to `target` without replacing it
pub fn stage_atomic(target: &Path, bytes: &[u8]) -> Result<StagedWrite> {
    let parent = target
        .parent()
        .ok_or_else(|| Error::InvalidInput(format!("No parent directory: {}", target.display())))?;
    fs::create_dir_all(parent)?;

    let temp_path = sibling_temp_path(target);
    let staged = StagedWrite {
        temp_path,
        target: target.to_path_buf(),
        committed: false,
    };

    let mut file = create_private(&staged.temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;

    Ok(staged)
}

/// Write `bytes` to `target` via temp file + rename
pub fn write_atomic(target: &Path, bytes: &[u8]) -> Result<()> {
    stage_atomic(target, bytes)?.commit()
}

/// Serialize `value` as pretty JSON and write it atomically
pub fn write_json_atomic<T: Serialize + ?Sized>(target: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(target, &json)
}

#[cfg(unix)]
fn create_private(path: &Path) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)?)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().write(true).create_new(true).open(path)?)
}

/// Best-effort directory sync so the rename itself survives a crash
#[cfg(unix)]
fn sync_parent_dir(target: &Path) {
    if let Some(parent) = target.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_target: &Path) {}
