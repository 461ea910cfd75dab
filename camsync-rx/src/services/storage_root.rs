//! Hot-swappable storage root
//!
//! The current root lives behind an `RwLock<Arc<PathBuf>>`: readers clone
//! the `Arc` and release the lock immediately, so a placement that already
//! resolved its bucket keeps using the old root after a swap. The value is
//! persisted to `<config_dir>/storage.json` with the same atomic-replace
//! helper as the dedup index.

use camsync_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// File name of the runtime storage config
pub const STORAGE_CONFIG_FILE: &str = "storage.json";

/// Persisted runtime storage settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub storage_root: PathBuf,
}

/// Process-wide storage root reference
#[derive(Debug)]
pub struct StorageRootStore {
    root: RwLock<Arc<PathBuf>>,
    config_path: PathBuf,
}

impl StorageRootStore {
    /// Load the persisted root from `config_dir`, or fall back to `default_root`
    pub fn load(config_dir: &Path, default_root: PathBuf) -> Self {
        let config_path = make_absolute(config_dir.join(STORAGE_CONFIG_FILE));
        let root = match read_storage_config(&config_path) {
            Ok(Some(config)) => {
                info!(
                    root = %config.storage_root.display(),
                    config = %config_path.display(),
                    "Storage root loaded from runtime config"
                );
                config.storage_root
            }
            Ok(None) => {
                info!(root = %default_root.display(), "No runtime storage config, using default root");
                default_root
            }
            Err(e) => {
                warn!(
                    config = %config_path.display(),
                    error = %e,
                    "Unreadable runtime storage config, using default root"
                );
                default_root
            }
        };

        Self {
            root: RwLock::new(Arc::new(make_absolute(root))),
            config_path,
        }
    }

    /// Current root without touching the filesystem
    pub fn current(&self) -> Arc<PathBuf> {
        match self.root.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Current root, created if absent
    pub fn get(&self) -> Result<Arc<PathBuf>> {
        let root = self.current();
        std::fs::create_dir_all(root.as_path())?;
        Ok(root)
    }

    /// Validate, persist, then swap in a new root
    ///
    /// The root must be creatable; an uncreatable path is rejected before
    /// anything changes. A failed config write is logged and the swap still
    /// happens, the running process stays authoritative.
    pub fn set(&self, new_root: &Path) -> Result<Arc<PathBuf>> {
        if new_root.as_os_str().is_empty() {
            return Err(Error::InvalidInput("Storage root must not be empty".to_string()));
        }

        std::fs::create_dir_all(new_root).map_err(|e| {
            Error::InvalidInput(format!(
                "Storage root {} is not creatable: {}",
                new_root.display(),
                e
            ))
        })?;
        let resolved = new_root.canonicalize()?;

        let config = StorageConfig {
            storage_root: resolved.clone(),
        };
        if let Err(e) = camsync_common::fs::write_json_atomic(&self.config_path, &config) {
            warn!(
                config = %self.config_path.display(),
                error = %e,
                "Failed to persist storage root; change applies to this process only"
            );
        }

        let resolved = Arc::new(resolved);
        match self.root.write() {
            Ok(mut guard) => *guard = Arc::clone(&resolved),
            Err(poisoned) => *poisoned.into_inner() = Arc::clone(&resolved),
        }

        info!(root = %resolved.display(), "Storage root changed");
        Ok(resolved)
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}

/// Anchor a relative path at the working directory it was configured from
///
/// Index entries and placed paths derive from the root and must stay
/// valid after the process changes directory.
fn make_absolute(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::path::absolute(&path) {
        Ok(resolved) => {
            info!(from = %path.display(), to = %resolved.display(), "Resolved relative path");
            resolved
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot resolve relative path");
            path
        }
    }
}

fn read_storage_config(path: &Path) -> Result<Option<StorageConfig>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}
