//! Bootstrap configuration loading and root folder resolution
//!
//! Bootstrap settings come from a TOML file and cannot change while the
//! service runs. The storage root is the one exception: the value resolved
//! here is only the initial default, the running service keeps its own
//! hot-swappable copy.
//!
//! Resolution priority for each setting:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the storage root
pub const ENV_STORAGE_ROOT: &str = "CAMSYNC_STORAGE_ROOT";

/// Environment variable overriding the config directory
pub const ENV_CONFIG_DIR: &str = "CAMSYNC_CONFIG_DIR";

/// Default HTTP port (matches the legacy receiver)
pub const DEFAULT_PORT: u16 = 5001;

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Bind address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// HTTP server port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Initial storage root, used until a runtime value is persisted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_root: Option<PathBuf>,

    /// Directory holding the runtime storage config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_dir: Option<PathBuf>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Background transcoding
    #[serde(default)]
    pub transcode: TranscodeConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// External encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeConfig {
    /// Encoder binary name or path
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Hard wall-clock limit per job
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Concurrent transcode jobs
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            timeout_secs: default_timeout_secs(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_timeout_secs() -> u64 {
    600
}

fn default_max_concurrent() -> usize {
    2
}

impl TomlConfig {
    /// Load the bootstrap config, degrading to defaults when missing
    ///
    /// A missing file is not an error. A file that exists but fails to
    /// parse is logged and ignored so the service still starts.
    pub fn load_or_default(explicit: Option<&Path>) -> Self {
        let path = match explicit.map(Path::to_path_buf).or_else(default_config_file) {
            Some(path) => path,
            None => {
                info!("No TOML config file found, using built-in defaults");
                return Self::default();
            }
        };

        match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded TOML config: {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring TOML config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    Ok(toml::from_str(&content)?)
}

/// Write a TOML config file atomically
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;
    crate::fs::write_atomic(path, content.as_bytes())
}

/// First existing config file for the platform
///
/// Linux checks `~/.config/camsync/config.toml` then
/// `/etc/camsync/config.toml`; other platforms only the user config dir.
pub fn default_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("camsync").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/camsync/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve a path setting through CLI > ENV > TOML > compiled default
pub fn resolve_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    toml_value: Option<&Path>,
    default: impl FnOnce() -> PathBuf,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default()
}

/// Initial storage root
pub fn resolve_storage_root(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    resolve_path(
        cli_arg,
        ENV_STORAGE_ROOT,
        toml.storage_root.as_deref(),
        default_storage_root,
    )
}

/// Directory for runtime config (storage.json)
pub fn resolve_config_dir(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    resolve_path(
        cli_arg,
        ENV_CONFIG_DIR,
        toml.config_dir.as_deref(),
        default_config_dir,
    )
}

/// OS-dependent default storage root (`~/Pictures/camsync` when known)
pub fn default_storage_root() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .map(|d| d.join("camsync"))
        .unwrap_or_else(|| PathBuf::from("./camsync_data"))
}

/// OS-dependent default config directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("camsync"))
        .unwrap_or_else(|| PathBuf::from("./camsync_config"))
}
