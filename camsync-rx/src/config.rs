//! Service settings resolved at startup
//!
//! Path settings follow CLI > ENV > TOML > OS default (see
//! `camsync_common::config`). Host and port arrive through clap, which
//! already folds in `CAMSYNC_HOST`/`CAMSYNC_PORT`, and fall back to TOML.

use camsync_common::config::{resolve_config_dir, resolve_storage_root, TomlConfig, DEFAULT_PORT};
use std::path::PathBuf;
use std::time::Duration;

/// Default listen address; phones on the LAN upload to this host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Values supplied on the command line (or via clap's env fallback)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub storage_root: Option<PathBuf>,
    pub config_dir: Option<PathBuf>,
    pub ffmpeg_path: Option<String>,
}

/// Fully resolved settings for one service run
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Initial storage root; a persisted `storage.json` takes precedence
    pub storage_root: PathBuf,
    pub config_dir: PathBuf,
    pub ffmpeg_path: String,
    pub transcode_timeout: Duration,
    pub max_concurrent_transcodes: usize,
}

impl ServiceConfig {
    pub fn resolve(cli: &CliOverrides, toml: &TomlConfig) -> Self {
        Self {
            host: cli
                .host
                .clone()
                .or_else(|| toml.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: cli.port.or(toml.port).unwrap_or(DEFAULT_PORT),
            storage_root: resolve_storage_root(cli.storage_root.as_deref(), toml),
            config_dir: resolve_config_dir(cli.config_dir.as_deref(), toml),
            ffmpeg_path: cli
                .ffmpeg_path
                .clone()
                .unwrap_or_else(|| toml.transcode.ffmpeg_path.clone()),
            transcode_timeout: Duration::from_secs(toml.transcode.timeout_secs.max(1)),
            max_concurrent_transcodes: toml.transcode.max_concurrent.max(1),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_beats_toml() {
        let toml = TomlConfig {
            host: Some("127.0.0.1".into()),
            port: Some(6000),
            storage_root: Some(PathBuf::from("/toml/root")),
            config_dir: Some(PathBuf::from("/toml/config")),
            ..Default::default()
        };
        let cli = CliOverrides {
            port: Some(7000),
            storage_root: Some(PathBuf::from("/cli/root")),
            ..Default::default()
        };

        let config = ServiceConfig::resolve(&cli, &toml);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 7000);
        assert_eq!(config.storage_root, PathBuf::from("/cli/root"));
        assert_eq!(config.bind_addr(), "127.0.0.1:7000");
    }

    #[test]
    fn test_defaults() {
        let toml = TomlConfig::default();
        let config = ServiceConfig::resolve(&CliOverrides::default(), &toml);
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.transcode_timeout, Duration::from_secs(600));
        assert_eq!(config.max_concurrent_transcodes, 2);
    }
}
