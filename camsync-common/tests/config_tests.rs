//! Configuration resolution and graceful degradation
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate CAMSYNC_STORAGE_ROOT or CAMSYNC_CONFIG_DIR are
//! marked with #[serial] so they run sequentially, not in parallel.

use camsync_common::config::{
    default_storage_root, load_toml_config, resolve_config_dir, resolve_storage_root, TomlConfig,
    ENV_CONFIG_DIR, ENV_STORAGE_ROOT,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
#[serial]
fn test_storage_root_defaults_when_nothing_configured() {
    env::remove_var(ENV_STORAGE_ROOT);

    let root = resolve_storage_root(None, &TomlConfig::default());

    assert_eq!(root, default_storage_root());
    assert!(!root.as_os_str().is_empty());
}

#[test]
#[serial]
fn test_env_var_beats_toml() {
    env::set_var(ENV_STORAGE_ROOT, "/tmp/camsync-env-root");
    let toml = TomlConfig {
        storage_root: Some(PathBuf::from("/tmp/camsync-toml-root")),
        ..Default::default()
    };

    let root = resolve_storage_root(None, &toml);
    env::remove_var(ENV_STORAGE_ROOT);

    assert_eq!(root, PathBuf::from("/tmp/camsync-env-root"));
}

#[test]
#[serial]
fn test_cli_beats_env_var() {
    env::set_var(ENV_CONFIG_DIR, "/tmp/camsync-env-config");

    let dir = resolve_config_dir(Some(Path::new("/tmp/camsync-cli-config")), &TomlConfig::default());
    env::remove_var(ENV_CONFIG_DIR);

    assert_eq!(dir, PathBuf::from("/tmp/camsync-cli-config"));
}

#[test]
#[serial]
fn test_toml_used_when_env_unset() {
    env::remove_var(ENV_CONFIG_DIR);
    let toml = TomlConfig {
        config_dir: Some(PathBuf::from("/srv/camsync/etc")),
        ..Default::default()
    };

    assert_eq!(resolve_config_dir(None, &toml), PathBuf::from("/srv/camsync/etc"));
}

#[test]
fn test_missing_explicit_file_degrades_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("nope.toml");

    let config = TomlConfig::load_or_default(Some(&missing));

    assert_eq!(config, TomlConfig::default());
}

#[test]
fn test_malformed_file_degrades_to_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(load_toml_config(&path).is_err());
    assert_eq!(TomlConfig::load_or_default(Some(&path)), TomlConfig::default());
}

#[test]
fn test_full_file_is_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
host = "0.0.0.0"
port = 5001
storage_root = "/srv/photos"

[logging]
level = "debug"

[transcode]
ffmpeg_path = "/usr/local/bin/ffmpeg"
timeout_secs = 120
max_concurrent = 4
"#,
    )
    .unwrap();

    let config = TomlConfig::load_or_default(Some(&path));

    assert_eq!(config.host.as_deref(), Some("0.0.0.0"));
    assert_eq!(config.storage_root, Some(PathBuf::from("/srv/photos")));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.transcode.ffmpeg_path, "/usr/local/bin/ffmpeg");
    assert_eq!(config.transcode.max_concurrent, 4);
}
