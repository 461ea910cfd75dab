//! camsync-rx - device backup receiver
//!
//! Accepts photo and video uploads over HTTP, drops byte-identical
//! duplicates, files the rest into `<root>/<YYYY>/` and converts QuickTime
//! movies to mp4 in the background.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use camsync_common::config::TomlConfig;
use camsync_rx::config::{CliOverrides, ServiceConfig};
use camsync_rx::services::Encoder;
use camsync_rx::AppState;

/// Command line arguments
#[derive(Debug, Parser)]
#[command(name = "camsync-rx", version, about = "Device backup upload receiver")]
struct Args {
    /// TOML bootstrap config (default: ~/.config/camsync/config.toml)
    #[arg(long, env = "CAMSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long, env = "CAMSYNC_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(long, env = "CAMSYNC_PORT")]
    port: Option<u16>,

    /// Initial storage root (a saved storage.json takes precedence)
    #[arg(long)]
    storage_root: Option<PathBuf>,

    /// Directory holding storage.json
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Encoder binary name or path
    #[arg(long, env = "CAMSYNC_FFMPEG")]
    ffmpeg: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml = TomlConfig::load_or_default(args.config.as_deref());

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&toml.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting camsync-rx (upload receiver)");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let cli = CliOverrides {
        host: args.host,
        port: args.port,
        storage_root: args.storage_root,
        config_dir: args.config_dir,
        ffmpeg_path: args.ffmpeg,
    };
    let config = ServiceConfig::resolve(&cli, &toml);

    let encoder = AppState::ffmpeg_encoder(&config);
    if !encoder.is_available() {
        tracing::warn!(
            encoder = %config.ffmpeg_path,
            "Encoder not found; .mov uploads will be stored unconverted"
        );
    }

    let state = AppState::from_config(&config, encoder)
        .context("Failed to initialize storage")?;
    info!("Storage root: {}", state.ingest.roots().current().display());
    info!("Config dir: {}", config.config_dir.display());

    let app = camsync_rx::build_router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
