//! camsync-rx library interface
//!
//! Exposes the upload pipeline and router for the binary and for
//! integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::ServiceConfig;
use crate::services::{
    DedupIndex, Encoder, FfmpegEncoder, IngestService, ReceiverSettings, SessionTracker,
    StorageRootStore, TranscodeQueue,
};

/// Application state shared across handlers
#[derive(Debug, Clone)]
pub struct AppState {
    /// Upload pipeline and the services it owns
    pub ingest: IngestService,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(ingest: IngestService) -> Self {
        Self {
            ingest,
            startup_time: Utc::now(),
        }
    }

    /// Assemble services from resolved settings
    ///
    /// Must run inside a Tokio runtime: the dedup index starts its flusher
    /// task here.
    pub fn from_config(
        config: &ServiceConfig,
        encoder: Arc<dyn Encoder>,
    ) -> camsync_common::Result<Self> {
        let roots = Arc::new(StorageRootStore::load(
            &config.config_dir,
            config.storage_root.clone(),
        ));
        let root = roots.get()?;
        let index = DedupIndex::open_in(&root);
        let sessions = SessionTracker::new();
        let transcoder = TranscodeQueue::new(
            encoder,
            index.clone(),
            sessions.clone(),
            config.max_concurrent_transcodes,
        );

        Ok(Self::new(IngestService::new(
            roots,
            index,
            sessions,
            transcoder,
            ReceiverSettings::default(),
        )))
    }

    /// Default encoder for a resolved config
    pub fn ffmpeg_encoder(config: &ServiceConfig) -> Arc<dyn Encoder> {
        Arc::new(FfmpegEncoder::new(
            config.ffmpeg_path.clone(),
            config.transcode_timeout,
        ))
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::upload_routes())
        .merge(api::progress_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
