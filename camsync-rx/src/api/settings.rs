//! Storage root settings
//!
//! GET/PUT /config/storage-root

use axum::{extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

use crate::{ApiError, ApiResult, AppState};

/// Request and response payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageRootPayload {
    pub storage_root: PathBuf,
}

/// GET /config/storage-root
pub async fn get_storage_root(State(state): State<AppState>) -> Json<StorageRootPayload> {
    Json(StorageRootPayload {
        storage_root: state.ingest.roots().current().as_ref().clone(),
    })
}

/// PUT /config/storage-root
///
/// **Request:** `{"storage_root": "/path/to/photos"}`
///
/// **Errors:**
/// - 400 Bad Request: empty path, or the directory cannot be created
///
/// **Note:** failure to persist `storage.json` logs a warning but the new
/// root is still used for this run
pub async fn set_storage_root(
    State(state): State<AppState>,
    Json(payload): Json<StorageRootPayload>,
) -> ApiResult<Json<StorageRootPayload>> {
    if payload.storage_root.as_os_str().is_empty() {
        return Err(ApiError::BadRequest(
            "storage_root cannot be empty".to_string(),
        ));
    }

    let root = state.ingest.set_storage_root(&payload.storage_root).await?;
    info!(storage_root = %root.display(), "Storage root changed via API");

    Ok(Json(StorageRootPayload {
        storage_root: root.as_ref().clone(),
    }))
}

/// Build settings routes
pub fn settings_routes() -> Router<AppState> {
    Router::new().route(
        "/config/storage-root",
        get(get_storage_root).put(set_storage_root),
    )
}
