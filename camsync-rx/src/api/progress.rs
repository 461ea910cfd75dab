//! Upload progress polling

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::models::UploadSession;
use crate::{ApiError, ApiResult, AppState};

/// Session snapshot plus a derived percentage
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    #[serde(flatten)]
    pub session: UploadSession,
    /// Absent while the total size is unknown
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
}

/// GET /progress/:session_id
///
/// **Errors:** 404 when the session is unknown (never created, or removed
/// after an empty upload).
pub async fn get_progress(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ProgressResponse>> {
    let session = state
        .ingest
        .sessions()
        .get(session_id)
        .ok_or_else(|| ApiError::NotFound(format!("Session not found: {}", session_id)))?;

    Ok(Json(ProgressResponse {
        percent: session.percent(),
        session,
    }))
}

/// Build progress routes
pub fn progress_routes() -> Router<AppState> {
    Router::new().route("/progress/:session_id", get(get_progress))
}
