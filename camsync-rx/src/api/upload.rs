//! Upload endpoint
//!
//! Accepts either `multipart/form-data` with a `file` part or a raw body
//! whose type comes from `Content-Type` and whose name, if any, comes from
//! `Content-Disposition`. The response is sent once the file is placed;
//! `.mov` conversion continues in the background and is visible through
//! `/progress/:session_id`.

use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header, HeaderMap},
    routing::post,
    Json, Router,
};
use uuid::Uuid;

use crate::services::{IngestOutcome, UploadSource};
use crate::{ApiError, ApiResult, AppState};

/// Client-chosen session id, lets the client poll progress mid-upload
pub const UPLOAD_ID_HEADER: &str = "x-upload-id";

/// POST /upload
///
/// **Response:** `{"session_id": "...", "path": "...", "status": "ok"|"duplicate"}`
///
/// **Errors:**
/// - 400 Bad Request: empty body, missing `file` part, malformed upload id
/// - 409 Conflict: `X-Upload-Id` names an upload still in progress
/// - 500 Internal Server Error: scratch or placement I/O failure
pub async fn upload(
    State(state): State<AppState>,
    request: Request,
) -> ApiResult<Json<IngestOutcome>> {
    let headers = request.headers().clone();
    let session_id = session_id_from(&headers)?;
    let declared_len = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let source = if content_type
        .as_deref()
        .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("multipart/form-data"))
    {
        let multipart = Multipart::from_request(request, &state)
            .await
            .map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;
        UploadSource::Multipart(multipart)
    } else {
        let filename = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_disposition);
        UploadSource::Raw {
            body: request.into_body(),
            content_type,
            filename,
        }
    };

    tracing::info!(session_id = %session_id, declared_len = ?declared_len, "Upload started");
    let outcome = state.ingest.ingest(session_id, source, declared_len).await?;
    Ok(Json(outcome))
}

fn session_id_from(headers: &HeaderMap) -> ApiResult<Uuid> {
    match headers.get(UPLOAD_ID_HEADER) {
        None => Ok(Uuid::new_v4()),
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| Uuid::parse_str(v.trim()).ok())
            .ok_or_else(|| ApiError::BadRequest("Invalid X-Upload-Id header".to_string())),
    }
}

/// Extract `filename="..."` from a Content-Disposition value
///
/// Only the plain `filename` parameter is honored; `filename*` is ignored.
pub fn filename_from_disposition(value: &str) -> Option<String> {
    disposition_params(value).into_iter().find_map(|param| {
        let (key, raw) = param.split_once('=')?;
        if !key.trim().eq_ignore_ascii_case("filename") {
            return None;
        }
        let name = unquote(raw.trim());
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    })
}

/// Split on `;` outside quoted strings
fn disposition_params(value: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (i, c) in value.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ';' if !quoted => {
                params.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(&value[start..]);
    params
}

/// Strip surrounding quotes and backslash escapes of a quoted-string
fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Build upload routes
pub fn upload_routes() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::disable())
}
