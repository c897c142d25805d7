//! Route handlers
//!
//! - `GET  /health`    returns `{"ok": true}`
//! - `POST /remove-bg` takes multipart field `file` and returns `image/png`

use super::{error::ApiError, AppState};
use axum::{
    body::Bytes,
    extract::{
        multipart::{Multipart, MultipartRejection},
        rejection::QueryRejection,
        Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::instrument;

/// Name of the form field carrying the image
pub const FILE_FIELD: &str = "file";

/// Query parameters accepted by `POST /remove-bg`
#[derive(Debug, Default, Deserialize)]
pub struct RemoveBgParams {
    /// Return the grayscale mask instead of the cutout
    #[serde(default)]
    pub only_mask: bool,
}

/// GET /health
pub async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

/// POST /remove-bg
#[instrument(
    skip_all,
    fields(only_mask = tracing::field::Empty, upload_bytes = tracing::field::Empty)
)]
pub async fn remove_bg(
    State(state): State<AppState>,
    params: Result<Query<RemoveBgParams>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let mut multipart = multipart?;
    tracing::Span::current().record("only_mask", params.only_mask);

    let upload = read_file_field(&mut multipart).await?;
    tracing::Span::current().record("upload_bytes", upload.len());
    if upload.is_empty() {
        return Err(ApiError::EmptyUpload);
    }

    let remover = Arc::clone(&state.remover);
    let only_mask = params.only_mask;
    let png = tokio::task::spawn_blocking(move || remover.remove_background(&upload, only_mask))
        .await
        .map_err(|e| ApiError::Internal(format!("Removal worker failed: {e}")))??;

    Ok(([(header::CONTENT_TYPE, "image/png")], png).into_response())
}

/// Read the whole `file` field, skipping any other fields before it
async fn read_file_field(multipart: &mut Multipart) -> Result<Bytes, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            tracing::debug!(field = ?field.name(), "Skipping multipart field");
            continue;
        }

        if let Some(file_name) = field.file_name() {
            tracing::debug!(file_name, "Reading upload");
        }
        return Ok(field.bytes().await?);
    }

    Err(ApiError::MissingFile)
}
