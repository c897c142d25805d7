//! HTTP error responses
//!
//! Every failure is returned as `{"detail": <message>, "code": <STABLE_CODE>}`
//! with a status code matching the cause.

use crate::error::BgRemovalError;
use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::QueryRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Errors returned by the gateway handlers
#[derive(Error, Debug)]
pub enum ApiError {
    /// Body is not readable multipart form data
    #[error("Invalid multipart body: {0}")]
    InvalidMultipart(String),

    /// Query string could not be parsed
    #[error("Invalid query parameters: {0}")]
    InvalidQuery(String),

    /// No field named `file` in the form
    #[error("Multipart field 'file' is required")]
    MissingFile,

    /// The `file` field was present but empty
    #[error("Uploaded file is empty")]
    EmptyUpload,

    /// Body exceeded the configured upload limit
    #[error("Upload exceeds the size limit: {0}")]
    PayloadTooLarge(String),

    /// Upload is not an image the decoder understands
    #[error("Uploaded file is not a supported image: {0}")]
    InvalidImage(String),

    /// Model, inference or encoding failure
    #[error("Background removal failed: {0}")]
    ProcessingFailed(String),

    /// Worker panic or poisoned engine lock
    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    code: &'static str,
}

impl ApiError {
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::InvalidMultipart(_) | ApiError::InvalidQuery(_) | ApiError::EmptyUpload => {
                StatusCode::BAD_REQUEST
            },
            ApiError::MissingFile | ApiError::InvalidImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ProcessingFailed(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    #[must_use]
    pub fn stable_code(&self) -> &'static str {
        match self {
            ApiError::InvalidMultipart(_) => "INVALID_MULTIPART",
            ApiError::InvalidQuery(_) => "INVALID_QUERY",
            ApiError::MissingFile => "MISSING_FILE",
            ApiError::EmptyUpload => "EMPTY_UPLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::InvalidImage(_) => "INVALID_IMAGE",
            ApiError::ProcessingFailed(_) => "PROCESSING_FAILED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.stable_code();

        if status.is_server_error() {
            tracing::error!(code, "{self}");
        } else {
            tracing::warn!(code, "{self}");
        }

        let body = ErrorBody {
            detail: self.to_string(),
            code,
        };
        (status, Json(body)).into_response()
    }
}

impl From<BgRemovalError> for ApiError {
    fn from(err: BgRemovalError) -> Self {
        match err {
            BgRemovalError::Image(_) | BgRemovalError::UnsupportedFormat(_) => {
                ApiError::InvalidImage(err.to_string())
            },
            BgRemovalError::Internal(msg) => ApiError::Internal(msg),
            other => ApiError::ProcessingFailed(other.to_string()),
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        ApiError::InvalidMultipart(rejection.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(err.body_text())
        } else {
            ApiError::InvalidMultipart(err.body_text())
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidQuery(rejection.body_text())
    }
}
