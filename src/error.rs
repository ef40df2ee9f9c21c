use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::services::queue::QueueError;
use crate::services::storage::StorageError;

/// Errors surfaced synchronously by the HTTP handlers. Rendered as
/// `{"detail": "..."}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unsupported file type: {0}. Only JPG and PNG are allowed.")]
    UnsupportedMediaType(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("Malformed multipart request: {0}")]
    Multipart(#[from] MultipartError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Job queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::UnsupportedMediaType(_) => StatusCode::BAD_REQUEST,
            ApiError::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Multipart(e) => e.status(),
            // body limit hits surface here while the image streams to disk
            ApiError::Storage(StorageError::Upload(source)) => source
                .downcast_ref::<MultipartError>()
                .map(MultipartError::status)
                .unwrap_or(StatusCode::BAD_REQUEST),
            ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        (status, Json(json!({ "detail": self.to_string() }))).into_response()
    }
}
