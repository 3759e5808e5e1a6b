use axum::{
    http::StatusCode,
    response::{IntoResponse, Json as AxumJson, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::inference::InferenceError;
use crate::normalize::NormalizeError;
use crate::store::StorageError;
use crate::utils::security::ValidationError;

/// Structured error types for HTTP status code mapping
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// External inference service failed; message is passed through
    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Unrecognized inference response shape: {0}")]
    UnrecognizedResponseShape(String),

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    /// Catch-all for unexpected errors - logs full context internally
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Inference(_)
            | AppError::UnrecognizedResponseShape(_)
            | AppError::Storage(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(key),
            other => AppError::Storage(other),
        }
    }
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        AppError::Inference(err.to_string())
    }
}

impl From<NormalizeError> for AppError {
    fn from(err: NormalizeError) -> Self {
        match err {
            NormalizeError::UnrecognizedShape(descriptor) => {
                AppError::UnrecognizedResponseShape(descriptor)
            }
            NormalizeError::InvalidBase64(err) => AppError::UnrecognizedResponseShape(format!(
                "json object with undecodable image field ({})",
                err
            )),
            NormalizeError::Stream(err) => AppError::Inference(err.to_string()),
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, message) = match self {
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::NotFound(msg) => ("not_found", msg),
            AppError::Conflict(msg) => ("conflict", msg),
            AppError::Inference(msg) => {
                tracing::warn!(error = %msg, "Inference failure");
                ("inference_error", msg)
            }
            AppError::UnrecognizedResponseShape(descriptor) => {
                tracing::error!(shape = %descriptor, "Unrecognized inference response");
                (
                    "unrecognized_response",
                    format!("Unexpected response format: {}", descriptor),
                )
            }
            AppError::Storage(ref err) => {
                tracing::error!(error = ?err, "Storage failure");
                ("storage_error", "Storage unavailable".to_string())
            }
            AppError::Internal(ref err) => {
                // Log full error with backtrace server-side
                tracing::error!(
                    error = ?err,
                    backtrace = ?err.backtrace(),
                    "Internal server error"
                );
                ("internal_error", "An internal error occurred".to_string())
            }
        };

        let body = AxumJson(json!({
            "error": {
                "type": error_type,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
