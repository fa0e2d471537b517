//! API error type and its HTTP mapping

use crate::protocol::ErrorEnvelope;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use modb_core::{ErrorKind, ModbError};
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unknown access key
    #[error("Missing or invalid ApiKey header")]
    Unauthorized,

    #[error(transparent)]
    Engine(#[from] ModbError),

    /// Body, query string or path could not be decoded
    #[error("{0}")]
    BadRequest(String),

    /// A blocking task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Engine(e) => match e.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::NotReady => StatusCode::SERVICE_UNAVAILABLE,
                ErrorKind::Fatal => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the log
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorEnvelope {
            status_code: status.as_u16(),
            status_message: status.canonical_reason().unwrap_or("Error").to_string(),
            error: message,
        };
        (status, Json(body)).into_response()
    }
}
