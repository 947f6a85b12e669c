//! Error types for the text generation service
//!
//! `AppError` is the only error that crosses the HTTP boundary. Every failure
//! from the model provider or the inference executor is converted into one of
//! its variants, and each variant maps to exactly one status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::inference::ExecutorError;

/// Message returned when a generation request arrives before its model is usable
pub const NOT_READY_DETAIL: &str = "Models not initialized";

/// Message returned when generation exceeds its deadline
pub const TIMEOUT_DETAIL: &str = "Request timed out";

/// Error body shared by every failing endpoint
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ErrorBody {
    pub detail: String,
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{}", NOT_READY_DETAIL)]
    NotReady,

    #[error("{}", TIMEOUT_DETAIL)]
    Timeout,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl AppError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) | AppError::Config(_) | AppError::Metrics(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<ExecutorError> for AppError {
    fn from(err: ExecutorError) -> Self {
        match err {
            ExecutorError::Timeout(_) => AppError::Timeout,
            ExecutorError::Internal(message) => AppError::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self, "Request failed");
        }

        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
