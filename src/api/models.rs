//! API request and response models

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::AppError;

/// Greeting returned by `GET /`
pub const GREETING: &str = "Hello, Kubernetes with Monitoring!";

/// Greeting payload
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Readiness of the service and of each model handle
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Always "healthy"; model readiness is reported separately
    pub status: String,
    pub model_loaded: bool,
    pub quantized_model_loaded: bool,
}

/// Echo of a requested item
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct ItemResponse {
    pub item_id: i64,
    pub name: String,
}

/// Text generation request
///
/// A missing or null `text` is generated from an empty prompt.
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct GenerateTextRequest {
    #[serde(default)]
    pub text: Option<String>,
}

impl GenerateTextRequest {
    /// Parse a raw request body; an empty body counts as `{}`
    pub fn from_body(body: &[u8]) -> Result<Self, AppError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body)
            .map_err(|e| AppError::Validation(format!("Invalid JSON body: {}", e)))
    }

    pub fn into_text(self) -> String {
        self.text.unwrap_or_default()
    }
}

/// Text generation result
#[derive(Debug, Clone, Deserialize, Serialize, ToSchema)]
pub struct GenerateTextResponse {
    pub generated_text: String,
    /// Generation wall-clock time in seconds
    pub time_taken: f64,
}
