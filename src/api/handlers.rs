//! HTTP request handlers

use crate::api::models::{
    GenerateTextRequest, GenerateTextResponse, HealthResponse, ItemResponse, MessageResponse,
    GREETING,
};
use crate::backend::{QUANTIZED_MODEL, STANDARD_MODEL};
use crate::error::{AppError, ErrorBody, Result};
use crate::inference::{ExecutorError, GenerationRequest};
use crate::metrics::{outcome, CONTENT_TYPE};
use crate::AppState;
use axum::{
    body::Bytes,
    extract::{rejection::PathRejection, Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Greeting endpoint
#[utoipa::path(
    get,
    path = "/",
    tag = "General",
    responses((status = 200, description = "Greeting", body = MessageResponse))
)]
pub async fn root(State(state): State<Arc<AppState>>) -> Json<MessageResponse> {
    state.metrics.request_count.inc();
    Json(MessageResponse {
        message: GREETING.to_string(),
    })
}

/// Health check endpoint; model readiness is reported in the body
#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service and model readiness", body = HealthResponse))
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: state.models.is_ready(STANDARD_MODEL),
        quantized_model_loaded: state.models.is_ready(QUANTIZED_MODEL),
    })
}

/// Echo an item by id
#[utoipa::path(
    get,
    path = "/items/{item_id}",
    tag = "Items",
    params(("item_id" = i64, Path, description = "Integer item id")),
    responses(
        (status = 200, description = "Item", body = ItemResponse),
        (status = 422, description = "Item id is not an integer", body = ErrorBody)
    )
)]
pub async fn read_item(
    item_id: std::result::Result<Path<i64>, PathRejection>,
) -> Result<Json<ItemResponse>> {
    let Path(item_id) = item_id.map_err(|rejection| AppError::Validation(rejection.body_text()))?;

    Ok(Json(ItemResponse {
        item_id,
        name: format!("Item {}", item_id),
    }))
}

/// Generate text with the standard model
#[utoipa::path(
    post,
    path = "/generate",
    tag = "Generation",
    request_body = GenerateTextRequest,
    responses(
        (status = 200, description = "Generated text", body = GenerateTextResponse),
        (status = 422, description = "Malformed body", body = ErrorBody),
        (status = 500, description = "Generation failed", body = ErrorBody),
        (status = 503, description = "Models not initialized", body = ErrorBody),
        (status = 504, description = "Generation timed out", body = ErrorBody)
    )
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<GenerateTextResponse>> {
    generate_with(&state, STANDARD_MODEL, &body).await
}

/// Generate text with the quantized model
#[utoipa::path(
    post,
    path = "/generate_quantized",
    tag = "Generation",
    request_body = GenerateTextRequest,
    responses(
        (status = 200, description = "Generated text", body = GenerateTextResponse),
        (status = 422, description = "Malformed body", body = ErrorBody),
        (status = 500, description = "Generation failed", body = ErrorBody),
        (status = 503, description = "Models not initialized", body = ErrorBody),
        (status = 504, description = "Generation timed out", body = ErrorBody)
    )
)]
pub async fn generate_quantized(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<GenerateTextResponse>> {
    generate_with(&state, QUANTIZED_MODEL, &body).await
}

/// Shared generation path for every model-specific route
async fn generate_with(
    state: &AppState,
    model: &str,
    body: &[u8],
) -> Result<Json<GenerateTextResponse>> {
    let text = GenerateTextRequest::from_body(body)?.into_text();
    info!(model, prompt_chars = text.chars().count(), "Received generation request");

    if !state.models.is_ready(model) {
        if let Err(e) = state.models.ensure_ready().await {
            debug!(error = %e, "Model provider is not fully loaded");
        }
    }

    let (handle, tokenizer) = match (state.models.get(model), state.models.tokenizer()) {
        (Some(handle), Some(tokenizer)) => (handle, tokenizer),
        _ => {
            state.metrics.record_generation(model, outcome::NOT_READY);
            warn!(model, "Generation requested before the model was loaded");
            return Err(AppError::NotReady);
        }
    };

    let request = GenerationRequest {
        text,
        params: state.settings.inference.generation_params(),
    };
    let deadline = state.settings.inference.deadline();

    match state
        .executor
        .generate(&handle, &tokenizer, request, deadline)
        .await
    {
        Ok(result) => {
            state.metrics.record_generation(model, outcome::SUCCESS);
            state
                .metrics
                .generation_duration_seconds
                .with_label_values(&[model])
                .observe(result.elapsed.as_secs_f64());

            info!(
                model,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Generation completed"
            );

            Ok(Json(GenerateTextResponse {
                generated_text: result.text,
                time_taken: result.elapsed.as_secs_f64(),
            }))
        }
        Err(e) => {
            let label = match &e {
                ExecutorError::Timeout(_) => outcome::TIMEOUT,
                ExecutorError::Internal(_) => outcome::ERROR,
            };
            state.metrics.record_generation(model, label);
            warn!(model, error = %e, "Generation failed");
            Err(e.into())
        }
    }
}

/// Metrics endpoint (Prometheus text format)
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "Health",
    responses((status = 200, description = "Prometheus text exposition", body = String, content_type = "text/plain"))
)]
pub async fn metrics(State(state): State<Arc<AppState>>) -> Result<Response> {
    let body = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response())
}

/// Fallback for unknown routes
pub async fn not_found() -> AppError {
    AppError::NotFound("Not Found".to_string())
}
