//! HTTP route definitions

use crate::api::handlers;
use crate::api::models::*;
use crate::error::ErrorBody;
use crate::metrics::Metrics;
use crate::middleware::track_requests;
use axum::{
    http::StatusCode,
    middleware::from_fn_with_state,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::any::Any;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Text Generation Service API",
        version = "0.1.0",
        description = "Text generation with a standard and a quantized model, plus Prometheus metrics.",
        license(name = "MIT"),
    ),
    paths(
        handlers::root,
        handlers::health,
        handlers::read_item,
        handlers::generate,
        handlers::generate_quantized,
        handlers::metrics,
    ),
    components(schemas(
        MessageResponse,
        HealthResponse,
        ItemResponse,
        GenerateTextRequest,
        GenerateTextResponse,
        ErrorBody,
    )),
    tags(
        (name = "General", description = "Greeting endpoint"),
        (name = "Items", description = "Item lookup"),
        (name = "Generation", description = "Text generation endpoints"),
        (name = "Health", description = "Health and monitoring endpoints"),
    )
)]
pub struct ApiDoc;

/// Create the main application router
pub fn create_router(state: Arc<crate::AppState>) -> Router {
    let metrics_path = state.settings.metrics.path.clone();
    let metrics = state.metrics.clone();

    let router = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/items/:item_id", get(handlers::read_item))
        .route("/generate", post(handlers::generate))
        .route("/generate_quantized", post(handlers::generate_quantized))
        .route(&metrics_path, get(handlers::metrics))
        // Swagger UI
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .fallback(handlers::not_found)
        // Add shared state
        .with_state(state);

    with_request_layers(router, metrics)
}

/// Wrap a router in the per-request layers
///
/// Layer order, outermost first: tracing, request timing, panic recovery. The
/// timing layer therefore sees a 500 response for a panicking handler.
pub fn with_request_layers(router: Router, metrics: Arc<Metrics>) -> Router {
    router
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(from_fn_with_state(metrics, track_requests))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
}

/// Convert a handler panic into the standard error body
fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic"
    };
    tracing::error!(panic = %message, "Handler panicked");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            detail: "Internal Server Error".to_string(),
        }),
    )
        .into_response()
}
