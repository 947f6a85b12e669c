//! Text Generation Service
//!
//! An HTTP service exposing a standard and a quantized text generation model,
//! with single-flight model loading, a bounded inference lane with deadlines,
//! and Prometheus request metrics.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod inference;
pub mod loadgen;
pub mod metrics;
pub mod middleware;

pub use error::{AppError, Result};

use std::sync::Arc;

use backend::ModelProvider;
use inference::InferenceExecutor;
use metrics::Metrics;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: config::Settings,
    pub models: Arc<ModelProvider>,
    pub executor: Arc<InferenceExecutor>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Build the state, sizing the worker lane from the inference settings
    pub fn new(settings: config::Settings, models: Arc<ModelProvider>, metrics: Arc<Metrics>) -> Self {
        let executor = Arc::new(InferenceExecutor::new(settings.inference.lane_size()));
        Self {
            settings,
            models,
            executor,
            metrics,
        }
    }
}
