//! Inference execution off the request-serving threads

pub mod executor;

pub use executor::{ExecutorError, GenerationRequest, GenerationResult, InferenceExecutor};
