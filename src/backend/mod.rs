//! Backend module - inference engine traits, model provider and loaders
//!
//! The ML runtime is an external collaborator. It is reached through three
//! traits: [`Tokenizer`] converts text and token ids, [`TextGenerator`] runs a
//! blocking generation call, and [`ModelLoader`] produces both. Everything
//! above this module only sees [`ModelHandle`] and `Arc<dyn Tokenizer>`.

#[cfg(feature = "llm")]
pub mod gguf;
pub mod provider;

pub use provider::{ModelProvider, ModelStatus};

use std::fmt;
use std::sync::Arc;

/// Handle served by `POST /generate`
pub const STANDARD_MODEL: &str = "standard";

/// Handle served by `POST /generate_quantized`
pub const QUANTIZED_MODEL: &str = "quantized";

/// Parameters forwarded to every generation call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationParams {
    /// Maximum total sequence length, prompt included
    pub max_length: usize,
    pub num_return_sequences: usize,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_length: 50,
            num_return_sequences: 1,
        }
    }
}

/// Failure raised by the engine while tokenizing, generating or decoding
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Decoding failed: {0}")]
    Decoding(String),
}

/// Failure to bring a tokenizer or model into memory
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("Failed to load tokenizer: {0}")]
    Tokenizer(String),

    #[error("Failed to load model '{name}': {reason}")]
    Model { name: String, reason: String },

    #[error("Model '{0}' is not configured")]
    UnknownModel(String),

    #[error("Model loading is unavailable: {0}")]
    Unsupported(String),

    #[error("Model loading task failed: {0}")]
    Task(String),
}

/// Text to token ids and back
pub trait Tokenizer: Send + Sync {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError>;

    fn decode(&self, ids: &[u32]) -> Result<String, EngineError>;
}

/// A loaded, read-only model able to continue a token sequence
///
/// `generate` blocks the calling thread for the whole generation and must only
/// be called from the worker lane. Each returned sequence holds the prompt
/// followed by the generated continuation.
pub trait TextGenerator: Send + Sync {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<Vec<u32>>, EngineError>;
}

/// Loads tokenizers and models; every method may block for a long time
pub trait ModelLoader: Send + Sync {
    fn load_tokenizer(&self) -> Result<Arc<dyn Tokenizer>, LoadError>;

    fn load_model(&self, name: &str) -> Result<Arc<dyn TextGenerator>, LoadError>;
}

/// Named, fully loaded model shared by all in-flight requests
#[derive(Clone)]
pub struct ModelHandle {
    name: Arc<str>,
    engine: Arc<dyn TextGenerator>,
}

impl ModelHandle {
    pub fn new(name: &str, engine: Arc<dyn TextGenerator>) -> Self {
        Self {
            name: Arc::from(name),
            engine,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn engine(&self) -> Arc<dyn TextGenerator> {
        self.engine.clone()
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle").field("name", &self.name).finish()
    }
}

/// Loader used when the crate is built without a local inference engine
pub struct UnavailableLoader;

impl ModelLoader for UnavailableLoader {
    fn load_tokenizer(&self) -> Result<Arc<dyn Tokenizer>, LoadError> {
        Err(LoadError::Unsupported(
            "built without the `llm` feature".to_string(),
        ))
    }

    fn load_model(&self, _name: &str) -> Result<Arc<dyn TextGenerator>, LoadError> {
        Err(LoadError::Unsupported(
            "built without the `llm` feature".to_string(),
        ))
    }
}

/// Loader matching the compiled feature set
#[cfg(feature = "llm")]
pub fn default_loader(config: &crate::config::ModelsConfig) -> Arc<dyn ModelLoader> {
    Arc::new(gguf::GgufModelLoader::new(config.clone()))
}

/// Loader matching the compiled feature set
#[cfg(not(feature = "llm"))]
pub fn default_loader(_config: &crate::config::ModelsConfig) -> Arc<dyn ModelLoader> {
    tracing::warn!("Built without the `llm` feature; generation endpoints will report 503");
    Arc::new(UnavailableLoader)
}
