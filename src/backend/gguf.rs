//! Local GGUF inference through candle
//!
//! Weights are llama-family GGUF files (f16 or any ggml quantization), the
//! tokenizer is a HuggingFace `tokenizer.json`.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama::ModelWeights;
use tracing::{debug, info};

use super::{EngineError, GenerationParams, LoadError, ModelLoader, TextGenerator, Tokenizer};
use crate::config::{DeviceKind, ModelsConfig, SamplingConfig};

const EOS_TOKEN_KEY: &str = "tokenizer.ggml.eos_token_id";
const BOS_TOKEN_KEY: &str = "tokenizer.ggml.bos_token_id";

/// `tokenizer.json` wrapper
pub struct HfTokenizer {
    inner: tokenizers::Tokenizer,
}

impl HfTokenizer {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let inner = tokenizers::Tokenizer::from_file(path)
            .map_err(|e| LoadError::Tokenizer(format!("{}: {}", path.display(), e)))?;
        Ok(Self { inner })
    }
}

impl Tokenizer for HfTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        self.inner
            .encode(text, true)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| EngineError::Tokenization(e.to_string()))
    }

    fn decode(&self, ids: &[u32]) -> Result<String, EngineError> {
        self.inner
            .decode(ids, true)
            .map_err(|e| EngineError::Decoding(e.to_string()))
    }
}

/// A loaded GGUF model
///
/// The weights are never mutated; every sequence runs on a clone whose KV
/// cache starts empty, so concurrent calls do not interfere.
pub struct GgufGenerator {
    weights: ModelWeights,
    device: Device,
    eos_token: Option<u32>,
    bos_token: Option<u32>,
    sampling: SamplingConfig,
}

impl GgufGenerator {
    fn generate_sequence(
        &self,
        input_ids: &[u32],
        max_length: usize,
        seed: u64,
    ) -> candle_core::Result<Vec<u32>> {
        let mut model = self.weights.clone();
        let mut processor =
            LogitsProcessor::new(seed, self.sampling.temperature, self.sampling.top_p);
        let mut tokens = input_ids.to_vec();
        let mut index_pos = 0;

        while tokens.len() < max_length {
            let context = if index_pos == 0 {
                &tokens[..]
            } else {
                &tokens[tokens.len() - 1..]
            };
            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = model.forward(&input, index_pos)?.squeeze(0)?;
            index_pos += context.len();

            let next = processor.sample(&logits)?;
            tokens.push(next);
            if Some(next) == self.eos_token {
                break;
            }
        }

        Ok(tokens)
    }
}

impl TextGenerator for GgufGenerator {
    fn generate(
        &self,
        input_ids: &[u32],
        params: &GenerationParams,
    ) -> Result<Vec<Vec<u32>>, EngineError> {
        let prompt: Vec<u32> = match (input_ids.is_empty(), self.bos_token) {
            (false, _) => input_ids.to_vec(),
            (true, Some(bos)) => vec![bos],
            (true, None) => {
                return Err(EngineError::Generation(
                    "empty prompt and no BOS token in model metadata".to_string(),
                ))
            }
        };

        (0..params.num_return_sequences.max(1) as u64)
            .map(|i| {
                let seed = sequence_seed(self.sampling.seed, i);
                self.generate_sequence(&prompt, params.max_length, seed)
                    .map_err(|e| EngineError::Generation(e.to_string()))
            })
            .collect()
    }
}

/// Per-sequence sampling seed; wraps so any configured seed is valid
fn sequence_seed(base: u64, index: u64) -> u64 {
    base.wrapping_add(index)
}

/// Loads GGUF weights and the tokenizer named in [`ModelsConfig`]
pub struct GgufModelLoader {
    config: ModelsConfig,
}

impl GgufModelLoader {
    pub fn new(config: ModelsConfig) -> Self {
        Self { config }
    }

    fn device(&self) -> Result<Device, LoadError> {
        match self.config.device {
            DeviceKind::Cpu => Ok(Device::Cpu),
            DeviceKind::Auto => Device::cuda_if_available(0)
                .map_err(|e| LoadError::Unsupported(format!("device selection failed: {}", e))),
        }
    }
}

impl ModelLoader for GgufModelLoader {
    fn load_tokenizer(&self) -> Result<Arc<dyn Tokenizer>, LoadError> {
        info!(path = %self.config.tokenizer_path, "Loading tokenizer");
        Ok(Arc::new(HfTokenizer::from_file(&self.config.tokenizer_path)?))
    }

    fn load_model(&self, name: &str) -> Result<Arc<dyn TextGenerator>, LoadError> {
        let path = self
            .config
            .weights
            .get(name)
            .ok_or_else(|| LoadError::UnknownModel(name.to_string()))?;
        let model_err = |reason: String| LoadError::Model {
            name: name.to_string(),
            reason,
        };

        info!(model = name, path = %path, "Loading GGUF weights");
        let mut file = File::open(path).map_err(|e| model_err(format!("{}: {}", path, e)))?;
        let content = gguf_file::Content::read(&mut file).map_err(|e| model_err(e.to_string()))?;

        let metadata_token = |key: &str| {
            content
                .metadata
                .get(key)
                .and_then(|value| value.to_u32().ok())
        };
        let eos_token = metadata_token(EOS_TOKEN_KEY);
        let bos_token = metadata_token(BOS_TOKEN_KEY);
        debug!(model = name, tensors = content.tensor_infos.len(), ?eos_token, "Read GGUF header");

        let device = self.device()?;
        let weights = ModelWeights::from_gguf(content, &mut file, &device)
            .map_err(|e| model_err(e.to_string()))?;

        Ok(Arc::new(GgufGenerator {
            weights,
            device,
            eos_token,
            bos_token,
            sampling: self.config.sampling.clone(),
        }))
    }
}
