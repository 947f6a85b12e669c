//! Application settings and configuration management

use crate::error::{AppError, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::backend::{GenerationParams, QUANTIZED_MODEL, STANDARD_MODEL};

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/service.yaml";

/// Environment variable naming an alternative configuration file
pub const CONFIG_PATH_ENV: &str = "TEXTGEN_CONFIG";

/// Prefix for environment overrides (`TEXTGEN__SERVER__PORT=9000`)
pub const ENV_PREFIX: &str = "TEXTGEN";

/// Routes the metrics endpoint may not be mounted on
const RESERVED_PATHS: &[&str] = &["/", "/health", "/generate", "/generate_quantized", "/openapi.json"];

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request-serving worker threads; tokio picks the core count when unset
    #[serde(default)]
    pub workers: Option<usize>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: None,
        }
    }
}

/// Generation call limits and worker lane sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InferenceConfig {
    #[serde(default = "default_deadline_ms")]
    pub deadline_ms: u64,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: usize,
    /// Concurrent generation calls; defaults to the available parallelism
    #[serde(default)]
    pub worker_lane_size: Option<usize>,
}

fn default_deadline_ms() -> u64 {
    10_000
}

fn default_max_length() -> usize {
    50
}

fn default_num_return_sequences() -> usize {
    1
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            deadline_ms: default_deadline_ms(),
            max_length: default_max_length(),
            num_return_sequences: default_num_return_sequences(),
            worker_lane_size: None,
        }
    }
}

impl InferenceConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    pub fn generation_params(&self) -> GenerationParams {
        GenerationParams {
            max_length: self.max_length,
            num_return_sequences: self.num_return_sequences,
        }
    }

    pub fn lane_size(&self) -> usize {
        self.worker_lane_size.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Model weights, tokenizer and loading policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModelsConfig {
    /// Start loading in the background at startup
    #[serde(default = "default_true")]
    pub preload: bool,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_tokenizer_path")]
    pub tokenizer_path: String,
    /// Model name to GGUF weights path
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<String, String>,
    #[serde(default)]
    pub device: DeviceKind,
    #[serde(default)]
    pub sampling: SamplingConfig,
}

fn default_true() -> bool {
    true
}

fn default_retry_interval() -> u64 {
    30
}

fn default_tokenizer_path() -> String {
    "models/tokenizer.json".to_string()
}

fn default_weights() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            STANDARD_MODEL.to_string(),
            "models/model-f16.gguf".to_string(),
        ),
        (
            QUANTIZED_MODEL.to_string(),
            "models/model-q4_0.gguf".to_string(),
        ),
    ])
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            preload: true,
            retry_interval_secs: default_retry_interval(),
            tokenizer_path: default_tokenizer_path(),
            weights: default_weights(),
            device: DeviceKind::default(),
            sampling: SamplingConfig::default(),
        }
    }
}

impl ModelsConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn model_names(&self) -> Vec<String> {
        self.weights.keys().cloned().collect()
    }
}

/// Compute device for local inference
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    #[default]
    Cpu,
    /// First CUDA device when available, CPU otherwise
    Auto,
}

/// Token sampling; no temperature means greedy decoding
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SamplingConfig {
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub seed: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Metrics exposition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
        }
    }
}

impl Settings {
    /// Load settings from the default file (or `TEXTGEN_CONFIG`) and environment variables
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load settings from a specific YAML or TOML file plus environment overrides
    ///
    /// A missing file is not an error: defaults and environment still apply.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let format = if path
            .extension()
            .map_or(false, |ext| ext == "toml")
        {
            FileFormat::Toml
        } else {
            FileFormat::Yaml
        };

        let mut builder = Config::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("inference.deadline_ms", default_deadline_ms() as i64)?
            .set_default("inference.max_length", default_max_length() as i64)?
            .set_default(
                "inference.num_return_sequences",
                default_num_return_sequences() as i64,
            )?
            .set_default("logging.level", default_log_level())?
            .set_default("metrics.path", default_metrics_path())?;

        if path.exists() {
            builder = builder.add_source(File::from(path).format(format));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }
        if self.server.workers == Some(0) {
            return Err(invalid("Server workers must be at least 1"));
        }
        if self.inference.deadline_ms == 0 {
            return Err(invalid("Inference deadline must be greater than 0"));
        }
        if self.inference.max_length == 0 {
            return Err(invalid("max_length must be greater than 0"));
        }
        if self.inference.num_return_sequences == 0 {
            return Err(invalid("num_return_sequences must be at least 1"));
        }
        if self.inference.worker_lane_size == Some(0) {
            return Err(invalid("worker_lane_size must be at least 1"));
        }
        for (name, path) in &self.models.weights {
            if name.trim().is_empty() {
                return Err(invalid("Model name cannot be empty"));
            }
            if path.trim().is_empty() {
                return Err(invalid(&format!("Model '{}' must have a weights path", name)));
            }
        }
        if !self.metrics.path.starts_with('/') {
            return Err(invalid("Metrics path must start with '/'"));
        }
        if RESERVED_PATHS.contains(&self.metrics.path.as_str())
            || self.metrics.path.starts_with("/items/")
            || self.metrics.path.starts_with("/docs")
        {
            return Err(invalid(&format!(
                "Metrics path '{}' collides with an API route",
                self.metrics.path
            )));
        }

        Ok(())
    }

    /// Address to bind the HTTP listener to
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(config::ConfigError::Message(message.to_string()))
}
