//! Shared stubs for the integration and functional tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::Value;
use textgen_serving::api::routes::create_router;
use textgen_serving::backend::{
    EngineError, GenerationParams, LoadError, ModelLoader, ModelProvider, TextGenerator, Tokenizer,
};
use textgen_serving::config::Settings;
use textgen_serving::metrics::Metrics;
use textgen_serving::AppState;
use tower::ServiceExt;

/// One token per character
pub struct CharTokenizer;

impl Tokenizer for CharTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, EngineError> {
        Ok(text.chars().map(|c| c as u32).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String, EngineError> {
        ids.iter()
            .map(|&id| {
                char::from_u32(id).ok_or_else(|| EngineError::Decoding(format!("invalid id {}", id)))
            })
            .collect()
    }
}

/// Tokenizer whose every call panics
pub struct PanickingTokenizer;

impl Tokenizer for PanickingTokenizer {
    fn encode(&self, _text: &str) -> Result<Vec<u32>, EngineError> {
        panic!("tokenizer state corrupted")
    }

    fn decode(&self, _ids: &[u32]) -> Result<String, EngineError> {
        panic!("tokenizer state corrupted")
    }
}

#[derive(Clone)]
pub enum Behavior {
    /// Return the prompt followed by the suffix
    Append(&'static str),
    Sleep(Duration),
    Fail(&'static str),
    Panic,
}

pub struct StubGenerator(pub Behavior);

impl TextGenerator for StubGenerator {
    fn generate(
        &self,
        input_ids: &[u32],
        _params: &GenerationParams,
    ) -> Result<Vec<Vec<u32>>, EngineError> {
        match &self.0 {
            Behavior::Append(suffix) => {
                let mut ids = input_ids.to_vec();
                ids.extend(suffix.chars().map(|c| c as u32));
                Ok(vec![ids])
            }
            Behavior::Sleep(duration) => {
                std::thread::sleep(*duration);
                Ok(vec![input_ids.to_vec()])
            }
            Behavior::Fail(message) => Err(EngineError::Generation(message.to_string())),
            Behavior::Panic => panic!("engine crashed"),
        }
    }
}

/// Loader counting every call, with optional delay and failing models
pub struct StubLoader {
    behavior: Behavior,
    load_delay: Duration,
    failing: HashSet<String>,
    fail_tokenizer: bool,
    panicking_tokenizer: bool,
    pub tokenizer_loads: AtomicUsize,
    pub model_loads: AtomicUsize,
}

impl StubLoader {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            load_delay: Duration::ZERO,
            failing: HashSet::new(),
            fail_tokenizer: false,
            panicking_tokenizer: false,
            tokenizer_loads: AtomicUsize::new(0),
            model_loads: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.load_delay = delay;
        self
    }

    pub fn failing_model(mut self, name: &str) -> Self {
        self.failing.insert(name.to_string());
        self
    }

    pub fn failing_tokenizer(mut self) -> Self {
        self.fail_tokenizer = true;
        self
    }

    pub fn panicking_tokenizer(mut self) -> Self {
        self.panicking_tokenizer = true;
        self
    }

    pub fn model_loads(&self) -> usize {
        self.model_loads.load(Ordering::SeqCst)
    }

    pub fn tokenizer_loads(&self) -> usize {
        self.tokenizer_loads.load(Ordering::SeqCst)
    }
}

impl ModelLoader for StubLoader {
    fn load_tokenizer(&self) -> Result<Arc<dyn Tokenizer>, LoadError> {
        self.tokenizer_loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.load_delay);
        if self.fail_tokenizer {
            return Err(LoadError::Tokenizer("tokenizer.json not found".to_string()));
        }
        if self.panicking_tokenizer {
            return Ok(Arc::new(PanickingTokenizer));
        }
        Ok(Arc::new(CharTokenizer))
    }

    fn load_model(&self, name: &str) -> Result<Arc<dyn TextGenerator>, LoadError> {
        self.model_loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.load_delay);
        if self.failing.contains(name) {
            return Err(LoadError::Model {
                name: name.to_string(),
                reason: "weights not found".to_string(),
            });
        }
        Ok(Arc::new(StubGenerator(self.behavior.clone())))
    }
}

/// Settings for tests: no preload, short retry interval, small lane
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.models.preload = false;
    settings.models.retry_interval_secs = 0;
    settings.inference.worker_lane_size = Some(4);
    settings
}

pub fn app_state(loader: Arc<StubLoader>, settings: Settings) -> Arc<AppState> {
    let models = Arc::new(ModelProvider::from_config(loader, &settings.models));
    let metrics = Arc::new(Metrics::new().unwrap());
    Arc::new(AppState::new(settings, models, metrics))
}

pub fn app(state: &Arc<AppState>) -> Router {
    create_router(state.clone())
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Send one request through a fresh copy of the router
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

pub async fn send_json(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let (status, body) = send(app, request).await;
    let json = serde_json::from_str(&body).unwrap_or(Value::Null);
    (status, json)
}
