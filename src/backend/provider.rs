//! Model provider: lazy, single-flight loading of named model handles

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{error, info, warn};

use super::{LoadError, ModelHandle, ModelLoader, TextGenerator, Tokenizer};
use crate::config::ModelsConfig;

/// Readiness of one named handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelStatus {
    pub name: String,
    pub ready: bool,
}

type LoadAttempt = Shared<BoxFuture<'static, Result<(), LoadError>>>;

#[derive(Default)]
struct LoadState {
    running: Option<LoadAttempt>,
    failed_at: Option<Instant>,
}

/// Owns the tokenizer and every named model handle
///
/// Handles are published through `OnceLock`, so a reader sees either nothing or
/// a fully loaded handle. Each load attempt runs as its own task; callers only
/// await a shared handle to it, so a cancelled caller neither aborts the
/// attempt nor causes another one to start.
pub struct ModelProvider {
    loader: Arc<dyn ModelLoader>,
    names: Vec<String>,
    tokenizer: OnceLock<Arc<dyn Tokenizer>>,
    models: HashMap<String, OnceLock<ModelHandle>>,
    retry_interval: Duration,
    load_state: Mutex<LoadState>,
    last_error: RwLock<Option<LoadError>>,
}

struct LoadBatch {
    tokenizer: Option<Result<Arc<dyn Tokenizer>, LoadError>>,
    models: Vec<(String, Result<Arc<dyn TextGenerator>, LoadError>, Duration)>,
}

impl ModelProvider {
    /// Create a provider for the given model names; nothing is loaded yet
    pub fn new(loader: Arc<dyn ModelLoader>, names: Vec<String>, retry_interval: Duration) -> Self {
        let models = names
            .iter()
            .map(|name| (name.clone(), OnceLock::new()))
            .collect();

        Self {
            loader,
            names,
            tokenizer: OnceLock::new(),
            models,
            retry_interval,
            load_state: Mutex::new(LoadState::default()),
            last_error: RwLock::new(None),
        }
    }

    pub fn from_config(loader: Arc<dyn ModelLoader>, config: &ModelsConfig) -> Self {
        Self::new(loader, config.model_names(), config.retry_interval())
    }

    /// Load every handle that is not loaded yet
    ///
    /// No-op once everything is loaded. Joins the running attempt if there is
    /// one. After a failed attempt the recorded error is returned until
    /// `retry_interval` has elapsed.
    pub async fn ensure_ready(self: &Arc<Self>) -> Result<(), LoadError> {
        if self.all_ready() {
            return Ok(());
        }

        let attempt = {
            let mut state = self.load_state.lock();
            if self.all_ready() {
                return Ok(());
            }
            match &state.running {
                Some(attempt) => attempt.clone(),
                None => {
                    if let Some(failed_at) = state.failed_at {
                        if failed_at.elapsed() < self.retry_interval {
                            return self.recorded_outcome();
                        }
                    }
                    let attempt = self.spawn_attempt();
                    state.running = Some(attempt.clone());
                    attempt
                }
            }
        };

        attempt.await
    }

    fn spawn_attempt(self: &Arc<Self>) -> LoadAttempt {
        let provider = self.clone();
        let task = tokio::spawn(async move {
            let outcome = provider.load_missing().await;
            provider.finish_attempt(&outcome);
            outcome
        });

        let provider = self.clone();
        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    let outcome = Err(LoadError::Task(e.to_string()));
                    provider.finish_attempt(&outcome);
                    outcome
                }
            }
        }
        .boxed()
        .shared()
    }

    fn finish_attempt(&self, outcome: &Result<(), LoadError>) {
        let mut state = self.load_state.lock();
        state.running = None;
        match outcome {
            Ok(()) => {
                state.failed_at = None;
                *self.last_error.write() = None;
            }
            Err(e) => {
                state.failed_at = Some(Instant::now());
                *self.last_error.write() = Some(e.clone());
            }
        }
    }

    async fn load_missing(&self) -> Result<(), LoadError> {
        let loader = self.loader.clone();
        let need_tokenizer = self.tokenizer.get().is_none();
        let pending: Vec<String> = self
            .names
            .iter()
            .filter(|name| !self.is_loaded(name))
            .cloned()
            .collect();

        info!(
            tokenizer = need_tokenizer,
            models = ?pending,
            "Loading models"
        );

        let batch = tokio::task::spawn_blocking(move || load_batch(loader.as_ref(), need_tokenizer, pending))
            .await
            .map_err(|e| LoadError::Task(e.to_string()))?;

        let mut first_error = None;

        for (name, result, elapsed) in batch.models {
            match result {
                Ok(engine) => {
                    if let Some(cell) = self.models.get(&name) {
                        let _ = cell.set(ModelHandle::new(&name, engine));
                    }
                    info!(model = %name, duration_ms = elapsed.as_millis() as u64, "Model loaded");
                }
                Err(e) => {
                    error!(model = %name, error = %e, "Model failed to load");
                    first_error.get_or_insert(e);
                }
            }
        }

        match batch.tokenizer {
            Some(Ok(tokenizer)) => {
                let _ = self.tokenizer.set(tokenizer);
                info!("Tokenizer loaded");
            }
            Some(Err(e)) => {
                error!(error = %e, "Tokenizer failed to load");
                return Err(e);
            }
            None => {}
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn recorded_outcome(&self) -> Result<(), LoadError> {
        match self.last_error.read().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_loaded(&self, name: &str) -> bool {
        self.models
            .get(name)
            .map_or(false, |cell| cell.get().is_some())
    }

    fn all_ready(&self) -> bool {
        self.tokenizer.get().is_some() && self.names.iter().all(|name| self.is_loaded(name))
    }

    /// True when the named model and the tokenizer are both loaded
    pub fn is_ready(&self, name: &str) -> bool {
        self.tokenizer.get().is_some() && self.is_loaded(name)
    }

    /// Handle for a ready model
    pub fn get(&self, name: &str) -> Option<ModelHandle> {
        if self.tokenizer.get().is_none() {
            return None;
        }
        self.models.get(name).and_then(|cell| cell.get().cloned())
    }

    pub fn tokenizer(&self) -> Option<Arc<dyn Tokenizer>> {
        self.tokenizer.get().cloned()
    }

    pub fn status(&self) -> Vec<ModelStatus> {
        self.names
            .iter()
            .map(|name| ModelStatus {
                name: name.clone(),
                ready: self.is_ready(name),
            })
            .collect()
    }

    /// Error recorded by the most recent failed attempt, cleared on success
    pub fn last_error(&self) -> Option<LoadError> {
        self.last_error.read().clone()
    }

    /// Kick off loading without waiting for it
    pub fn preload(self: &Arc<Self>) {
        let provider = self.clone();
        tokio::spawn(async move {
            if let Err(e) = provider.ensure_ready().await {
                warn!(error = %e, "Model preload failed; generation requests will report 503");
            }
        });
    }
}

fn load_batch(loader: &dyn ModelLoader, need_tokenizer: bool, pending: Vec<String>) -> LoadBatch {
    let tokenizer = need_tokenizer.then(|| loader.load_tokenizer());
    if matches!(tokenizer, Some(Err(_))) {
        return LoadBatch {
            tokenizer,
            models: Vec::new(),
        };
    }

    let models = pending
        .into_iter()
        .map(|name| {
            let started = Instant::now();
            let result = loader.load_model(&name);
            (name, result, started.elapsed())
        })
        .collect();

    LoadBatch { tokenizer, models }
}
