//! Bounded inference executor
//!
//! Generation calls block for seconds, so they never run on the request-serving
//! threads. Each call is moved to the blocking pool, admitted through a
//! semaphore sized to the worker lane, and raced against its deadline.
//!
//! A timed-out call cannot be cancelled: its blocking thread keeps running and
//! keeps its lane permit until the engine returns, then the result is dropped.
//! Abandoned work therefore never exceeds the lane size, and new calls wait for
//! a permit inside their own deadline.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::backend::{EngineError, GenerationParams, ModelHandle, Tokenizer};

/// Input of one generation call
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub text: String,
    pub params: GenerationParams,
}

/// Output of one successful generation call
#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub text: String,
    /// Wall-clock time from dispatch until the decoded text was ready
    pub elapsed: Duration,
}

/// Why a generation call produced no result
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    #[error("Generation timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Internal(String),
}

/// Runs blocking generation calls on a bounded worker lane
pub struct InferenceExecutor {
    lane: Arc<Semaphore>,
    lane_size: usize,
}

impl InferenceExecutor {
    /// Create an executor allowing `lane_size` concurrent generation calls
    pub fn new(lane_size: usize) -> Self {
        let lane_size = lane_size.max(1);
        Self {
            lane: Arc::new(Semaphore::new(lane_size)),
            lane_size,
        }
    }

    pub fn lane_size(&self) -> usize {
        self.lane_size
    }

    /// Lane permits not held by a running or abandoned call
    pub fn idle_workers(&self) -> usize {
        self.lane.available_permits()
    }

    /// Encode, generate within `deadline`, and decode the first sequence
    pub async fn generate(
        &self,
        handle: &ModelHandle,
        tokenizer: &Arc<dyn Tokenizer>,
        request: GenerationRequest,
        deadline: Duration,
    ) -> Result<GenerationResult, ExecutorError> {
        let input_ids = guarded(|| tokenizer.encode(&request.text))?;

        let started = Instant::now();
        let engine = handle.engine();
        let lane = self.lane.clone();
        let params = request.params;
        let prompt_tokens = input_ids.len();

        let dispatched = async move {
            let permit = lane
                .acquire_owned()
                .await
                .map_err(|_| ExecutorError::Internal("Worker lane is closed".to_string()))?;

            let joined = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                engine.generate(&input_ids, &params)
            })
            .await;

            match joined {
                Ok(result) => result.map_err(|e| ExecutorError::Internal(e.to_string())),
                Err(e) if e.is_panic() => Err(ExecutorError::Internal(
                    "Generation task panicked".to_string(),
                )),
                Err(e) => Err(ExecutorError::Internal(format!(
                    "Generation task failed: {}",
                    e
                ))),
            }
        };

        let sequences = match tokio::time::timeout(deadline, dispatched).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    model = handle.name(),
                    deadline_ms = deadline.as_millis() as u64,
                    "Generation exceeded its deadline; abandoning the call"
                );
                return Err(ExecutorError::Timeout(deadline));
            }
        };

        let first = sequences
            .first()
            .ok_or_else(|| ExecutorError::Internal("Model returned no sequences".to_string()))?;
        let text = guarded(|| tokenizer.decode(first))?;
        let elapsed = started.elapsed();

        debug!(
            model = handle.name(),
            prompt_tokens,
            output_tokens = first.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Generation completed"
        );

        Ok(GenerationResult { text, elapsed })
    }
}

/// Run a tokenizer call on the current thread, turning a panic into an error
fn guarded<T>(call: impl FnOnce() -> Result<T, EngineError>) -> Result<T, ExecutorError> {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(result) => result.map_err(|e| ExecutorError::Internal(e.to_string())),
        Err(_) => Err(ExecutorError::Internal("Tokenizer panicked".to_string())),
    }
}
