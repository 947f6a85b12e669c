//! Unit tests for the model provider

#[path = "../common/mod.rs"]
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Behavior, StubLoader};
use futures::future::join_all;
use tokio_test::{assert_err, assert_ok};
use textgen_serving::backend::{LoadError, ModelProvider, QUANTIZED_MODEL, STANDARD_MODEL};

fn names() -> Vec<String> {
    vec![STANDARD_MODEL.to_string(), QUANTIZED_MODEL.to_string()]
}

fn provider(loader: &Arc<StubLoader>, retry: Duration) -> Arc<ModelProvider> {
    Arc::new(ModelProvider::new(loader.clone(), names(), retry))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_load_once() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).with_delay(Duration::from_millis(50)));
    let provider = provider(&loader, Duration::from_secs(30));

    let calls = (0..16).map(|_| {
        let provider = provider.clone();
        tokio::spawn(async move { provider.ensure_ready().await })
    });
    for result in join_all(calls).await {
        assert_ok!(result.unwrap());
    }

    assert_eq!(loader.tokenizer_loads(), 1);
    assert_eq!(loader.model_loads(), 2);
    assert!(provider.is_ready(STANDARD_MODEL));
    assert!(provider.is_ready(QUANTIZED_MODEL));

    // Already loaded: no further work
    assert_ok!(provider.ensure_ready().await);
    assert_eq!(loader.model_loads(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readiness_never_observed_partially() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).with_delay(Duration::from_millis(30)));
    let provider = provider(&loader, Duration::from_secs(30));

    let observer = {
        let provider = provider.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                // A visible handle is always paired with a tokenizer
                if provider.get(STANDARD_MODEL).is_some() {
                    assert!(provider.tokenizer().is_some());
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
    };

    provider.ensure_ready().await.unwrap();
    observer.await.unwrap();
}

#[tokio::test]
async fn test_failed_model_does_not_hide_loaded_one() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).failing_model(QUANTIZED_MODEL));
    let provider = provider(&loader, Duration::from_secs(30));

    let err = provider.ensure_ready().await.unwrap_err();
    assert!(matches!(err, LoadError::Model { ref name, .. } if name == QUANTIZED_MODEL));

    assert!(provider.is_ready(STANDARD_MODEL));
    assert!(!provider.is_ready(QUANTIZED_MODEL));
    assert_eq!(provider.last_error(), Some(err));

    let status = provider.status();
    assert_eq!(status.len(), 2);
    assert!(status.iter().any(|s| s.name == STANDARD_MODEL && s.ready));
}

#[tokio::test]
async fn test_failure_is_cached_until_retry_interval() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).failing_tokenizer());
    let provider = provider(&loader, Duration::from_secs(3600));

    assert_err!(provider.ensure_ready().await);
    assert_err!(provider.ensure_ready().await);
    assert_eq!(loader.tokenizer_loads(), 1);
    assert_eq!(loader.model_loads(), 0);
    assert!(!provider.is_ready(STANDARD_MODEL));
}

#[tokio::test]
async fn test_zero_retry_interval_retries_every_call() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).failing_tokenizer());
    let provider = provider(&loader, Duration::ZERO);

    assert!(provider.ensure_ready().await.is_err());
    assert!(provider.ensure_ready().await.is_err());
    assert_eq!(loader.tokenizer_loads(), 2);
}

#[tokio::test]
async fn test_preload_runs_in_background() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).with_delay(Duration::from_millis(20)));
    let provider = provider(&loader, Duration::from_secs(30));

    provider.preload();
    for _ in 0..100 {
        if provider.is_ready(QUANTIZED_MODEL) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert!(provider.is_ready(STANDARD_MODEL));
    assert!(provider.is_ready(QUANTIZED_MODEL));
    assert_eq!(loader.model_loads(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_caller_does_not_restart_load() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).with_delay(Duration::from_millis(200)));
    let provider = provider(&loader, Duration::from_secs(30));

    let first = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.ensure_ready().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = {
        let provider = provider.clone();
        tokio::spawn(async move { provider.ensure_ready().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    first.abort();

    assert_ok!(second.await.unwrap());
    assert_ok!(provider.ensure_ready().await);
    assert_eq!(loader.tokenizer_loads(), 1);
    assert_eq!(loader.model_loads(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_load_completes_after_only_caller_is_dropped() {
    let loader = Arc::new(StubLoader::new(Behavior::Append("!")).with_delay(Duration::from_millis(30)));
    let provider = provider(&loader, Duration::from_secs(30));

    let abandoned = tokio::time::timeout(Duration::from_millis(10), provider.ensure_ready()).await;
    assert!(abandoned.is_err());

    for _ in 0..100 {
        if provider.is_ready(QUANTIZED_MODEL) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(provider.is_ready(STANDARD_MODEL));
    assert!(provider.is_ready(QUANTIZED_MODEL));
    assert_eq!(loader.tokenizer_loads(), 1);
    assert_eq!(loader.model_loads(), 2);
}
