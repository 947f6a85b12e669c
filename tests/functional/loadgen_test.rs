//! Functional tests for the load generator against a mock service

use std::time::Duration;

use textgen_serving::loadgen::{run, LoadProfile, LoadgenError, Task};
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn quick_profile(host: String) -> LoadProfile {
    LoadProfile {
        host,
        users: 3,
        duration: Duration::from_secs(5),
        min_wait: Duration::ZERO,
        max_wait: Duration::from_millis(5),
        requests_per_user: Some(10),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_weighted_traffic_hits_expected_routes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/items/([1-9][0-9]?|100)$"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let report = run(quick_profile(server.uri())).await.unwrap();

    assert_eq!(report.total_requests(), 30);
    assert_eq!(report.total_failures(), 0);
    assert!(!report.endpoints.contains_key(&Task::Generate));

    let received = server.received_requests().await.unwrap();
    assert_eq!(received.len(), 30);
}

#[tokio::test]
async fn test_non_success_statuses_are_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/generate"))
        .respond_with(ResponseTemplate::new(503).set_body_json(serde_json::json!({
            "detail": "Models not initialized"
        })))
        .mount(&server)
        .await;

    let profile = LoadProfile {
        root_weight: 0,
        item_weight: 0,
        generate_weight: 1,
        ..quick_profile(server.uri())
    };
    let report = run(profile).await.unwrap();

    let generate = &report.endpoints[&Task::Generate];
    assert_eq!(generate.requests(), 30);
    assert_eq!(generate.failures, 30);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(body, serde_json::json!({"text": "Once upon a time"}));
}

#[tokio::test]
async fn test_run_stops_at_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let profile = LoadProfile {
        duration: Duration::from_millis(200),
        min_wait: Duration::from_millis(20),
        max_wait: Duration::from_millis(40),
        requests_per_user: None,
        ..quick_profile(server.uri())
    };
    let report = run(profile).await.unwrap();

    assert!(report.total_requests() > 0);
    assert!(report.elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_unreachable_host_counts_failures() {
    let profile = LoadProfile {
        users: 1,
        requests_per_user: Some(2),
        ..quick_profile("http://127.0.0.1:9".to_string())
    };
    let report = run(profile).await.unwrap();
    assert_eq!(report.total_requests(), 2);
    assert_eq!(report.total_failures(), 2);
}

#[tokio::test]
async fn test_invalid_profile_is_rejected() {
    let profile = LoadProfile {
        users: 0,
        ..Default::default()
    };
    assert!(matches!(
        run(profile).await,
        Err(LoadgenError::InvalidProfile(_))
    ));
}
