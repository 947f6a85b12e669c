//! Request timing middleware
//!
//! Every request, on every route, passes through [`track_requests`]. The
//! accounting lives in [`RequestTracker`]'s `Drop`, so the in-flight gauge is
//! decremented and the duration observed exactly once even when the handler
//! returns early, panics, or its future is dropped by a disconnecting client.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};

use crate::metrics::Metrics;

/// Status label for requests dropped before a response existed
const CLIENT_CLOSED_STATUS: &str = "499";

/// Path label shared by every request that matched no route
pub const UNMATCHED_PATH: &str = "<unmatched>";

/// Scoped request accounting: increments on creation, records on drop
pub struct RequestTracker {
    metrics: Arc<Metrics>,
    method: String,
    path: String,
    status: Option<StatusCode>,
    start_time: Instant,
}

impl RequestTracker {
    pub fn start(metrics: Arc<Metrics>, method: String, path: String) -> Self {
        metrics.requests_in_progress.inc();
        Self {
            metrics,
            method,
            path,
            status: None,
            start_time: Instant::now(),
        }
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        let duration = self.start_time.elapsed();
        let status = match self.status {
            Some(status) => status.as_u16().to_string(),
            None if std::thread::panicking() => StatusCode::INTERNAL_SERVER_ERROR.as_u16().to_string(),
            None => CLIENT_CLOSED_STATUS.to_string(),
        };
        let labels = [self.method.as_str(), self.path.as_str(), status.as_str()];

        self.metrics.requests_total.with_label_values(&labels).inc();
        self.metrics
            .request_duration_seconds
            .with_label_values(&labels)
            .observe(duration.as_secs_f64());
        self.metrics.requests_in_progress.dec();

        tracing::debug!(
            method = %self.method,
            path = %self.path,
            status = %status,
            duration_ms = duration.as_millis() as u64,
            "Request completed"
        );
    }
}

/// Middleware recording request count, latency and in-flight requests
pub async fn track_requests(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_PATH.to_string(), |matched| matched.as_str().to_string());

    let mut tracker = RequestTracker::start(metrics, method, path);
    let response = next.run(request).await;
    tracker.set_status(response.status());

    response
}
