//! Prometheus metrics for the HTTP layer and generation calls
//!
//! Tracks request counters, latency histograms and the in-flight gauge.
//! Metrics are exposed in text format at the configured scrape path.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

pub const REQUEST_DURATION_METRIC: &str = "http_request_duration_seconds";

/// Outcome label values for `generation_requests_total`
pub mod outcome {
    pub const SUCCESS: &str = "success";
    pub const TIMEOUT: &str = "timeout";
    pub const ERROR: &str = "error";
    pub const NOT_READY: &str = "not_ready";
}

/// Every metric the service records, registered in one owned registry
#[derive(Clone)]
pub struct Metrics {
    /// Calls to the greeting endpoint
    pub request_count: IntCounter,

    /// Completed HTTP requests (labeled by method, route and status)
    pub requests_total: IntCounterVec,

    /// HTTP request latency in seconds (labeled by method, route and status)
    pub request_duration_seconds: HistogramVec,

    /// Requests currently being handled
    pub requests_in_progress: IntGauge,

    /// Generation attempts (labeled by model and outcome)
    pub generation_requests_total: IntCounterVec,

    /// Successful generation latency in seconds (labeled by model)
    pub generation_duration_seconds: HistogramVec,

    registry: Registry,
}

impl Metrics {
    /// Create and register all metrics in a fresh registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let request_count = IntCounter::new("request_count", "Total number of requests")?;

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "path", "status_code"],
        )?;

        let request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                REQUEST_DURATION_METRIC,
                "HTTP request duration in seconds",
            )
            .buckets(vec![
                0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, // fast routes
                1.0, 2.5, 5.0, 10.0, 15.0, 30.0, // generation, deadline at 10s
            ]),
            &["method", "path", "status_code"],
        )?;

        let requests_in_progress = IntGauge::new(
            "http_requests_in_progress",
            "Number of HTTP requests currently in progress",
        )?;

        let generation_requests_total = IntCounterVec::new(
            Opts::new(
                "generation_requests_total",
                "Total number of text generation attempts",
            ),
            &["model", "outcome"],
        )?;

        let generation_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "generation_duration_seconds",
                "Successful text generation duration in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 4.0, 6.0, 8.0, 10.0]),
            &["model"],
        )?;

        registry.register(Box::new(request_count.clone()))?;
        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration_seconds.clone()))?;
        registry.register(Box::new(requests_in_progress.clone()))?;
        registry.register(Box::new(generation_requests_total.clone()))?;
        registry.register(Box::new(generation_duration_seconds.clone()))?;

        Ok(Self {
            request_count,
            requests_total,
            request_duration_seconds,
            requests_in_progress,
            generation_requests_total,
            generation_duration_seconds,
            registry,
        })
    }

    /// Render every registered metric in text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn in_flight(&self) -> i64 {
        self.requests_in_progress.get()
    }

    /// Total histogram observations across all label sets
    pub fn request_observations(&self) -> u64 {
        self.registry
            .gather()
            .iter()
            .filter(|family| family.get_name() == REQUEST_DURATION_METRIC)
            .flat_map(|family| family.get_metric())
            .map(|metric| metric.get_histogram().get_sample_count())
            .sum()
    }

    pub fn record_generation(&self, model: &str, outcome: &str) {
        self.generation_requests_total
            .with_label_values(&[model, outcome])
            .inc();
    }
}
