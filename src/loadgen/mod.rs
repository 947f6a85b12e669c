//! Load generator for the text generation service
//!
//! Simulated users loop until the run deadline: each picks a weighted task,
//! issues it, records the latency, then waits a random think time.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::{debug, info};

/// One kind of request a simulated user can issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Task {
    Root,
    Item,
    Generate,
}

impl Task {
    /// Report label, using the route template for parameterised paths
    pub fn label(&self) -> &'static str {
        match self {
            Task::Root => "GET /",
            Task::Item => "GET /items/:item_id",
            Task::Generate => "POST /generate",
        }
    }
}

/// Shape of a load test run
#[derive(Debug, Clone)]
pub struct LoadProfile {
    pub host: String,
    pub users: usize,
    pub duration: Duration,
    pub min_wait: Duration,
    pub max_wait: Duration,
    pub root_weight: u32,
    pub item_weight: u32,
    pub generate_weight: u32,
    pub prompt: String,
    /// Stop each user after this many requests, even before the deadline
    pub requests_per_user: Option<u64>,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            host: "http://127.0.0.1:8080".to_string(),
            users: 10,
            duration: Duration::from_secs(60),
            min_wait: Duration::from_millis(1000),
            max_wait: Duration::from_millis(5000),
            root_weight: 2,
            item_weight: 1,
            generate_weight: 0,
            prompt: "Once upon a time".to_string(),
            requests_per_user: None,
        }
    }
}

impl LoadProfile {
    fn validate(&self) -> Result<(), LoadgenError> {
        if self.users == 0 {
            return Err(LoadgenError::InvalidProfile(
                "at least one user is required".to_string(),
            ));
        }
        if self.min_wait > self.max_wait {
            return Err(LoadgenError::InvalidProfile(
                "min wait exceeds max wait".to_string(),
            ));
        }
        if self.tasks().0.is_empty() {
            return Err(LoadgenError::InvalidProfile(
                "at least one task weight must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Tasks with a positive weight; widened so the total cannot overflow
    fn tasks(&self) -> (Vec<Task>, Vec<u64>) {
        [
            (Task::Root, u64::from(self.root_weight)),
            (Task::Item, u64::from(self.item_weight)),
            (Task::Generate, u64::from(self.generate_weight)),
        ]
        .into_iter()
        .filter(|(_, weight)| *weight > 0)
        .unzip()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoadgenError {
    #[error("Invalid load profile: {0}")]
    InvalidProfile(String),

    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// Latency samples and failures for one endpoint
#[derive(Debug, Clone, Default)]
pub struct EndpointStats {
    pub failures: u64,
    latencies: Vec<Duration>,
}

impl EndpointStats {
    pub fn record(&mut self, latency: Duration, success: bool) {
        self.latencies.push(latency);
        if !success {
            self.failures += 1;
        }
    }

    pub fn requests(&self) -> u64 {
        self.latencies.len() as u64
    }

    pub fn min(&self) -> Duration {
        self.latencies.iter().min().copied().unwrap_or_default()
    }

    pub fn max(&self) -> Duration {
        self.latencies.iter().max().copied().unwrap_or_default()
    }

    pub fn mean(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        self.latencies.iter().sum::<Duration>() / self.latencies.len() as u32
    }

    /// Nearest-rank percentile, `p` in `0.0..=100.0`
    pub fn percentile(&self, p: f64) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let mut sorted = self.latencies.clone();
        sorted.sort_unstable();
        let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
        sorted[rank.clamp(1, sorted.len()) - 1]
    }

    fn merge(&mut self, other: EndpointStats) {
        self.failures += other.failures;
        self.latencies.extend(other.latencies);
    }
}

/// Aggregated result of a run
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub endpoints: BTreeMap<Task, EndpointStats>,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn total_requests(&self) -> u64 {
        self.endpoints.values().map(EndpointStats::requests).sum()
    }

    pub fn total_failures(&self) -> u64 {
        self.endpoints.values().map(|stats| stats.failures).sum()
    }

    fn merge(&mut self, other: LoadReport) {
        for (task, stats) in other.endpoints {
            self.endpoints.entry(task).or_default().merge(stats);
        }
    }
}

fn millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

impl fmt::Display for LoadReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<24} {:>8} {:>8} {:>9} {:>9} {:>9} {:>9} {:>9}",
            "Endpoint", "Reqs", "Fails", "Min(ms)", "Mean(ms)", "p50(ms)", "p95(ms)", "Max(ms)"
        )?;
        for (task, stats) in &self.endpoints {
            writeln!(
                f,
                "{:<24} {:>8} {:>8} {:>9.1} {:>9.1} {:>9.1} {:>9.1} {:>9.1}",
                task.label(),
                stats.requests(),
                stats.failures,
                millis(stats.min()),
                millis(stats.mean()),
                millis(stats.percentile(50.0)),
                millis(stats.percentile(95.0)),
                millis(stats.max()),
            )?;
        }
        write!(
            f,
            "Total: {} requests, {} failures in {:.1}s",
            self.total_requests(),
            self.total_failures(),
            self.elapsed.as_secs_f64()
        )
    }
}

/// Run the profile to completion and aggregate every user's samples
pub async fn run(profile: LoadProfile) -> Result<LoadReport, LoadgenError> {
    profile.validate()?;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()?;
    let started = Instant::now();
    let deadline = started + profile.duration;

    info!(
        host = %profile.host,
        users = profile.users,
        duration_secs = profile.duration.as_secs(),
        "Starting load test"
    );

    let users = (0..profile.users).map(|user| simulate_user(user, &client, &profile, deadline));
    let mut report = LoadReport::default();
    for user_report in futures::future::join_all(users).await {
        report.merge(user_report);
    }
    report.elapsed = started.elapsed();

    info!(
        requests = report.total_requests(),
        failures = report.total_failures(),
        "Load test finished"
    );
    Ok(report)
}

async fn simulate_user(
    user: usize,
    client: &reqwest::Client,
    profile: &LoadProfile,
    deadline: Instant,
) -> LoadReport {
    let mut report = LoadReport::default();
    let (tasks, weights) = profile.tasks();
    let Ok(chooser) = WeightedIndex::new(&weights) else {
        return report;
    };
    let mut rng = StdRng::from_entropy();
    let host = profile.host.trim_end_matches('/');
    let mut issued = 0u64;

    while Instant::now() < deadline {
        if profile.requests_per_user.is_some_and(|limit| issued >= limit) {
            break;
        }

        let task = tasks[chooser.sample(&mut rng)];
        let request = match task {
            Task::Root => client.get(format!("{}/", host)),
            Task::Item => {
                let item_id: u32 = rng.gen_range(1..=100);
                client.get(format!("{}/items/{}", host, item_id))
            }
            Task::Generate => client
                .post(format!("{}/generate", host))
                .json(&json!({ "text": profile.prompt })),
        };

        let sent = Instant::now();
        let success = match request.send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!(user, task = task.label(), error = %e, "Request failed");
                false
            }
        };
        report
            .endpoints
            .entry(task)
            .or_default()
            .record(sent.elapsed(), success);
        issued += 1;

        let wait = rng.gen_range(profile.min_wait..=profile.max_wait);
        let remaining = deadline.saturating_duration_since(Instant::now());
        tokio::time::sleep(wait.min(remaining)).await;
    }

    report
}
