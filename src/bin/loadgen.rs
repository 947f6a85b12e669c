//! Load generator binary

use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use textgen_serving::loadgen::{self, LoadProfile};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "textgen-loadgen")]
#[command(about = "Drive weighted traffic against the text generation service")]
struct Args {
    /// Base URL of the service
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    host: String,

    /// Concurrent simulated users
    #[arg(long, default_value = "10")]
    users: usize,

    /// Run length in seconds
    #[arg(long, default_value = "60")]
    duration_secs: u64,

    /// Minimum think time between a user's requests
    #[arg(long, default_value = "1000")]
    min_wait_ms: u64,

    /// Maximum think time between a user's requests
    #[arg(long, default_value = "5000")]
    max_wait_ms: u64,

    /// Relative weight of GET /
    #[arg(long, default_value = "2")]
    root_weight: u32,

    /// Relative weight of GET /items/{id}
    #[arg(long, default_value = "1")]
    item_weight: u32,

    /// Relative weight of POST /generate
    #[arg(long, default_value = "0")]
    generate_weight: u32,

    /// Prompt sent to /generate
    #[arg(long, default_value = "Once upon a time")]
    prompt: String,

    /// Stop each user after this many requests
    #[arg(long)]
    requests_per_user: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let profile = LoadProfile {
        host: args.host,
        users: args.users,
        duration: Duration::from_secs(args.duration_secs),
        min_wait: Duration::from_millis(args.min_wait_ms),
        max_wait: Duration::from_millis(args.max_wait_ms),
        root_weight: args.root_weight,
        item_weight: args.item_weight,
        generate_weight: args.generate_weight,
        prompt: args.prompt,
        requests_per_user: args.requests_per_user,
    };

    let report = loadgen::run(profile).await?;
    println!("{}", report);

    Ok(())
}
