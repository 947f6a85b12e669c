//! Main entry point for the text generation service

use std::sync::Arc;

use textgen_serving::{
    api,
    backend::{self, ModelProvider},
    config::{LogFormat, LoggingConfig, Settings},
    metrics::Metrics,
    AppState,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    init_logging(&settings.logging);

    let mut runtime = tokio::runtime::Builder::new_multi_thread();
    runtime.enable_all();
    if let Some(workers) = settings.server.workers {
        runtime.worker_threads(workers);
    }

    runtime.build()?.block_on(run(settings))
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    match config.format {
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    info!("Starting text generation service");
    info!(
        address = %settings.bind_address(),
        models = ?settings.models.model_names(),
        deadline_ms = settings.inference.deadline_ms,
        lane_size = settings.inference.lane_size(),
        "Loaded configuration"
    );

    let loader = backend::default_loader(&settings.models);
    let models = Arc::new(ModelProvider::from_config(loader, &settings.models));
    if settings.models.preload {
        models.preload();
    } else {
        info!("Model preload disabled; models load on the first generation request");
    }

    let metrics = Arc::new(Metrics::new()?);
    let addr = settings.bind_address();
    let state = Arc::new(AppState::new(settings, models, metrics));

    // Build the router
    let app = api::routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Wait for shutdown signals
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
    info!("Shutdown signal received, draining in-flight requests");
}
