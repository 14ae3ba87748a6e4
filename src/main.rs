//! LiveLab inference service - Main Entry Point
//!
//! Loads the latest model artifacts and serves predictions over HTTP. Starts
//! degraded when no artifacts are present; `/reload_model` picks them up later.

use anyhow::{Context, Result};
use bikeshare_livelab::{
    config::AppConfig,
    explainer,
    logging,
    metrics::ServiceMetrics,
    models::inference::ModelHandle,
    server::{self, AppState},
    store::PgStore,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(name = "livelab-serve", about = "Serve bike availability predictions")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = bikeshare_livelab::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Address to bind, overrides server.bind_addr
    #[arg(long)]
    bind: Option<String>,

    /// Artifact directory, overrides server.artifact_dir
    #[arg(long, env = "ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load_from_path(&args.config)?;
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(dir) = args.artifact_dir {
        config.server.artifact_dir = Some(dir);
    }

    logging::init(&config.logging);
    info!("Starting LiveLab inference service");

    let metrics = ServiceMetrics::install().context("Failed to install metrics recorder")?;

    let model = Arc::new(ModelHandle::new(config.serving_artifact_dir()));
    let status = model.load();
    info!(
        loaded = status.loaded,
        model_version = ?status.version,
        artifact_dir = %model.artifact_dir().display(),
        "Initial model load"
    );

    let mut state = AppState::new(model, metrics)
        .with_explainer(explainer::from_config(&config.explainer))
        .with_prediction_logging(config.server.log_predictions);

    match config.database.url.as_deref() {
        Some(url) => {
            let store = PgStore::connect_lazy(url, &config.database)?;
            if let Err(e) = store.ensure_schema().await {
                warn!(error = %e, "Could not prepare database schema; store features degraded");
            }
            state = state.with_store(Arc::new(store));
            info!("Observation store configured");
        }
        None => warn!("No database configured; /predict requires explicit features"),
    }

    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Inference service shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
