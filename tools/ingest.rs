//! Ingestion CLI
//!
//! Fetches bike-share and weather snapshots into the observation store, once
//! or on a fixed interval.

use anyhow::{bail, Context, Result};
use bikeshare_livelab::{
    config::AppConfig,
    ingestion::{Collector, HttpSource},
    logging,
    store::PgStore,
};
use clap::{ArgGroup, Parser};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "livelab-ingest", about = "Collect bike and weather observations")]
#[command(group(ArgGroup::new("mode").required(true).args(["once", "run_loop"])))]
struct Args {
    /// Configuration file
    #[arg(long, default_value = bikeshare_livelab::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,

    /// Run cycles until interrupted
    #[arg(long = "loop")]
    run_loop: bool,

    /// Seconds between cycles, overrides ingestion.sleep_secs
    #[arg(long)]
    sleep: Option<u64>,

    /// Stop after this many cycles
    #[arg(long, requires = "run_loop")]
    max_cycles: Option<usize>,

    /// Postgres URL, overrides database.url
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load_from_path(&args.config)?;
    if let Some(sleep) = args.sleep {
        config.ingestion.sleep_secs = sleep;
    }
    if let Some(url) = args.database_url {
        config.database.url = Some(url);
    }

    logging::init(&config.logging);

    let Some(url) = config.database.url.as_deref() else {
        bail!("No database configured; set database.url or DATABASE_URL");
    };
    let store = PgStore::connect(url, &config.database)
        .await
        .context("Failed to connect to the observation store")?;
    store.ensure_schema().await?;

    let source = HttpSource::new(&config.ingestion)?;
    let collector = Collector::new(Arc::new(source), Arc::new(store), &config.ingestion);

    info!(
        network_id = %config.ingestion.network_id,
        lat = config.ingestion.lat,
        lon = config.ingestion.lon,
        "Starting ingestion"
    );

    if args.once {
        // One-shot failures are fatal
        collector.run_once().await?;
        return Ok(());
    }

    let sleep = Duration::from_secs(config.ingestion.sleep_secs);
    tokio::select! {
        summary = collector.run_loop(sleep, args.max_cycles) => {
            info!(succeeded = summary.succeeded, failed = summary.failed, "Ingestion stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping ingestion");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_mode_is_required() {
        let err = Args::try_parse_from(["livelab-ingest"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_modes_are_exclusive() {
        let err = Args::try_parse_from(["livelab-ingest", "--once", "--loop"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_loop_options_parse() {
        let args =
            Args::try_parse_from(["livelab-ingest", "--loop", "--sleep", "5", "--max-cycles", "2"])
                .unwrap();
        assert!(args.run_loop);
        assert!(!args.once);
        assert_eq!(args.sleep, Some(5));
        assert_eq!(args.max_cycles, Some(2));

        let err = Args::try_parse_from(["livelab-ingest", "--once", "--max-cycles", "2"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }
}
