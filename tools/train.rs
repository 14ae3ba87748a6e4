//! Training CLI
//!
//! Trains on synthetic data (`--synthetic`) or on the joined observation
//! history in the store, and writes the artifacts to one directory.

use anyhow::{bail, Context, Result};
use bikeshare_livelab::{
    config::AppConfig,
    dataset::{build_training_frame, generate_synthetic_frame, TrainingFrame},
    labels::LabelRule,
    logging,
    models::{
        artifacts,
        trainer::{train, TrainOptions},
    },
    store::{ObservationStore, PgStore},
};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "livelab-train", about = "Train the bike availability classifier")]
struct Args {
    /// Configuration file
    #[arg(long, default_value = bikeshare_livelab::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Train on generated data instead of the store
    #[arg(long)]
    synthetic: bool,

    /// Synthetic sample count, overrides training.n_samples
    #[arg(long)]
    n_samples: Option<usize>,

    /// Output directory, overrides training.artifact_dir
    #[arg(long)]
    artifact_dir: Option<PathBuf>,

    /// Seed for generation and splitting, overrides training.seed
    #[arg(long)]
    seed: Option<u64>,

    /// Postgres URL, overrides database.url
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = AppConfig::load_from_path(&args.config)?;
    if let Some(n) = args.n_samples {
        config.training.n_samples = n;
    }
    if let Some(dir) = args.artifact_dir {
        config.training.artifact_dir = dir;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }
    if let Some(url) = args.database_url {
        config.database.url = Some(url);
    }

    logging::init(&config.logging);
    let training = &config.training;

    let (frame, rule) = if args.synthetic {
        info!(n_samples = training.n_samples, seed = training.seed, "Generating synthetic data");
        (
            generate_synthetic_frame(training.n_samples, training.seed),
            LabelRule::synthetic(),
        )
    } else {
        let frame = load_store_frame(&config).await?;
        let rule = LabelRule::q20(&frame, training.min_rows)?;
        (frame, rule)
    };

    let labels = rule.apply(&frame);
    let options = TrainOptions {
        test_fraction: training.test_fraction,
        seed: training.seed,
        max_iter: training.max_iter,
    };
    let outcome = train(&frame, &labels, &rule, &options)?;
    let paths = artifacts::save(&training.artifact_dir, &outcome)?;

    info!(
        model = %paths.model.display(),
        metadata = %paths.metadata.display(),
        metrics = %paths.metrics.display(),
        "Artifacts written"
    );
    println!("{}", serde_json::to_string_pretty(&outcome.metrics)?);
    Ok(())
}

async fn load_store_frame(config: &AppConfig) -> Result<TrainingFrame> {
    let Some(url) = config.database.url.as_deref() else {
        bail!("No database configured; pass --synthetic or set database.url");
    };
    let store = PgStore::connect(url, &config.database)
        .await
        .context("Failed to connect to the observation store")?;

    let bikes = store.all_bikes().await?;
    let weather = store.all_weather().await?;
    info!(bikes = bikes.len(), weather = weather.len(), "Loaded observation history");

    let tolerance = chrono::Duration::minutes(config.training.join_tolerance_mins);
    Ok(build_training_frame(&bikes, &weather, tolerance))
}
