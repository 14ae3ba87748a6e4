//! Bike-share LiveLab Library
//!
//! Periodic ingestion of bike-share and weather snapshots, offline training of
//! a low-availability classifier, and an inference API serving the latest
//! trained artifacts.

pub mod config;
pub mod dataset;
pub mod error;
pub mod explainer;
pub mod feature_extractor;
pub mod ingestion;
pub mod labels;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod server;
pub mod store;
pub mod types;

pub use config::AppConfig;
pub use error::PipelineError;
pub use feature_extractor::{FeatureVector, FEATURE_NAMES};
pub use models::inference::ModelHandle;
pub use types::{Prediction, PredictionRecord, RawBikeObservation, RawWeatherObservation};
