//! Observation and prediction-log storage

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::PipelineError;
use crate::types::{PredictionRecord, RawBikeObservation, RawWeatherObservation};
use async_trait::async_trait;

/// Append-only store of raw observations plus the prediction log.
///
/// `latest_*` return newest first; `all_*` return oldest first.
/// `insert_snapshot` stores both rows of an ingestion cycle or neither.
#[async_trait]
pub trait ObservationStore: Send + Sync {
    async fn insert_bikes(&self, observation: &RawBikeObservation) -> Result<(), PipelineError>;

    async fn insert_weather(&self, observation: &RawWeatherObservation)
        -> Result<(), PipelineError>;

    async fn insert_snapshot(
        &self,
        bikes: &RawBikeObservation,
        weather: &RawWeatherObservation,
    ) -> Result<(), PipelineError>;

    async fn latest_bikes(&self, limit: usize) -> Result<Vec<RawBikeObservation>, PipelineError>;

    async fn latest_weather(&self, limit: usize)
        -> Result<Vec<RawWeatherObservation>, PipelineError>;

    async fn all_bikes(&self) -> Result<Vec<RawBikeObservation>, PipelineError>;

    async fn all_weather(&self) -> Result<Vec<RawWeatherObservation>, PipelineError>;

    async fn log_prediction(&self, record: &PredictionRecord) -> Result<(), PipelineError>;
}
