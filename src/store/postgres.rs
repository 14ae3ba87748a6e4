//! Postgres-backed store

use super::ObservationStore;
use crate::config::DatabaseConfig;
use crate::error::PipelineError;
use crate::types::{PredictionRecord, RawBikeObservation, RawWeatherObservation};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgExecutor;
use sqlx::types::Json;
use std::time::Duration;
use tracing::info;

const SCHEMA: [&str; 5] = [
    r#"CREATE TABLE IF NOT EXISTS raw_bikes (
        id BIGSERIAL PRIMARY KEY,
        network_id TEXT NOT NULL,
        ingested_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        payload JSONB NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS raw_weather (
        id BIGSERIAL PRIMARY KEY,
        lat DOUBLE PRECISION NOT NULL,
        lon DOUBLE PRECISION NOT NULL,
        ingested_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        payload JSONB NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS prediction_logs (
        id UUID PRIMARY KEY,
        features JSONB NOT NULL,
        predicted_class SMALLINT NOT NULL,
        probability DOUBLE PRECISION NOT NULL,
        model_version TEXT NOT NULL,
        latency_ms DOUBLE PRECISION NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS raw_bikes_ingested_at_idx ON raw_bikes (ingested_at)",
    "CREATE INDEX IF NOT EXISTS raw_weather_ingested_at_idx ON raw_weather (ingested_at)",
];

/// Store on a pooled Postgres connection
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect eagerly; fails if the database is unreachable.
    pub async fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, PipelineError> {
        let pool = pool_options(config).connect(url).await?;
        info!(max_connections = config.max_connections, "Connected to Postgres");
        Ok(Self { pool })
    }

    /// Build a pool that opens connections on first use.
    pub fn connect_lazy(url: &str, config: &DatabaseConfig) -> Result<Self, PipelineError> {
        let pool = pool_options(config).connect_lazy(url)?;
        Ok(Self { pool })
    }

    /// Create the tables and indexes if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), PipelineError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn pool_options(config: &DatabaseConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
}

async fn insert_bike_row<'e, E: PgExecutor<'e>>(
    executor: E,
    observation: &RawBikeObservation,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO raw_bikes (network_id, ingested_at, payload) VALUES ($1, $2, $3)")
        .bind(&observation.network_id)
        .bind(observation.ingested_at)
        .bind(&observation.payload)
        .execute(executor)
        .await?;
    Ok(())
}

async fn insert_weather_row<'e, E: PgExecutor<'e>>(
    executor: E,
    observation: &RawWeatherObservation,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO raw_weather (lat, lon, ingested_at, payload) VALUES ($1, $2, $3, $4)")
        .bind(observation.lat)
        .bind(observation.lon)
        .bind(observation.ingested_at)
        .bind(&observation.payload)
        .execute(executor)
        .await?;
    Ok(())
}

fn row_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl ObservationStore for PgStore {
    async fn insert_bikes(&self, observation: &RawBikeObservation) -> Result<(), PipelineError> {
        insert_bike_row(&self.pool, observation).await?;
        Ok(())
    }

    async fn insert_weather(
        &self,
        observation: &RawWeatherObservation,
    ) -> Result<(), PipelineError> {
        insert_weather_row(&self.pool, observation).await?;
        Ok(())
    }

    async fn insert_snapshot(
        &self,
        bikes: &RawBikeObservation,
        weather: &RawWeatherObservation,
    ) -> Result<(), PipelineError> {
        // Dropped before commit means rolled back
        let mut tx = self.pool.begin().await?;
        insert_bike_row(&mut *tx, bikes).await?;
        insert_weather_row(&mut *tx, weather).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn latest_bikes(&self, limit: usize) -> Result<Vec<RawBikeObservation>, PipelineError> {
        let rows = sqlx::query_as::<_, RawBikeObservation>(
            "SELECT network_id, ingested_at, payload FROM raw_bikes ORDER BY ingested_at DESC, id DESC LIMIT $1",
        )
        .bind(row_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn latest_weather(
        &self,
        limit: usize,
    ) -> Result<Vec<RawWeatherObservation>, PipelineError> {
        let rows = sqlx::query_as::<_, RawWeatherObservation>(
            "SELECT lat, lon, ingested_at, payload FROM raw_weather ORDER BY ingested_at DESC, id DESC LIMIT $1",
        )
        .bind(row_limit(limit))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn all_bikes(&self) -> Result<Vec<RawBikeObservation>, PipelineError> {
        let rows = sqlx::query_as::<_, RawBikeObservation>(
            "SELECT network_id, ingested_at, payload FROM raw_bikes ORDER BY ingested_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn all_weather(&self) -> Result<Vec<RawWeatherObservation>, PipelineError> {
        let rows = sqlx::query_as::<_, RawWeatherObservation>(
            "SELECT lat, lon, ingested_at, payload FROM raw_weather ORDER BY ingested_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn log_prediction(&self, record: &PredictionRecord) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT INTO prediction_logs \
             (id, features, predicted_class, probability, model_version, latency_ms, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(record.id)
        .bind(Json(&record.features))
        .bind(i16::from(record.predicted_class))
        .bind(record.probability)
        .bind(&record.model_version)
        .bind(record.latency_ms)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
