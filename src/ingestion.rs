//! Periodic collection of bike-share and weather snapshots

use crate::config::IngestionConfig;
use crate::error::PipelineError;
use crate::store::ObservationStore;
use crate::types::{RawBikeObservation, RawWeatherObservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

const WEATHER_FIELDS: &str = "temperature_2m,precipitation,wind_speed_10m";

/// Upstream provider of raw payloads
#[async_trait]
pub trait ObservationSource: Send + Sync {
    async fn fetch_bikes(&self, network_id: &str) -> Result<Value, PipelineError>;

    async fn fetch_weather(&self, lat: f64, lon: f64) -> Result<Value, PipelineError>;
}

/// CityBikes + Open-Meteo over HTTP
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    bikes_base_url: String,
    weather_base_url: String,
}

impl HttpSource {
    pub fn new(config: &IngestionConfig) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            bikes_base_url: config.bikes_base_url.trim_end_matches('/').to_string(),
            weather_base_url: config.weather_base_url.clone(),
        })
    }
}

#[async_trait]
impl ObservationSource for HttpSource {
    async fn fetch_bikes(&self, network_id: &str) -> Result<Value, PipelineError> {
        let url = format!("{}/{}", self.bikes_base_url, network_id);
        debug!(url = %url, "Fetching bike network");
        let payload = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(payload)
    }

    async fn fetch_weather(&self, lat: f64, lon: f64) -> Result<Value, PipelineError> {
        let payload = self
            .client
            .get(&self.weather_base_url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lon.to_string()),
                ("current", WEATHER_FIELDS.to_string()),
                ("timezone", "auto".to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await?;
        Ok(payload)
    }
}

/// Totals for a [`Collector::run_loop`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Fetches one bike and one weather snapshot per cycle and stores both
pub struct Collector {
    source: Arc<dyn ObservationSource>,
    store: Arc<dyn ObservationStore>,
    network_id: String,
    lat: f64,
    lon: f64,
}

impl Collector {
    pub fn new(
        source: Arc<dyn ObservationSource>,
        store: Arc<dyn ObservationStore>,
        config: &IngestionConfig,
    ) -> Self {
        Self {
            source,
            store,
            network_id: config.network_id.clone(),
            lat: config.lat,
            lon: config.lon,
        }
    }

    /// One cycle. Both payloads are fetched before anything is written, and
    /// the two rows are stored as one snapshot.
    pub async fn run_once(&self) -> Result<DateTime<Utc>, PipelineError> {
        let bikes = self.source.fetch_bikes(&self.network_id).await?;
        let weather = self.source.fetch_weather(self.lat, self.lon).await?;

        let ingested_at = Utc::now();
        self.store
            .insert_snapshot(
                &RawBikeObservation::new(&self.network_id, ingested_at, bikes),
                &RawWeatherObservation::new(self.lat, self.lon, ingested_at, weather),
            )
            .await?;

        info!(
            network_id = %self.network_id,
            ingested_at = %ingested_at,
            "Ingested bike and weather snapshot"
        );
        Ok(ingested_at)
    }

    /// Run cycles back to back with `sleep` between them.
    ///
    /// A failed cycle is logged and the loop carries on. Stops after
    /// `max_cycles` when given, otherwise runs until the task is dropped.
    pub async fn run_loop(&self, sleep: Duration, max_cycles: Option<usize>) -> LoopSummary {
        let mut summary = LoopSummary::default();
        let mut cycle = 0usize;

        loop {
            cycle += 1;
            match self.run_once().await {
                Ok(_) => summary.succeeded += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(cycle, error = %e, kind = e.kind(), "Ingestion cycle failed");
                }
            }

            if max_cycles.is_some_and(|max| cycle >= max) {
                break;
            }
            tokio::time::sleep(sleep).await;
        }

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Ingestion loop finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::PredictionRecord;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the weather fetch on the listed call numbers (1-based)
    struct ScriptedSource {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
    }

    impl ScriptedSource {
        fn new(fail_on: Vec<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
            }
        }
    }

    #[async_trait]
    impl ObservationSource for ScriptedSource {
        async fn fetch_bikes(&self, _network_id: &str) -> Result<Value, PipelineError> {
            Ok(json!({"network": {"stations": [{"free_bikes": 2, "empty_slots": 8}]}}))
        }

        async fn fetch_weather(&self, _lat: f64, _lon: f64) -> Result<Value, PipelineError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_on.contains(&call) {
                return Err(PipelineError::malformed("upstream unavailable"));
            }
            Ok(json!({"current": {"temperature_2m": 12.5, "precipitation": 0.0, "wind_speed_10m": 3.1}}))
        }
    }

    fn collector(source: ScriptedSource, store: Arc<MemoryStore>) -> Collector {
        Collector::new(Arc::new(source), store, &IngestionConfig::default())
    }

    #[tokio::test]
    async fn test_run_once_stores_both_rows_with_one_timestamp() {
        let store = Arc::new(MemoryStore::new());
        let at = collector(ScriptedSource::new(vec![]), store.clone())
            .run_once()
            .await
            .unwrap();

        let bikes = store.all_bikes().await.unwrap();
        let weather = store.all_weather().await.unwrap();
        assert_eq!(bikes.len(), 1);
        assert_eq!(weather.len(), 1);
        assert_eq!(bikes[0].ingested_at, at);
        assert_eq!(weather[0].ingested_at, at);
        assert_eq!(bikes[0].network_id, IngestionConfig::default().network_id);
    }

    #[tokio::test]
    async fn test_failed_fetch_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let result = collector(ScriptedSource::new(vec![1]), store.clone())
            .run_once()
            .await;

        assert!(result.is_err());
        assert_eq!(store.bike_count(), 0);
        assert_eq!(store.weather_count(), 0);
    }

    #[tokio::test]
    async fn test_loop_survives_failed_cycles() {
        let store = Arc::new(MemoryStore::new());
        let summary = collector(ScriptedSource::new(vec![2]), store.clone())
            .run_loop(Duration::from_millis(1), Some(3))
            .await;

        assert_eq!(
            summary,
            LoopSummary {
                succeeded: 2,
                failed: 1
            }
        );
        assert_eq!(store.bike_count(), 2);
        assert_eq!(store.weather_count(), 2);
    }

    /// Rejects single-row weather writes and snapshots on request
    struct StrictStore {
        inner: MemoryStore,
        reject_snapshots: bool,
    }

    #[async_trait]
    impl ObservationStore for StrictStore {
        async fn insert_bikes(&self, observation: &RawBikeObservation) -> Result<(), PipelineError> {
            self.inner.insert_bikes(observation).await
        }

        async fn insert_weather(
            &self,
            _observation: &RawWeatherObservation,
        ) -> Result<(), PipelineError> {
            Err(PipelineError::malformed("weather table unavailable"))
        }

        async fn insert_snapshot(
            &self,
            bikes: &RawBikeObservation,
            weather: &RawWeatherObservation,
        ) -> Result<(), PipelineError> {
            if self.reject_snapshots {
                return Err(PipelineError::malformed("weather table unavailable"));
            }
            self.inner.insert_snapshot(bikes, weather).await
        }

        async fn latest_bikes(&self, limit: usize) -> Result<Vec<RawBikeObservation>, PipelineError> {
            self.inner.latest_bikes(limit).await
        }

        async fn latest_weather(
            &self,
            limit: usize,
        ) -> Result<Vec<RawWeatherObservation>, PipelineError> {
            self.inner.latest_weather(limit).await
        }

        async fn all_bikes(&self) -> Result<Vec<RawBikeObservation>, PipelineError> {
            self.inner.all_bikes().await
        }

        async fn all_weather(&self) -> Result<Vec<RawWeatherObservation>, PipelineError> {
            self.inner.all_weather().await
        }

        async fn log_prediction(&self, record: &PredictionRecord) -> Result<(), PipelineError> {
            self.inner.log_prediction(record).await
        }
    }

    #[tokio::test]
    async fn test_cycle_is_written_as_one_snapshot() {
        let store = Arc::new(StrictStore {
            inner: MemoryStore::new(),
            reject_snapshots: false,
        });
        let collector = Collector::new(
            Arc::new(ScriptedSource::new(vec![])),
            store.clone(),
            &IngestionConfig::default(),
        );

        collector.run_once().await.unwrap();
        assert_eq!(store.inner.bike_count(), 1);
        assert_eq!(store.inner.weather_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_store_write_leaves_no_half_cycle() {
        let store = Arc::new(StrictStore {
            inner: MemoryStore::new(),
            reject_snapshots: true,
        });
        let collector = Collector::new(
            Arc::new(ScriptedSource::new(vec![])),
            store.clone(),
            &IngestionConfig::default(),
        );

        assert!(collector.run_once().await.is_err());
        assert_eq!(store.inner.bike_count(), 0);
        assert_eq!(store.inner.weather_count(), 0);
    }
}
