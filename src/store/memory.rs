//! In-process store used by tests and store-less runs

use super::ObservationStore;
use crate::error::PipelineError;
use crate::types::{PredictionRecord, RawBikeObservation, RawWeatherObservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

#[derive(Debug, Default)]
struct Tables {
    bikes: Vec<RawBikeObservation>,
    weather: Vec<RawWeatherObservation>,
    predictions: Vec<PredictionRecord>,
}

/// Vec-backed store; rows keep insertion order
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Logged predictions, oldest first
    pub fn predictions(&self) -> Vec<PredictionRecord> {
        self.tables.lock().predictions.clone()
    }

    pub fn bike_count(&self) -> usize {
        self.tables.lock().bikes.len()
    }

    pub fn weather_count(&self) -> usize {
        self.tables.lock().weather.len()
    }
}

/// Newest `limit` rows, newest first; equal timestamps favour the later insert.
fn newest<T: Clone>(rows: &[T], limit: usize, key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut indexed: Vec<(usize, &T)> = rows.iter().enumerate().collect();
    indexed.sort_by(|a, b| key(b.1).cmp(&key(a.1)).then(b.0.cmp(&a.0)));
    indexed.into_iter().take(limit).map(|(_, r)| r.clone()).collect()
}

fn oldest_first<T: Clone>(rows: &[T], key: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut all = rows.to_vec();
    all.sort_by_key(key);
    all
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn insert_bikes(&self, observation: &RawBikeObservation) -> Result<(), PipelineError> {
        self.tables.lock().bikes.push(observation.clone());
        Ok(())
    }

    async fn insert_weather(
        &self,
        observation: &RawWeatherObservation,
    ) -> Result<(), PipelineError> {
        self.tables.lock().weather.push(observation.clone());
        Ok(())
    }

    async fn insert_snapshot(
        &self,
        bikes: &RawBikeObservation,
        weather: &RawWeatherObservation,
    ) -> Result<(), PipelineError> {
        let mut tables = self.tables.lock();
        tables.bikes.push(bikes.clone());
        tables.weather.push(weather.clone());
        Ok(())
    }

    async fn latest_bikes(&self, limit: usize) -> Result<Vec<RawBikeObservation>, PipelineError> {
        Ok(newest(&self.tables.lock().bikes, limit, |r| r.ingested_at))
    }

    async fn latest_weather(
        &self,
        limit: usize,
    ) -> Result<Vec<RawWeatherObservation>, PipelineError> {
        Ok(newest(&self.tables.lock().weather, limit, |r| r.ingested_at))
    }

    async fn all_bikes(&self) -> Result<Vec<RawBikeObservation>, PipelineError> {
        Ok(oldest_first(&self.tables.lock().bikes, |r| r.ingested_at))
    }

    async fn all_weather(&self) -> Result<Vec<RawWeatherObservation>, PipelineError> {
        Ok(oldest_first(&self.tables.lock().weather, |r| r.ingested_at))
    }

    async fn log_prediction(&self, record: &PredictionRecord) -> Result<(), PipelineError> {
        self.tables.lock().predictions.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn bike(minute: u32, free: u32) -> RawBikeObservation {
        RawBikeObservation::new(
            "test-net",
            Utc.with_ymd_and_hms(2025, 3, 1, 8, minute, 0).unwrap(),
            json!({"network": {"stations": [{"free_bikes": free, "empty_slots": 1}]}}),
        )
    }

    #[tokio::test]
    async fn test_latest_is_newest_first() {
        let store = MemoryStore::new();
        for (minute, free) in [(10, 1), (30, 3), (20, 2)] {
            store.insert_bikes(&bike(minute, free)).await.unwrap();
        }

        let latest = store.latest_bikes(2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].payload["network"]["stations"][0]["free_bikes"], 3);
        assert_eq!(latest[1].payload["network"]["stations"][0]["free_bikes"], 2);

        let all = store.all_bikes().await.unwrap();
        let minutes: Vec<u32> = all
            .iter()
            .map(|r| r.ingested_at.format("%M").to_string().parse().unwrap())
            .collect();
        assert_eq!(minutes, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_weather_and_predictions_are_kept() {
        let store = MemoryStore::new();
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        store
            .insert_weather(&RawWeatherObservation::new(1.0, 2.0, at, json!({"current": {}})))
            .await
            .unwrap();
        assert_eq!(store.weather_count(), 1);
        assert_eq!(store.latest_weather(5).await.unwrap().len(), 1);
        assert!(store.latest_bikes(5).await.unwrap().is_empty());
        assert!(store.predictions().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_stores_both_rows() {
        let store = MemoryStore::new();
        let observed = bike(5, 4);
        let weather = RawWeatherObservation::new(1.0, 2.0, observed.ingested_at, json!({"current": {}}));
        store.insert_snapshot(&observed, &weather).await.unwrap();

        assert_eq!(store.bike_count(), 1);
        assert_eq!(store.weather_count(), 1);
        assert_eq!(
            store.latest_bikes(1).await.unwrap()[0].ingested_at,
            store.latest_weather(1).await.unwrap()[0].ingested_at
        );
    }
}
