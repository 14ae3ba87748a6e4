//! Raw observations as stored by the ingestion loop, and the upstream payload shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

/// One CityBikes network snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RawBikeObservation {
    /// Network identifier the snapshot was fetched for
    pub network_id: String,

    /// Time the row was written by ingestion
    pub ingested_at: DateTime<Utc>,

    /// Upstream JSON, stored verbatim
    pub payload: Value,
}

impl RawBikeObservation {
    pub fn new(network_id: impl Into<String>, ingested_at: DateTime<Utc>, payload: Value) -> Self {
        Self {
            network_id: network_id.into(),
            ingested_at,
            payload,
        }
    }
}

/// One Open-Meteo "current conditions" response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct RawWeatherObservation {
    pub lat: f64,
    pub lon: f64,

    /// Time the row was written by ingestion
    pub ingested_at: DateTime<Utc>,

    /// Upstream JSON, stored verbatim
    pub payload: Value,
}

impl RawWeatherObservation {
    pub fn new(lat: f64, lon: f64, ingested_at: DateTime<Utc>, payload: Value) -> Self {
        Self {
            lat,
            lon,
            ingested_at,
            payload,
        }
    }
}

/// Top level of a CityBikes `/networks/{id}` response.
///
/// Only the fields used for features are modelled; everything else is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct BikeNetworkPayload {
    #[serde(default)]
    pub network: Option<NetworkBody>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NetworkBody {
    #[serde(default)]
    pub stations: Option<Vec<StationPayload>>,
}

/// A single dock station; counts are absent for some stations
#[derive(Debug, Default, Deserialize)]
pub struct StationPayload {
    #[serde(default)]
    pub free_bikes: Option<f64>,
    #[serde(default)]
    pub empty_slots: Option<f64>,
}

/// Top level of an Open-Meteo forecast response requested with `current=...`
#[derive(Debug, Default, Deserialize)]
pub struct WeatherPayload {
    #[serde(default)]
    pub current: Option<CurrentConditions>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CurrentConditions {
    #[serde(default)]
    pub temperature_2m: Option<f64>,
    #[serde(default)]
    pub precipitation: Option<f64>,
    #[serde(default)]
    pub wind_speed_10m: Option<f64>,
}
