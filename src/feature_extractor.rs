//! Feature extraction shared by the trainer and the inference service.
//!
//! Raw upstream payloads are mapped onto a fixed, ordered set of eight
//! numeric features. The order of [`FEATURE_NAMES`] is the column order the
//! trainer fits on and the order recorded in artifact metadata.

use crate::error::PipelineError;
use crate::types::observation::{BikeNetworkPayload, WeatherPayload};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Feature names in training column order.
pub const FEATURE_NAMES: [&str; 8] = [
    "stations_count",
    "free_bikes",
    "empty_slots",
    "total_slots",
    "free_ratio",
    "temp_2m",
    "precipitation",
    "wind_speed_10m",
];

/// Features derived from one bike network snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BikeFeatures {
    pub stations_count: f64,
    pub free_bikes: f64,
    pub empty_slots: f64,
    pub total_slots: f64,
    pub free_ratio: f64,
}

impl BikeFeatures {
    /// Build from summed counts, deriving `total_slots` and `free_ratio`.
    pub fn from_counts(stations_count: f64, free_bikes: f64, empty_slots: f64) -> Self {
        let total_slots = free_bikes + empty_slots;
        let free_ratio = if total_slots > 0.0 {
            free_bikes / total_slots
        } else {
            0.0
        };
        Self {
            stations_count,
            free_bikes,
            empty_slots,
            total_slots,
            free_ratio,
        }
    }

    /// Named values in [`FEATURE_NAMES`] order.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            (FEATURE_NAMES[0], self.stations_count),
            (FEATURE_NAMES[1], self.free_bikes),
            (FEATURE_NAMES[2], self.empty_slots),
            (FEATURE_NAMES[3], self.total_slots),
            (FEATURE_NAMES[4], self.free_ratio),
        ]
    }
}

/// Features derived from one weather observation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherFeatures {
    pub temp_2m: f64,
    pub precipitation: f64,
    pub wind_speed_10m: f64,
}

impl WeatherFeatures {
    /// Named values in [`FEATURE_NAMES`] order.
    pub fn entries(&self) -> [(&'static str, f64); 3] {
        [
            (FEATURE_NAMES[5], self.temp_2m),
            (FEATURE_NAMES[6], self.precipitation),
            (FEATURE_NAMES[7], self.wind_speed_10m),
        ]
    }
}

/// The complete model input row.
///
/// Every field is a finite number; absent source data is represented as `0.0`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub stations_count: f64,
    pub free_bikes: f64,
    pub empty_slots: f64,
    pub total_slots: f64,
    pub free_ratio: f64,
    pub temp_2m: f64,
    pub precipitation: f64,
    pub wind_speed_10m: f64,
}

impl FeatureVector {
    /// Combine bike and weather partials into a full row.
    pub fn from_parts(bike: BikeFeatures, weather: WeatherFeatures) -> Self {
        Self {
            stations_count: bike.stations_count,
            free_bikes: bike.free_bikes,
            empty_slots: bike.empty_slots,
            total_slots: bike.total_slots,
            free_ratio: bike.free_ratio,
            temp_2m: weather.temp_2m,
            precipitation: weather.precipitation,
            wind_speed_10m: weather.wind_speed_10m,
        }
    }

    /// Values in [`FEATURE_NAMES`] order.
    pub fn values(&self) -> [f64; 8] {
        [
            self.stations_count,
            self.free_bikes,
            self.empty_slots,
            self.total_slots,
            self.free_ratio,
            self.temp_2m,
            self.precipitation,
            self.wind_speed_10m,
        ]
    }
}

/// Extract bike features from a CityBikes network payload.
///
/// Counts are summed over every station that reports them; stations without
/// counts still contribute to `stations_count`.
pub fn extract_bike_features(payload: &Value) -> Result<BikeFeatures, PipelineError> {
    let parsed: BikeNetworkPayload = decode_mapping(payload, "bike network")?;
    let stations = parsed
        .network
        .and_then(|n| n.stations)
        .unwrap_or_default();

    let free_bikes: f64 = stations.iter().filter_map(|s| s.free_bikes).sum();
    let empty_slots: f64 = stations.iter().filter_map(|s| s.empty_slots).sum();

    Ok(BikeFeatures::from_counts(
        stations.len() as f64,
        free_bikes,
        empty_slots,
    ))
}

/// Extract weather features from an Open-Meteo `current` payload.
pub fn extract_weather_features(payload: &Value) -> Result<WeatherFeatures, PipelineError> {
    let parsed: WeatherPayload = decode_mapping(payload, "weather")?;
    let current = parsed.current.unwrap_or_default();

    Ok(WeatherFeatures {
        temp_2m: current.temperature_2m.unwrap_or(0.0),
        precipitation: current.precipitation.unwrap_or(0.0),
        wind_speed_10m: current.wind_speed_10m.unwrap_or(0.0),
    })
}

/// Decode a payload that must be a JSON object.
///
/// Payloads stored as JSON text are parsed first.
fn decode_mapping<T: DeserializeOwned>(payload: &Value, what: &str) -> Result<T, PipelineError> {
    let owned;
    let object = match payload {
        Value::Object(_) => payload,
        Value::String(text) => {
            owned = serde_json::from_str::<Value>(text)
                .map_err(|e| PipelineError::malformed(format!("{what} payload: {e}")))?;
            if !owned.is_object() {
                return Err(PipelineError::malformed(format!(
                    "{what} payload is not a JSON object"
                )));
            }
            &owned
        }
        other => {
            return Err(PipelineError::malformed(format!(
                "{what} payload is not a JSON object: {}",
                json_type(other)
            )))
        }
    };

    T::deserialize(object).map_err(|e| PipelineError::malformed(format!("{what} payload: {e}")))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
