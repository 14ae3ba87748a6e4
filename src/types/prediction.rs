//! Prediction outputs and the persisted prediction log record

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Decision threshold applied to the positive-class probability
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Result of scoring one feature row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Thresholded class (1 = station likely to run low on bikes)
    pub y: u8,

    /// Positive-class probability (0.0 - 1.0)
    pub proba: f64,

    /// Version of the artifact that produced the score
    pub model_version: String,
}

impl Prediction {
    pub fn from_probability(proba: f64, model_version: impl Into<String>) -> Self {
        Self {
            y: u8::from(proba >= DECISION_THRESHOLD),
            proba,
            model_version: model_version.into(),
        }
    }
}

/// Append-only log row written after each served prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,

    /// Feature mapping the model was scored on
    pub features: BTreeMap<String, f64>,

    pub predicted_class: u8,
    pub probability: f64,
    pub model_version: String,

    /// Wall time spent serving the request
    pub latency_ms: f64,

    pub created_at: DateTime<Utc>,
}

impl PredictionRecord {
    pub fn new(features: BTreeMap<String, f64>, prediction: &Prediction, latency_ms: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            features,
            predicted_class: prediction.y,
            probability: prediction.proba,
            model_version: prediction.model_version.clone(),
            latency_ms,
            created_at: Utc::now(),
        }
    }
}
