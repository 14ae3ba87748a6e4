//! On-disk artifact layout.
//!
//! A trained model is three JSON documents in one directory:
//! `model.json` (the fitted pipeline), `metrics.json` and `metadata.json`.
//! Each file is written to a temporary sibling and renamed into place, with
//! `metadata.json` last, so a reader that finds metadata also finds the model
//! it describes.

use crate::error::PipelineError;
use crate::models::trainer::TrainingOutcome;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MODEL_FILE: &str = "model.json";
pub const METRICS_FILE: &str = "metrics.json";
pub const METADATA_FILE: &str = "metadata.json";

/// Contents of `metadata.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub model_version: String,
    /// Feature order the model expects
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_rule: Option<String>,
}

/// Contents of `metrics.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub f1: f64,
    /// NaN when the held-out split has one class; stored as `null`
    #[serde(with = "nan_as_null")]
    pub roc_auc: f64,
    pub n_samples: usize,
    pub n_train: usize,
    pub n_test: usize,
    /// Decision threshold applied to probabilities
    pub threshold: f64,
    pub stratified: bool,
    #[serde(default)]
    pub iterations: usize,
}

/// Paths written by [`save`]
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub metrics: PathBuf,
    pub metadata: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            model: dir.join(MODEL_FILE),
            metrics: dir.join(METRICS_FILE),
            metadata: dir.join(METADATA_FILE),
        }
    }
}

/// Persist a training outcome into `dir`, creating it if needed.
pub fn save(dir: &Path, outcome: &TrainingOutcome) -> Result<ArtifactPaths, PipelineError> {
    fs::create_dir_all(dir)?;
    let paths = ArtifactPaths::in_dir(dir);

    write_json_atomic(&paths.model, &outcome.pipeline)?;
    write_json_atomic(&paths.metrics, &outcome.metrics)?;
    write_json_atomic(&paths.metadata, &outcome.metadata)?;

    info!(
        dir = %dir.display(),
        model_version = %outcome.metadata.model_version,
        "Saved model artifacts"
    );
    Ok(paths)
}

/// Read `metrics.json` from `dir`.
pub fn read_metrics(dir: &Path) -> Result<TrainingMetrics, PipelineError> {
    read_json(&dir.join(METRICS_FILE))
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, PipelineError> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

mod nan_as_null {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_finite() {
            serializer.serialize_f64(*value)
        } else {
            serializer.serialize_none()
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::NAN))
    }
}
