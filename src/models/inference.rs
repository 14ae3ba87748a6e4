//! Hot-swappable serving model.
//!
//! The loaded model, its version and its feature schema live together in one
//! [`LoadedModel`] behind an `Arc`. Readers clone the `Arc` under a short read
//! lock and predict without holding it; reload builds the replacement first
//! and swaps it in under the write lock.

use crate::error::PipelineError;
use crate::metrics;
use crate::models::loader::{LoadedModel, ModelLoader};
use crate::types::prediction::Prediction;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What `/model`, `/reload_model` and `/health` report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStatus {
    pub loaded: bool,
    pub version: Option<String>,
    pub features: Vec<String>,
    pub rule_name: Option<String>,
    pub threshold: Option<f64>,
}

impl ModelStatus {
    fn unloaded() -> Self {
        Self {
            loaded: false,
            version: None,
            features: Vec::new(),
            rule_name: None,
            threshold: None,
        }
    }

    fn from_model(model: &LoadedModel) -> Self {
        Self {
            loaded: true,
            version: Some(model.version().to_string()),
            features: model.features().to_vec(),
            rule_name: model.metadata.rule_name.clone(),
            threshold: model.metadata.threshold,
        }
    }
}

/// Feature-level explanation of one prediction
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureContribution {
    pub name: String,
    pub contribution: f64,
}

impl LoadedModel {
    /// Arrange `features` in schema order.
    ///
    /// Every schema name must be present; extra keys are ignored.
    pub fn ordered_row(&self, features: &BTreeMap<String, f64>) -> Result<Vec<f64>, PipelineError> {
        let mut missing = Vec::new();
        let mut row = Vec::with_capacity(self.features().len());
        for name in self.features() {
            match features.get(name) {
                Some(v) => row.push(*v),
                None => missing.push(name.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(PipelineError::MissingFeatures(missing));
        }
        Ok(row)
    }

    pub fn predict(&self, features: &BTreeMap<String, f64>) -> Result<Prediction, PipelineError> {
        let row = self.ordered_row(features)?;
        let proba = self.pipeline.predict_proba(&row);
        debug!(model_version = %self.version(), proba, "Prediction");
        Ok(Prediction::from_probability(proba, self.version()))
    }

    /// Contributions sorted by absolute size, largest first.
    pub fn top_contributions(
        &self,
        features: &BTreeMap<String, f64>,
        limit: usize,
    ) -> Result<Vec<FeatureContribution>, PipelineError> {
        let row = self.ordered_row(features)?;
        let mut terms = self.pipeline.contributions(&row);
        terms.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        Ok(terms
            .into_iter()
            .take(limit)
            .map(|(name, contribution)| FeatureContribution { name, contribution })
            .collect())
    }
}

/// Shared handle to the current serving model
pub struct ModelHandle {
    loader: ModelLoader,
    current: RwLock<Option<Arc<LoadedModel>>>,
}

impl ModelHandle {
    /// An empty handle reading from `artifact_dir`; call [`ModelHandle::load`] to populate.
    pub fn new(artifact_dir: impl AsRef<Path>) -> Self {
        Self {
            loader: ModelLoader::new(artifact_dir.as_ref()),
            current: RwLock::new(None),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        self.loader.artifact_dir()
    }

    /// Load the artifacts on disk, clearing the model on any failure.
    pub fn load(&self) -> ModelStatus {
        match self.reload() {
            Ok(status) => status,
            Err(e) => {
                warn!(
                    error = %e,
                    path = %self.artifact_dir().display(),
                    "Model not loaded, serving degraded"
                );
                ModelStatus::unloaded()
            }
        }
    }

    /// Replace the current model with the artifacts on disk.
    ///
    /// On failure the previous model is dropped, not kept.
    pub fn reload(&self) -> Result<ModelStatus, PipelineError> {
        match self.loader.load() {
            Ok(model) => {
                let status = ModelStatus::from_model(&model);
                self.swap(Some(Arc::new(model)));
                info!(model_version = ?status.version, "Serving model swapped in");
                Ok(status)
            }
            Err(e) => {
                self.swap(None);
                Err(e)
            }
        }
    }

    /// The model a request should use for its whole lifetime.
    pub fn snapshot(&self) -> Option<Arc<LoadedModel>> {
        self.current.read().clone()
    }

    pub fn status(&self) -> ModelStatus {
        self.snapshot()
            .map(|m| ModelStatus::from_model(&m))
            .unwrap_or_else(ModelStatus::unloaded)
    }

    /// Store `next` and publish it to the `model_loaded` gauge under one write lock.
    fn swap(&self, next: Option<Arc<LoadedModel>>) {
        let mut current = self.current.write();
        metrics::set_model_loaded(next.is_some());
        *current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::generate_synthetic_frame;
    use crate::feature_extractor::FEATURE_NAMES;
    use crate::labels::LabelRule;
    use crate::models::artifacts::save;
    use crate::models::trainer::{train, TrainOptions};

    fn write_artifacts(dir: &Path, seed: u64) {
        let frame = generate_synthetic_frame(120, seed);
        let rule = LabelRule::synthetic();
        let outcome = train(&frame, &rule.apply(&frame), &rule, &TrainOptions::default()).unwrap();
        save(dir, &outcome).unwrap();
    }

    fn full_features(free_ratio: f64) -> BTreeMap<String, f64> {
        let mut map: BTreeMap<String, f64> =
            FEATURE_NAMES.iter().map(|n| (n.to_string(), 1.0)).collect();
        map.insert("stations_count".into(), 50.0);
        map.insert("total_slots".into(), 40.0);
        map.insert("free_bikes".into(), (40.0 * free_ratio).round());
        map.insert("empty_slots".into(), 40.0 - (40.0 * free_ratio).round());
        map.insert("free_ratio".into(), free_ratio);
        map
    }

    #[test]
    fn test_load_missing_dir_is_degraded() {
        let dir = tempfile::tempdir().unwrap();
        let handle = ModelHandle::new(dir.path().join("nope"));

        let status = handle.load();
        assert!(!status.loaded);
        assert!(status.version.is_none());
        assert!(status.features.is_empty());
        assert!(handle.snapshot().is_none());
    }

    #[test]
    fn test_predict_after_load() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), 1);
        let handle = ModelHandle::new(dir.path());
        assert!(handle.load().loaded);

        let model = handle.snapshot().unwrap();
        let low = model.predict(&full_features(0.05)).unwrap();
        let high = model.predict(&full_features(0.7)).unwrap();

        assert_eq!(low.model_version, model.version());
        assert!(low.proba > high.proba);
        assert_eq!(low.y, u8::from(low.proba >= 0.5));
    }

    #[test]
    fn test_missing_features_are_named_in_schema_order() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), 2);
        let handle = ModelHandle::new(dir.path());
        handle.load();
        let model = handle.snapshot().unwrap();

        let mut features = full_features(0.4);
        features.remove("wind_speed_10m");
        features.remove("free_bikes");
        features.insert("unrelated".into(), 3.0);

        match model.predict(&features) {
            Err(PipelineError::MissingFeatures(missing)) => {
                assert_eq!(missing, vec!["free_bikes", "wind_speed_10m"]);
            }
            other => panic!("expected MissingFeatures, got {other:?}"),
        }
    }

    #[test]
    fn test_reload_without_artifacts_clears_model() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), 3);
        let handle = ModelHandle::new(dir.path());
        assert!(handle.load().loaded);

        for file in ["model.json", "metadata.json", "metrics.json"] {
            std::fs::remove_file(dir.path().join(file)).unwrap();
        }

        assert!(matches!(
            handle.reload(),
            Err(PipelineError::ArtifactMissing(_))
        ));
        assert!(handle.snapshot().is_none());
        assert!(!handle.status().loaded);
    }

    #[test]
    fn test_top_contributions_are_sorted_by_magnitude() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), 4);
        let handle = ModelHandle::new(dir.path());
        handle.load();
        let model = handle.snapshot().unwrap();

        let top = model.top_contributions(&full_features(0.1), 3).unwrap();
        assert_eq!(top.len(), 3);
        assert!(top[0].contribution.abs() >= top[1].contribution.abs());
        assert!(top[1].contribution.abs() >= top[2].contribution.abs());
    }
}
