//! Artifact loader

use crate::error::PipelineError;
use crate::models::artifacts::{read_json, ArtifactMetadata, ArtifactPaths};
use crate::models::pipeline::FittedPipeline;
use std::path::{Path, PathBuf};
use tracing::info;

/// A validated model ready for serving
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub pipeline: FittedPipeline,
    pub metadata: ArtifactMetadata,
}

impl LoadedModel {
    pub fn version(&self) -> &str {
        &self.metadata.model_version
    }

    pub fn features(&self) -> &[String] {
        &self.metadata.features
    }
}

/// Loader for the artifacts in one directory
#[derive(Debug, Clone)]
pub struct ModelLoader {
    artifact_dir: PathBuf,
}

impl ModelLoader {
    pub fn new(artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn artifact_dir(&self) -> &Path {
        &self.artifact_dir
    }

    /// Read and cross-check `metadata.json` and `model.json`.
    ///
    /// Fails with `ArtifactMissing` when either file is absent, and with an
    /// artifact error when they describe different models.
    pub fn load(&self) -> Result<LoadedModel, PipelineError> {
        let paths = ArtifactPaths::in_dir(&self.artifact_dir);
        if !paths.metadata.exists() || !paths.model.exists() {
            return Err(PipelineError::ArtifactMissing(
                self.artifact_dir.display().to_string(),
            ));
        }

        info!(path = %self.artifact_dir.display(), "Loading model artifacts");

        let metadata: ArtifactMetadata = read_json(&paths.metadata)?;
        let pipeline: FittedPipeline = read_json(&paths.model)?;
        pipeline.validate()?;

        if pipeline.model_version != metadata.model_version {
            return Err(PipelineError::artifact(format!(
                "model version {} does not match metadata version {}",
                pipeline.model_version, metadata.model_version
            )));
        }
        if pipeline.features != metadata.features {
            return Err(PipelineError::artifact(
                "model feature order does not match metadata",
            ));
        }

        info!(
            model_version = %metadata.model_version,
            features = metadata.features.len(),
            "Model loaded successfully"
        );

        Ok(LoadedModel { pipeline, metadata })
    }
}
