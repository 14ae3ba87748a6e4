//! Error types shared by the ingestion, training and serving paths.

use thiserror::Error;

/// Top-level error type for pipeline operations.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Not enough samples: {found} rows available, at least {required} required")]
    InsufficientData { found: usize, required: usize },

    #[error("Invalid request body: {0}")]
    InvalidRequest(String),

    #[error("Missing required features: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),

    #[error("Model not loaded")]
    ModelUnavailable,

    #[error("No model artifact found in {0}")]
    ArtifactMissing(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPayload(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        Self::Artifact(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    /// Stable tag reported to API callers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedPayload(_) => "malformed_payload",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::InvalidRequest(_) => "invalid_request",
            Self::MissingFeatures(_) => "missing_features",
            Self::ModelUnavailable => "model_unavailable",
            Self::ArtifactMissing(_) => "artifact_missing",
            Self::Artifact(_) => "artifact_error",
            Self::Training(_) => "training_error",
            Self::Store(_) => "store_error",
            Self::Fetch(_) => "fetch_error",
            Self::Config(_) => "config_error",
            Self::Io(_) => "io_error",
            Self::Serde(_) => "serialization_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_features_message_names_fields() {
        let err = PipelineError::MissingFeatures(vec!["free_ratio".into(), "temp_2m".into()]);
        assert_eq!(
            err.to_string(),
            "Missing required features: free_ratio, temp_2m"
        );
        assert_eq!(err.kind(), "missing_features");
    }

    #[test]
    fn test_kinds_are_distinct_for_serving_failures() {
        assert_ne!(
            PipelineError::ModelUnavailable.kind(),
            PipelineError::MissingFeatures(vec![]).kind()
        );
        assert_ne!(
            PipelineError::ModelUnavailable.kind(),
            PipelineError::ArtifactMissing("x".into()).kind()
        );
        assert_ne!(
            PipelineError::InvalidRequest("x".into()).kind(),
            PipelineError::MissingFeatures(vec![]).kind()
        );
    }
}
