//! Configuration management for the ingestion, training and serving binaries

use crate::error::PipelineError;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default location of the optional configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/livelab.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub ingestion: IngestionConfig,
    pub training: TrainingConfig,
    pub server: ServerConfig,
    pub explainer: ExplainerConfig,
    pub logging: LoggingConfig,
}

/// Relational store connection configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Postgres connection URL; no store is used when unset
    pub url: Option<String>,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// Seconds to wait for a connection before failing the operation
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            acquire_timeout_secs: 5,
        }
    }
}

/// Upstream data sources polled by the ingestion loop
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestionConfig {
    /// CityBikes network identifier
    pub network_id: String,
    /// Latitude used for the weather query
    pub lat: f64,
    /// Longitude used for the weather query
    pub lon: f64,
    /// Seconds to sleep between loop cycles
    pub sleep_secs: u64,
    /// Per-request HTTP timeout
    pub http_timeout_secs: u64,
    pub bikes_base_url: String,
    pub weather_base_url: String,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            network_id: "bicincitta-siena".to_string(),
            lat: 45.0703,
            lon: 7.6869,
            sleep_secs: 300,
            http_timeout_secs: 15,
            bikes_base_url: "https://api.citybik.es/v2/networks".to_string(),
            weather_base_url: "https://api.open-meteo.com/v1/forecast".to_string(),
        }
    }
}

/// Offline training configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Directory receiving model.json, metadata.json and metrics.json
    pub artifact_dir: PathBuf,
    /// Synthetic sample count
    pub n_samples: usize,
    /// Seed for the synthetic generator and the train/test split
    pub seed: u64,
    /// Minimum rows required in store mode
    pub min_rows: usize,
    /// As-of join tolerance between bike and weather observations
    pub join_tolerance_mins: i64,
    /// Held-out share of rows
    pub test_fraction: f64,
    /// Iteration cap for the classifier solver
    pub max_iter: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            artifact_dir: PathBuf::from("artifacts"),
            n_samples: 400,
            seed: 42,
            min_rows: 20,
            join_tolerance_mins: 30,
            test_fraction: 0.25,
            max_iter: 500,
        }
    }
}

/// Inference API configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Artifact directory to serve from (falls back to `training.artifact_dir`)
    pub artifact_dir: Option<PathBuf>,
    /// Persist a prediction record for each served prediction
    pub log_predictions: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            artifact_dir: None,
            log_predictions: true,
        }
    }
}

/// Optional language-model backend for `/explain`
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExplainerConfig {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 10,
        }
    }
}

impl ExplainerConfig {
    /// True when both an endpoint and a key are configured
    pub fn remote_enabled(&self) -> bool {
        matches!((&self.base_url, &self.api_key), (Some(u), Some(k)) if !u.is_empty() && !k.is_empty())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific file, layered under `LIVELAB__*` variables
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, PipelineError> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()).required(false))
            .add_source(
                Environment::with_prefix("LIVELAB")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Artifact directory the inference service reads from
    pub fn serving_artifact_dir(&self) -> PathBuf {
        self.server
            .artifact_dir
            .clone()
            .unwrap_or_else(|| self.training.artifact_dir.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.ingestion.network_id, "bicincitta-siena");
        assert_eq!(config.ingestion.sleep_secs, 300);
        assert_eq!(config.training.min_rows, 20);
        assert_eq!(config.training.join_tolerance_mins, 30);
        assert_eq!(config.training.n_samples, 400);
        assert!(config.database.url.is_none());
        assert!(!config.explainer.remote_enabled());
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[training]
artifact_dir = "/tmp/models"
n_samples = 800

[server]
bind_addr = "127.0.0.1:9000"

[logging]
format = "json"
"#
        )
        .unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.training.artifact_dir, PathBuf::from("/tmp/models"));
        assert_eq!(config.training.n_samples, 800);
        // Unspecified fields keep their defaults
        assert_eq!(config.training.seed, 42);
        assert_eq!(config.server.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.serving_artifact_dir(), PathBuf::from("/tmp/models"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = AppConfig::load_from_path("/nonexistent/livelab.toml").unwrap();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn test_invalid_value_is_a_config_error() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[training]\nn_samples = \"many\"").unwrap();

        let err = AppConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)), "{err:?}");
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_remote_explainer_requires_url_and_key() {
        let mut cfg = ExplainerConfig::default();
        cfg.base_url = Some("http://localhost:1234/v1".into());
        assert!(!cfg.remote_enabled());
        cfg.api_key = Some("secret".into());
        assert!(cfg.remote_enabled());
    }
}
