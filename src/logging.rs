//! Tracing subscriber setup shared by all binaries.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Initialize the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise the crate logs at the configured level
/// and dependencies at `warn`.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,bikeshare_livelab={0},livelab_serve={0},livelab_ingest={0},livelab_train={0}",
            config.level
        ))
    });

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.try_init(),
    };

    // A subscriber may already be installed (tests, embedding)
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already initialized");
    }
}
