//! Prometheus metrics for the inference service.
//!
//! Metrics are recorded through the `metrics` facade. The Prometheus recorder
//! is installed once per process and its handle renders the text exposition
//! served at `/metrics`. Until it is installed every recording call is a no-op,
//! so library code can record unconditionally.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use parking_lot::{const_mutex, Mutex};
use std::time::Duration;
use tracing::info;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const PREDICTION_SCORE: &str = "prediction_score";
pub const MODEL_LOADED: &str = "model_loaded";
pub const PREDICTIONS_TOTAL: &str = "predictions_total";

const LATENCY_BUCKETS: [f64; 10] = [0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0];
const SCORE_BUCKETS: [f64; 9] = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9];

static RECORDER: Mutex<Option<PrometheusHandle>> = const_mutex(None);

/// Handle on the process-wide Prometheus recorder
#[derive(Clone)]
pub struct ServiceMetrics {
    handle: PrometheusHandle,
}

impl ServiceMetrics {
    /// Install the recorder, or reuse the one already installed.
    pub fn install() -> Result<Self, BuildError> {
        let mut slot = RECORDER.lock();
        if let Some(handle) = slot.as_ref() {
            return Ok(Self {
                handle: handle.clone(),
            });
        }

        let handle = PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Full(HTTP_REQUEST_DURATION.to_string()), &LATENCY_BUCKETS)?
            .set_buckets_for_metric(Matcher::Full(PREDICTION_SCORE.to_string()), &SCORE_BUCKETS)?
            .install_recorder()?;
        info!("Prometheus recorder installed");

        *slot = Some(handle.clone());
        Ok(Self { handle })
    }

    /// Prometheus text exposition of everything recorded so far
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Count one finished HTTP request and its latency.
pub fn record_request(endpoint: &str, status: u16, elapsed: Duration) {
    counter!(
        HTTP_REQUESTS_TOTAL,
        "endpoint" => endpoint.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(HTTP_REQUEST_DURATION, "endpoint" => endpoint.to_string())
        .record(elapsed.as_secs_f64());
}

/// Record a served prediction.
pub fn record_prediction(class: u8, proba: f64) {
    histogram!(PREDICTION_SCORE).record(proba);
    counter!(PREDICTIONS_TOTAL, "class" => class.to_string()).increment(1);
}

pub fn set_model_loaded(loaded: bool) {
    gauge!(MODEL_LOADED).set(if loaded { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_install_is_idempotent_and_renders_recorded_series() {
        let first = ServiceMetrics::install().unwrap();
        let second = ServiceMetrics::install().unwrap();

        record_request("/unit-test", 200, Duration::from_millis(3));
        record_prediction(1, 0.83);
        set_model_loaded(true);

        let text = second.render();
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("endpoint=\"/unit-test\""));
        assert!(text.contains("prediction_score"));
        assert!(text.contains("model_loaded"));
        assert!(first.render().contains("predictions_total"));
    }
}
