//! Inference HTTP API

use crate::error::PipelineError;
use crate::explainer::{Explainer, ExplanationSource, TemplateExplainer};
use crate::feature_extractor::{extract_bike_features, extract_weather_features};
use crate::metrics::{self, ServiceMetrics};
use crate::models::inference::{FeatureContribution, ModelHandle, ModelStatus};
use crate::models::loader::LoadedModel;
use crate::store::ObservationStore;
use crate::types::{Prediction, PredictionRecord};
use axum::body::Bytes;
use axum::extract::{FromRequest, MatchedPath, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const SERVICE_NAME: &str = "inference";
const TOP_FEATURES: usize = 3;
const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    model: Arc<ModelHandle>,
    metrics: ServiceMetrics,
    store: Option<Arc<dyn ObservationStore>>,
    explainer: Arc<dyn Explainer>,
    log_predictions: bool,
}

impl AppState {
    pub fn new(model: Arc<ModelHandle>, metrics: ServiceMetrics) -> Self {
        Self {
            model,
            metrics,
            store: None,
            explainer: Arc::new(TemplateExplainer),
            log_predictions: true,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn ObservationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_explainer(mut self, explainer: Arc<dyn Explainer>) -> Self {
        self.explainer = explainer;
        self
    }

    pub fn with_prediction_logging(mut self, enabled: bool) -> Self {
        self.log_predictions = enabled;
        self
    }
}

/// Build the API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/model", get(model_info))
        .route("/reload_model", post(reload_model))
        .route("/predict", post(predict))
        .route("/explain", post(explain))
        .route("/metrics", get(render_metrics))
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
}

/// Error response carrying the pipeline error's kind and message
#[derive(Debug)]
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            PipelineError::MissingFeatures(_) => StatusCode::BAD_REQUEST,
            PipelineError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            PipelineError::Store(_) | PipelineError::Fetch(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(kind = self.0.kind(), error = %self.0, "Request failed");
        }

        let mut body = json!({
            "error": self.0.kind(),
            "detail": self.0.to_string(),
        });
        if let PipelineError::MissingFeatures(missing) = &self.0 {
            body["missing"] = json!(missing);
        }
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PredictRequest {
    /// Explicit feature values; resolved from the store when absent
    #[serde(default)]
    pub features: Option<BTreeMap<String, f64>>,
}

/// Body of `/predict` and `/explain`.
///
/// An empty body is the same as `{}`. Any content type is accepted; a body
/// that does not decode as [`PredictRequest`] is rejected with 422.
#[derive(Debug, Default)]
pub struct PredictBody(pub PredictRequest);

#[async_trait::async_trait]
impl<S: Send + Sync> FromRequest<S> for PredictBody {
    type Rejection = ApiError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(request, state)
            .await
            .map_err(|e| PipelineError::InvalidRequest(e.body_text()))?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Self::default());
        }
        serde_json::from_slice(&bytes)
            .map(Self)
            .map_err(|e| PipelineError::InvalidRequest(e.to_string()).into())
    }
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub y: u8,
    pub proba: f64,
    pub version: String,
    /// Values the model was scored on, one per schema feature
    pub features: BTreeMap<String, f64>,
    pub latency_ms: f64,
}

#[derive(Debug, Serialize)]
pub struct ExplainResponse {
    #[serde(flatten)]
    pub prediction: PredictResponse,
    pub explanation: String,
    pub explanation_source: ExplanationSource,
    pub top_features: Vec<FeatureContribution>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub model_loaded: bool,
    pub model_version: Option<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let status = state.model.status();
    Json(HealthResponse {
        status: if status.loaded { "ok" } else { "degraded" },
        service: SERVICE_NAME,
        model_loaded: status.loaded,
        model_version: status.version,
    })
}

async fn model_info(State(state): State<AppState>) -> Json<ModelStatus> {
    Json(state.model.status())
}

async fn reload_model(State(state): State<AppState>) -> Result<Json<ModelStatus>, ApiError> {
    let status = state.model.reload()?;
    info!(model_version = ?status.version, "Model reloaded on request");
    Ok(Json(status))
}

async fn predict(
    State(state): State<AppState>,
    PredictBody(request): PredictBody,
) -> Result<Json<PredictResponse>, ApiError> {
    let (response, _, _) = serve_prediction(&state, request).await?;
    Ok(Json(response))
}

async fn explain(
    State(state): State<AppState>,
    PredictBody(request): PredictBody,
) -> Result<Json<ExplainResponse>, ApiError> {
    let (response, prediction, model) = serve_prediction(&state, request).await?;
    let top_features = model.top_contributions(&response.features, TOP_FEATURES)?;
    let explanation = state.explainer.explain(&prediction, &top_features).await;

    Ok(Json(ExplainResponse {
        prediction: response,
        explanation: explanation.text,
        explanation_source: explanation.source,
        top_features,
    }))
}

async fn render_metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        state.metrics.render(),
    )
}

/// Score one request against a single model snapshot.
async fn serve_prediction(
    state: &AppState,
    request: PredictRequest,
) -> Result<(PredictResponse, Prediction, Arc<LoadedModel>), PipelineError> {
    let started = Instant::now();
    let model = state.model.snapshot().ok_or(PipelineError::ModelUnavailable)?;

    let provided = match request.features {
        Some(features) => features,
        None => resolve_latest_features(state.store.as_deref()).await?,
    };
    let prediction = model.predict(&provided)?;
    let features: BTreeMap<String, f64> = model
        .features()
        .iter()
        .filter_map(|name| provided.get(name).map(|v| (name.clone(), *v)))
        .collect();
    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

    metrics::record_prediction(prediction.y, prediction.proba);
    if state.log_predictions {
        if let Some(store) = &state.store {
            let record = PredictionRecord::new(features.clone(), &prediction, latency_ms);
            if let Err(e) = store.log_prediction(&record).await {
                warn!(error = %e, "Failed to log prediction");
            }
        }
    }

    let response = PredictResponse {
        y: prediction.y,
        proba: prediction.proba,
        version: prediction.model_version.clone(),
        features,
        latency_ms,
    };
    Ok((response, prediction, model))
}

/// Features from the newest bike and weather rows.
///
/// A stream with no usable row contributes nothing, leaving its features to
/// be reported missing.
async fn resolve_latest_features(
    store: Option<&dyn ObservationStore>,
) -> Result<BTreeMap<String, f64>, PipelineError> {
    let mut features = BTreeMap::new();
    let Some(store) = store else {
        return Ok(features);
    };

    if let Some(bikes) = store.latest_bikes(1).await?.into_iter().next() {
        match extract_bike_features(&bikes.payload) {
            Ok(bike) => features.extend(bike.entries().map(|(k, v)| (k.to_string(), v))),
            Err(e) => warn!(error = %e, "Latest bike observation is unusable"),
        }
    }
    if let Some(weather) = store.latest_weather(1).await?.into_iter().next() {
        match extract_weather_features(&weather.payload) {
            Ok(w) => features.extend(w.entries().map(|(k, v)| (k.to_string(), v))),
            Err(e) => warn!(error = %e, "Latest weather observation is unusable"),
        }
    }
    Ok(features)
}

/// Record count and latency for every routed request, whatever its outcome.
async fn track_requests(matched: Option<MatchedPath>, request: Request, next: Next) -> Response {
    let endpoint = matched
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::record_request(&endpoint, response.status().as_u16(), started.elapsed());
    response
}
