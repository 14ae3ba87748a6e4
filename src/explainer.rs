//! Natural-language explanations for `/explain`.
//!
//! [`TemplateExplainer`] formats the prediction and its largest feature
//! contributions. [`RemoteExplainer`] asks an OpenAI-compatible chat endpoint
//! and falls back to the template on any failure, so explaining never fails.

use crate::config::ExplainerConfig;
use crate::error::PipelineError;
use crate::models::inference::FeatureContribution;
use crate::types::Prediction;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where an explanation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationSource {
    Template,
    Llm,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub text: String,
    pub source: ExplanationSource,
}

/// Produces an explanation for a prediction; infallible by contract
#[async_trait]
pub trait Explainer: Send + Sync {
    async fn explain(&self, prediction: &Prediction, top: &[FeatureContribution]) -> Explanation;
}

/// Deterministic text built from the prediction itself
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateExplainer;

impl TemplateExplainer {
    pub fn render(prediction: &Prediction, top: &[FeatureContribution]) -> String {
        let outcome = if prediction.y == 1 {
            "likely to run low on bikes"
        } else {
            "not likely to run low on bikes"
        };
        let mut text = format!(
            "Model {} predicts the network is {} (probability {:.2}).",
            prediction.model_version, outcome, prediction.proba
        );

        if !top.is_empty() {
            let drivers: Vec<String> = top
                .iter()
                .map(|c| {
                    let direction = if c.contribution >= 0.0 { "raises" } else { "lowers" };
                    format!("{} {} the risk ({:+.2})", c.name, direction, c.contribution)
                })
                .collect();
            text.push_str(" Main drivers: ");
            text.push_str(&drivers.join("; "));
            text.push('.');
        }
        text
    }
}

#[async_trait]
impl Explainer for TemplateExplainer {
    async fn explain(&self, prediction: &Prediction, top: &[FeatureContribution]) -> Explanation {
        Explanation {
            text: Self::render(prediction, top),
            source: ExplanationSource::Template,
        }
    }
}

/// OpenAI-compatible `chat/completions` backend
#[derive(Debug, Clone)]
pub struct RemoteExplainer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl RemoteExplainer {
    pub fn new(
        base_url: &str,
        api_key: &str,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }

    async fn complete(
        &self,
        prediction: &Prediction,
        top: &[FeatureContribution],
    ) -> Result<String, PipelineError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "messages": [
                {
                    "role": "system",
                    "content": "You explain bike-share availability predictions to operations staff in two or three plain sentences."
                },
                {
                    "role": "user",
                    "content": prompt(prediction, top),
                }
            ],
        });

        debug!(url = %url, model = %self.model, "Requesting explanation");
        let response: Value = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        response
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PipelineError::malformed("completion response has no message content"))
    }
}

#[async_trait]
impl Explainer for RemoteExplainer {
    async fn explain(&self, prediction: &Prediction, top: &[FeatureContribution]) -> Explanation {
        match self.complete(prediction, top).await {
            Ok(text) => Explanation {
                text,
                source: ExplanationSource::Llm,
            },
            Err(e) => {
                warn!(error = %e, "Remote explainer failed, using template");
                Explanation {
                    text: TemplateExplainer::render(prediction, top),
                    source: ExplanationSource::Template,
                }
            }
        }
    }
}

fn prompt(prediction: &Prediction, top: &[FeatureContribution]) -> String {
    let drivers: Vec<String> = top
        .iter()
        .map(|c| format!("- {}: {:+.3}", c.name, c.contribution))
        .collect();
    format!(
        "Predicted class: {} (1 = stations likely to run low on bikes)\n\
         Probability: {:.3}\n\
         Model version: {}\n\
         Largest feature contributions to the log-odds:\n{}",
        prediction.y,
        prediction.proba,
        prediction.model_version,
        drivers.join("\n")
    )
}

/// The remote explainer when configured, otherwise the template.
pub fn from_config(config: &ExplainerConfig) -> Arc<dyn Explainer> {
    if let (true, Some(base_url), Some(api_key)) =
        (config.remote_enabled(), &config.base_url, &config.api_key)
    {
        match RemoteExplainer::new(
            base_url,
            api_key,
            &config.model,
            Duration::from_secs(config.timeout_secs),
        ) {
            Ok(remote) => {
                info!(base_url = %base_url, model = %config.model, "Using remote explainer");
                return Arc::new(remote);
            }
            Err(e) => warn!(error = %e, "Could not build remote explainer, using template"),
        }
    }
    Arc::new(TemplateExplainer)
}
