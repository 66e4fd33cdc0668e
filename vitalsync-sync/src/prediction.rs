//! Client for the external diabetes-risk prediction service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};
use vitalsync_core::{HealthFeatures, PredictionError, PredictionOutcome};

use crate::config::PredictionConfig;

/// Scores a health-feature payload.
#[async_trait]
pub trait PredictionClient: Send + Sync {
    async fn predict(&self, features: &HealthFeatures) -> Result<PredictionOutcome, PredictionError>;
}

/// Posts features as JSON to a single HTTP endpoint.
pub struct HttpPredictionClient {
    client: Client,
    endpoint: String,
}

impl HttpPredictionClient {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, PredictionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PredictionError::Request {
                reason: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn from_config(config: &PredictionConfig) -> Result<Self, PredictionError> {
        Self::new(config.endpoint.clone(), config.timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl std::fmt::Debug for HttpPredictionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPredictionClient")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(alias = "error", alias = "message")]
    detail: String,
}

/// Interpret a response status and body.
pub(crate) fn parse_outcome(status: u16, body: &str) -> Result<PredictionOutcome, PredictionError> {
    if !(200..300).contains(&status) {
        let detail = serde_json::from_str::<ErrorBody>(body)
            .map(|e| e.detail)
            .unwrap_or_else(|_| body.trim().to_string());
        return Err(PredictionError::Status { status, detail });
    }
    serde_json::from_str(body).map_err(|e| PredictionError::InvalidResponse {
        reason: e.to_string(),
    })
}

#[async_trait]
impl PredictionClient for HttpPredictionClient {
    async fn predict(&self, features: &HealthFeatures) -> Result<PredictionOutcome, PredictionError> {
        debug!(endpoint = %self.endpoint, "requesting prediction");
        let response = self
            .client
            .post(&self.endpoint)
            .json(features)
            .send()
            .await
            .map_err(|e| PredictionError::Request {
                reason: format!("HTTP request failed: {}", e),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| PredictionError::Request {
            reason: format!("failed to read response body: {}", e),
        })?;

        let outcome = parse_outcome(status, &body);
        if let Err(err) = &outcome {
            warn!(endpoint = %self.endpoint, error = %err, "prediction failed");
        }
        outcome
    }
}
