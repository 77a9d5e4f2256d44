//! Decision oracle client
//!
//! The oracle is an external service that, given an incident, names a
//! remediation with a confidence score. Failures are mapped onto
//! [`OracleError`] so the engine can fall back to the rule table.

use super::IncidentContext;
use crate::error::OracleError;
use crate::models::{MetricType, Severity};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub alert_id: String,
    pub severity: Severity,
    pub subject_id: String,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub expected_value: f64,
    pub confidence: f64,
}

impl From<&IncidentContext> for OracleRequest {
    fn from(ctx: &IncidentContext) -> Self {
        Self {
            alert_id: ctx.alert_id.clone(),
            severity: ctx.severity,
            subject_id: ctx.subject_id.clone(),
            metric_type: ctx.metric_type,
            current_value: ctx.current_value,
            expected_value: ctx.expected_value,
            confidence: ctx.confidence,
        }
    }
}

/// Oracle reply; `recommendation` is a free-form action name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleResponse {
    pub recommendation: String,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[async_trait]
pub trait DecisionOracle: Send + Sync {
    async fn decide(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError>;
}

/// Oracle reached over HTTP: `POST {endpoint}` with an [`OracleRequest`]
pub struct HttpOracle {
    client: reqwest::Client,
    endpoint: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpOracle {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, OracleError> {
        let endpoint = Url::parse(endpoint).map_err(|e| OracleError::Unavailable {
            reason: format!("invalid oracle endpoint: {}", e),
        })?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::Unavailable {
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint,
            api_key: None,
            timeout,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn map_send_error(&self, e: reqwest::Error) -> OracleError {
        if e.is_timeout() {
            OracleError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            }
        } else {
            OracleError::Unavailable {
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl DecisionOracle for HttpOracle {
    async fn decide(&self, request: &OracleRequest) -> Result<OracleResponse, OracleError> {
        let mut builder = self.client.post(self.endpoint.clone()).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Unavailable {
                reason: format!("HTTP {}: {}", status, body),
            });
        }

        let bytes = response.bytes().await.map_err(|e| self.map_send_error(e))?;

        serde_json::from_slice(&bytes).map_err(|e| OracleError::MalformedResponse {
            reason: e.to_string(),
        })
    }
}
