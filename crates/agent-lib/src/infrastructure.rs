//! Client for the managed-infrastructure API
//!
//! The detector polls subjects through [`MetricsSource`]; the runbook
//! executor uses the rollback endpoint. The HTTP implementation talks to
//! the fleet-state API:
//!
//! - `GET /systems` -> `{"systems": [id, ...]}`
//! - `GET /system/{id}` -> `{"cpu", "memory", "status"}`
//! - `POST /rollback/{id}`, `POST /simulate-failure/{id}`
//! - `GET /health`

use crate::models::{unix_now, SubjectMetrics};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use url::Url;

/// Error count reported for any subject whose status is not `healthy`
pub const UNHEALTHY_ERROR_COUNT: u64 = 50;

const DEFAULT_DISK_USAGE: f64 = 50.0;
const DEFAULT_NETWORK_LATENCY: f64 = 20.0;

/// Source of per-subject samples for the detector
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn list_subjects(&self) -> Result<Vec<String>>;
    async fn fetch(&self, subject_id: &str) -> Result<SubjectMetrics>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemList {
    #[serde(default)]
    pub systems: Vec<String>,
}

/// Raw state of one subject as reported by the infrastructure API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemState {
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default)]
    pub status: String,
}

impl SystemState {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }

    pub fn into_metrics(self, subject_id: &str) -> SubjectMetrics {
        SubjectMetrics {
            subject_id: subject_id.to_string(),
            cpu_usage: self.cpu,
            memory_usage: self.memory,
            disk_usage: DEFAULT_DISK_USAGE,
            network_latency: DEFAULT_NETWORK_LATENCY,
            error_count: if self.is_healthy() {
                0
            } else {
                UNHEALTHY_ERROR_COUNT
            },
            timestamp: unix_now(),
        }
    }
}

/// HTTP client for the infrastructure API
#[derive(Clone)]
pub struct InfrastructureClient {
    client: Client,
    base_url: Url,
}

impl InfrastructureClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(10))
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid infrastructure URL")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Infrastructure API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    async fn post(&self, path: &str) -> Result<()> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Infrastructure API error ({}): {}", status, body);
        }

        Ok(())
    }

    pub async fn system_state(&self, subject_id: &str) -> Result<SystemState> {
        self.get(&format!("system/{}", subject_id))
            .await
            .with_context(|| format!("Failed to fetch state of {}", subject_id))
    }

    pub async fn rollback(&self, subject_id: &str) -> Result<()> {
        self.post(&format!("rollback/{}", subject_id))
            .await
            .with_context(|| format!("Failed to roll back {}", subject_id))
    }

    pub async fn simulate_failure(&self, subject_id: &str) -> Result<()> {
        self.post(&format!("simulate-failure/{}", subject_id))
            .await
            .with_context(|| format!("Failed to inject failure into {}", subject_id))
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        self.get("health").await
    }
}

#[async_trait]
impl MetricsSource for InfrastructureClient {
    async fn list_subjects(&self) -> Result<Vec<String>> {
        let list: SystemList = self.get("systems").await?;
        Ok(list.systems)
    }

    async fn fetch(&self, subject_id: &str) -> Result<SubjectMetrics> {
        Ok(self.system_state(subject_id).await?.into_metrics(subject_id))
    }
}
