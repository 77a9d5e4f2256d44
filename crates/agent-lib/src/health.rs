//! Component health for the worker processes
//!
//! Backs the `/healthz` and `/readyz` endpoints. Workers mark their own
//! component degraded when a collaborator (oracle, peer agent,
//! infrastructure API) misbehaves and healthy again once it recovers.
//! Each component remembers when it entered its current status and how
//! many failures in a row it has reported.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered from best to worst so the overall status is the maximum
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still serving, but a collaborator is failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds at which the component entered `status`
    pub since: i64,
    /// Non-healthy reports in a row; reset by a healthy one
    #[serde(default)]
    pub consecutive_failures: u32,
}

impl ComponentHealth {
    fn fresh() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            since: Utc::now().timestamp(),
            consecutive_failures: 0,
        }
    }

    fn report(&mut self, status: ComponentStatus, message: Option<String>) {
        if status != self.status {
            self.status = status;
            self.since = Utc::now().timestamp();
        }
        self.message = message;
        self.consecutive_failures = match status {
            ComponentStatus::Healthy => 0,
            _ => self.consecutive_failures.saturating_add(1),
        };
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components; healthy when there are none
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const DIRECTORY: &str = "directory";
    pub const TRANSPORT: &str = "transport";
    pub const DETECTOR: &str = "detector";
    pub const CANARY: &str = "canary";
    pub const DECISION: &str = "decision";
    pub const EXECUTOR: &str = "executor";
    pub const NOTIFIER: &str = "notifier";
}

#[derive(Debug, Default)]
struct State {
    components: BTreeMap<String, ComponentHealth>,
    ready: bool,
}

/// Shared, cloneable view of every component's health plus the
/// process readiness flag
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    state: Arc<RwLock<State>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` as healthy; an existing entry is reset
    pub async fn register(&self, name: &str) {
        self.register_all(&[name]).await;
    }

    pub async fn register_all(&self, names: &[&str]) {
        let mut state = self.state.write().await;
        for name in names {
            state
                .components
                .insert((*name).to_string(), ComponentHealth::fresh());
        }
    }

    async fn report(&self, name: &str, status: ComponentStatus, message: Option<String>) {
        let mut state = self.state.write().await;
        state
            .components
            .entry(name.to_string())
            .or_insert_with(ComponentHealth::fresh)
            .report(status, message);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.report(name, ComponentStatus::Healthy, None).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Degraded, Some(message.into()))
            .await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.report(name, ComponentStatus::Unhealthy, Some(message.into()))
            .await;
    }

    /// Healthy on `Ok`, degraded with the error text on `Err`
    pub async fn observe<T, E: std::fmt::Display>(&self, name: &str, result: &Result<T, E>) {
        match result {
            Ok(_) => self.set_healthy(name).await,
            Err(e) => self.set_degraded(name, e.to_string()).await,
        }
    }

    pub async fn set_ready(&self, ready: bool) {
        self.state.write().await.ready = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.state.read().await.components.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
        }
    }

    /// Ready once startup finished and no component is unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        let state = self.state.read().await;
        if !state.ready {
            return ReadinessResponse {
                ready: false,
                reason: Some("Agent not registered or shutting down".to_string()),
            };
        }

        let failed: Vec<&str> = state
            .components
            .iter()
            .filter(|(_, c)| !c.status.is_operational())
            .map(|(name, _)| name.as_str())
            .collect();

        if failed.is_empty() {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some(format!("Unhealthy: {}", failed.join(", "))),
            }
        }
    }
}
