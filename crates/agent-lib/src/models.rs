//! Core data models exchanged between workers
//!
//! Every message a worker can send is a variant of [`Message`]; the
//! [`Envelope`] adds the producer-assigned identifier and send time.

use crate::error::ExecutionError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current unix time in seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// A software update to be canary tested
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePackage {
    pub update_id: String,
    pub version: String,
    pub description: String,
    pub target_subjects: Vec<String>,
    pub timestamp: i64,
}

/// Canary verdict for an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CanaryRecommendation {
    Deploy,
    Rollback,
    Investigate,
}

impl fmt::Display for CanaryRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CanaryRecommendation::Deploy => write!(f, "DEPLOY"),
            CanaryRecommendation::Rollback => write!(f, "ROLLBACK"),
            CanaryRecommendation::Investigate => write!(f, "INVESTIGATE"),
        }
    }
}

/// Result of a canary test run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanaryTestResult {
    pub update_id: String,
    pub success: bool,
    /// Number of subjects the update was trialled on
    pub affected_count: usize,
    pub error_rate: f64,
    pub latency_impact: f64,
    pub recommendation: CanaryRecommendation,
    pub details: String,
}

/// Alert severity levels, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Metric that tripped an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricType {
    Cpu,
    Memory,
    Errors,
    ErrorRate,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricType::Cpu => write!(f, "CPU"),
            MetricType::Memory => write!(f, "MEMORY"),
            MetricType::Errors => write!(f, "ERRORS"),
            MetricType::ErrorRate => write!(f, "ERROR_RATE"),
        }
    }
}

/// Detector's suggested follow-up attached to an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertRecommendation {
    RollbackImmediately,
    InvestigateHighCpu,
    InvestigateMemoryLeak,
}

impl fmt::Display for AlertRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertRecommendation::RollbackImmediately => write!(f, "ROLLBACK_IMMEDIATELY"),
            AlertRecommendation::InvestigateHighCpu => write!(f, "INVESTIGATE_HIGH_CPU"),
            AlertRecommendation::InvestigateMemoryLeak => write!(f, "INVESTIGATE_MEMORY_LEAK"),
        }
    }
}

/// Alert raised when a subject deviates from its baseline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub alert_id: String,
    pub severity: Severity,
    pub subject_id: String,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub expected_value: f64,
    /// Detection confidence in [0, 1]
    pub confidence: f64,
    pub recommendation: AlertRecommendation,
    pub timestamp: i64,
}

/// Remediation kinds the runbook executor knows how to perform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Rollback,
    Failover,
    ScaleUp,
    ScaleDown,
    Isolate,
    Investigate,
    Restart,
}

impl ActionType {
    pub const ALL: [ActionType; 7] = [
        ActionType::Rollback,
        ActionType::Failover,
        ActionType::ScaleUp,
        ActionType::ScaleDown,
        ActionType::Isolate,
        ActionType::Investigate,
        ActionType::Restart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Rollback => "ROLLBACK",
            ActionType::Failover => "FAILOVER",
            ActionType::ScaleUp => "SCALE_UP",
            ActionType::ScaleDown => "SCALE_DOWN",
            ActionType::Isolate => "ISOLATE",
            ActionType::Investigate => "INVESTIGATE",
            ActionType::Restart => "RESTART",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        ActionType::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| s.to_string())
    }
}

/// Lifecycle of a response action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Initiated,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Initiated => write!(f, "INITIATED"),
            ActionStatus::Completed => write!(f, "COMPLETED"),
            ActionStatus::Failed => write!(f, "FAILED"),
        }
    }
}

/// Remediation taken by the responder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseAction {
    pub action_id: String,
    pub action_type: ActionType,
    pub target_subjects: Vec<String>,
    pub reason: String,
    pub status: ActionStatus,
    pub timestamp: i64,
    /// Request id returned by the decision oracle, when it made the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_request_id: Option<String>,
}

impl ResponseAction {
    /// Move a running action to its terminal status. Only
    /// INITIATED -> COMPLETED | FAILED is allowed, and only once.
    pub fn transition(&mut self, to: ActionStatus) -> Result<(), ExecutionError> {
        if self.status != ActionStatus::Initiated || !to.is_terminal() {
            return Err(ExecutionError::InvalidTransition {
                action_id: self.action_id.clone(),
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

/// Stakeholder-facing incident status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Investigating,
    Mitigating,
    Resolved,
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentStatus::Investigating => write!(f, "INVESTIGATING"),
            IncidentStatus::Mitigating => write!(f, "MITIGATING"),
            IncidentStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// Status page record published by the notifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub incident_id: String,
    pub status: IncidentStatus,
    pub title: String,
    pub description: String,
    pub affected_subjects: Vec<String>,
    pub timestamp: i64,
}

/// One polled sample of a monitored subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectMetrics {
    pub subject_id: String,
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub disk_usage: f64,
    pub network_latency: f64,
    pub error_count: u64,
    pub timestamp: i64,
}

/// Tagged union over every message kind workers exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Message {
    UpdatePackage(UpdatePackage),
    CanaryTestResult(CanaryTestResult),
    AnomalyAlert(AnomalyAlert),
    ResponseAction(ResponseAction),
    StatusUpdate(StatusUpdate),
}

impl Message {
    /// Short kind name used in logs and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            Message::UpdatePackage(_) => "update_package",
            Message::CanaryTestResult(_) => "canary_test_result",
            Message::AnomalyAlert(_) => "anomaly_alert",
            Message::ResponseAction(_) => "response_action",
            Message::StatusUpdate(_) => "status_update",
        }
    }
}

impl From<UpdatePackage> for Message {
    fn from(value: UpdatePackage) -> Self {
        Message::UpdatePackage(value)
    }
}

impl From<CanaryTestResult> for Message {
    fn from(value: CanaryTestResult) -> Self {
        Message::CanaryTestResult(value)
    }
}

impl From<AnomalyAlert> for Message {
    fn from(value: AnomalyAlert) -> Self {
        Message::AnomalyAlert(value)
    }
}

impl From<ResponseAction> for Message {
    fn from(value: ResponseAction) -> Self {
        Message::ResponseAction(value)
    }
}

impl From<StatusUpdate> for Message {
    fn from(value: StatusUpdate) -> Self {
        Message::StatusUpdate(value)
    }
}

/// Immutable, identified wrapper around a [`Message`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    /// Unix milliseconds at construction
    pub sent_at: i64,
    pub message: Message,
}

impl Envelope {
    pub fn new(message: impl Into<Message>) -> Self {
        Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            sent_at: chrono::Utc::now().timestamp_millis(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.message.kind()
    }
}
