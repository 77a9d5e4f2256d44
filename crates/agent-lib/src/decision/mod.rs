//! Remediation selection
//!
//! An [`IncidentContext`] is built from an anomaly alert or a failed canary
//! run. The [`DecisionEngine`] asks the oracle when one is configured and
//! falls back to a fixed rule table otherwise.

mod engine;
mod oracle;
mod rules;

pub use engine::{DecisionEngine, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_ORACLE_TIMEOUT};
pub use oracle::{DecisionOracle, HttpOracle, OracleRequest, OracleResponse};
pub use rules::{rule_based, RULE_CONFIDENCE};

use crate::models::{
    ActionType, AlertRecommendation, AnomalyAlert, CanaryRecommendation, CanaryTestResult,
    MetricType, Severity,
};
use serde::{Deserialize, Serialize};

/// Everything the decision stage knows about an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentContext {
    pub alert_id: String,
    pub severity: Severity,
    pub subject_id: String,
    pub metric_type: MetricType,
    pub current_value: f64,
    pub expected_value: f64,
    pub confidence: f64,
    pub recommendation: AlertRecommendation,
    /// Subjects a remediation would act on
    pub targets: Vec<String>,
}

impl IncidentContext {
    pub fn from_alert(alert: &AnomalyAlert) -> Self {
        Self {
            alert_id: alert.alert_id.clone(),
            severity: alert.severity,
            subject_id: alert.subject_id.clone(),
            metric_type: alert.metric_type,
            current_value: alert.current_value,
            expected_value: alert.expected_value,
            confidence: alert.confidence,
            recommendation: alert.recommendation,
            targets: vec![alert.subject_id.clone()],
        }
    }

    /// Context for a canary run that recommended rollback; `None` for any
    /// other verdict.
    pub fn from_canary(result: &CanaryTestResult) -> Option<Self> {
        if result.recommendation != CanaryRecommendation::Rollback {
            return None;
        }

        Some(Self {
            alert_id: format!("CANARY-{}", result.update_id),
            severity: if result.error_rate > 0.1 {
                Severity::Critical
            } else {
                Severity::High
            },
            subject_id: format!("update:{}", result.update_id),
            metric_type: MetricType::ErrorRate,
            current_value: result.error_rate * 100.0,
            expected_value: 1.0,
            confidence: 0.95,
            recommendation: AlertRecommendation::RollbackImmediately,
            targets: vec![result.update_id.clone()],
        })
    }
}

/// A selected remediation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action_type: ActionType,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_request_id: Option<String>,
}

/// Which stage produced the decision
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Oracle(Decision),
    RuleBased(Decision),
}

impl Outcome {
    pub fn used_oracle(&self) -> bool {
        matches!(self, Outcome::Oracle(_))
    }

    pub fn decision(&self) -> &Decision {
        match self {
            Outcome::Oracle(d) | Outcome::RuleBased(d) => d,
        }
    }

    pub fn into_decision(self) -> Decision {
        match self {
            Outcome::Oracle(d) | Outcome::RuleBased(d) => d,
        }
    }
}
