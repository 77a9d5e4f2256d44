//! Two-stage decision pipeline: oracle first, rule table as fallback

use super::oracle::{DecisionOracle, OracleRequest};
use super::rules::rule_based;
use super::{Decision, IncidentContext, Outcome};
use crate::error::OracleError;
use crate::health::{components, HealthRegistry};
use crate::models::ActionType;
use crate::observability::AgentMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Oracle answers at or below this confidence are ignored
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.7;

const MIN_CONFIDENCE_THRESHOLD: f64 = 0.7;
const MAX_CONFIDENCE_THRESHOLD: f64 = 0.8;

pub const DEFAULT_ORACLE_TIMEOUT: Duration = Duration::from_secs(10);

pub struct DecisionEngine {
    oracle: Option<Arc<dyn DecisionOracle>>,
    confidence_threshold: f64,
    oracle_timeout: Duration,
    health: Option<HealthRegistry>,
    metrics: AgentMetrics,
}

impl DecisionEngine {
    /// Engine that only consults the rule table
    pub fn rules_only() -> Self {
        Self {
            oracle: None,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            oracle_timeout: DEFAULT_ORACLE_TIMEOUT,
            health: None,
            metrics: AgentMetrics::new(),
        }
    }

    pub fn with_oracle(oracle: Arc<dyn DecisionOracle>) -> Self {
        Self {
            oracle: Some(oracle),
            ..Self::rules_only()
        }
    }

    /// Threshold is kept within 0.7..=0.8
    pub fn confidence_threshold(mut self, threshold: f64) -> Self {
        let clamped = threshold.clamp(MIN_CONFIDENCE_THRESHOLD, MAX_CONFIDENCE_THRESHOLD);
        if clamped != threshold {
            warn!(
                requested = threshold,
                applied = clamped,
                "Confidence threshold out of range, clamping"
            );
        }
        self.confidence_threshold = clamped;
        self
    }

    pub fn oracle_timeout(mut self, timeout: Duration) -> Self {
        self.oracle_timeout = timeout;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    pub async fn decide(&self, ctx: &IncidentContext) -> Outcome {
        let start = Instant::now();
        let outcome = self.decide_inner(ctx).await;
        self.metrics
            .observe_decision_latency(start.elapsed().as_secs_f64());
        outcome
    }

    async fn decide_inner(&self, ctx: &IncidentContext) -> Outcome {
        let Some(oracle) = &self.oracle else {
            return Outcome::RuleBased(rule_based(ctx));
        };

        let request = OracleRequest::from(ctx);
        let answer = match tokio::time::timeout(self.oracle_timeout, oracle.decide(&request)).await {
            Ok(result) => result,
            Err(_) => Err(OracleError::Timeout {
                timeout_ms: self.oracle_timeout.as_millis() as u64,
            }),
        };

        let response = match answer {
            Ok(response) => {
                self.mark_decision_health(None).await;
                response
            }
            Err(e) => {
                warn!(
                    alert_id = %ctx.alert_id,
                    reason = e.label(),
                    error = %e,
                    "Oracle failed, using rule table"
                );
                self.metrics.inc_oracle_fallback(e.label());
                self.mark_decision_health(Some(e.to_string())).await;
                return Outcome::RuleBased(rule_based(ctx));
            }
        };

        if response.confidence.is_nan() || response.confidence <= self.confidence_threshold {
            info!(
                alert_id = %ctx.alert_id,
                confidence = response.confidence,
                threshold = self.confidence_threshold,
                "Oracle confidence too low, using rule table"
            );
            self.metrics.inc_oracle_fallback("low_confidence");
            return Outcome::RuleBased(rule_based(ctx));
        }

        let action_type = match response.recommendation.parse::<ActionType>() {
            Ok(action) => action,
            Err(name) => {
                warn!(
                    alert_id = %ctx.alert_id,
                    recommendation = %name,
                    "Oracle named an unknown action, investigating instead"
                );
                ActionType::Investigate
            }
        };

        Outcome::Oracle(Decision {
            action_type,
            reasoning: format!("Oracle: {}", response.reasoning),
            confidence: response.confidence,
            oracle_request_id: response.request_id,
        })
    }

    async fn mark_decision_health(&self, problem: Option<String>) {
        if let Some(health) = &self.health {
            match problem {
                Some(message) => health.set_degraded(components::DECISION, message).await,
                None => health.set_healthy(components::DECISION).await,
            }
        }
    }
}
