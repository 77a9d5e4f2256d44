//! Observability for the worker processes
//!
//! Provides:
//! - Prometheus metrics (message delivery, decision and runbook latency, oracle fallbacks)
//! - Event-tagged structured logging with tracing

use crate::models::{ActionStatus, AnomalyAlert, CanaryTestResult, ResponseAction, Severity, StatusUpdate};
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

static GLOBAL_METRICS: OnceLock<AgentMetricsInner> = OnceLock::new();

struct AgentMetricsInner {
    messages_sent: IntCounterVec,
    messages_failed: IntCounterVec,
    oracle_fallbacks: IntCounterVec,
    decision_latency_seconds: Histogram,
    runbook_latency_seconds: Histogram,
    canary_results: IntCounterVec,
    anomalies_detected: IntCounter,
    subjects_monitored: IntGauge,
    registered_agents: IntGauge,
    incidents_open: IntGauge,
}

impl AgentMetricsInner {
    fn new() -> Self {
        Self {
            messages_sent: register_int_counter_vec!(
                "fleetguard_messages_sent_total",
                "Messages delivered to another agent",
                &["kind"]
            )
            .expect("Failed to register messages_sent"),

            messages_failed: register_int_counter_vec!(
                "fleetguard_messages_failed_total",
                "Messages that could not be delivered",
                &["kind", "reason"]
            )
            .expect("Failed to register messages_failed"),

            oracle_fallbacks: register_int_counter_vec!(
                "fleetguard_oracle_fallbacks_total",
                "Decisions that fell back to the rule table",
                &["reason"]
            )
            .expect("Failed to register oracle_fallbacks"),

            decision_latency_seconds: register_histogram!(
                "fleetguard_decision_latency_seconds",
                "Time spent selecting a remediation",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register decision_latency_seconds"),

            runbook_latency_seconds: register_histogram!(
                "fleetguard_runbook_latency_seconds",
                "Time spent executing a runbook across all targets",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register runbook_latency_seconds"),

            canary_results: register_int_counter_vec!(
                "fleetguard_canary_results_total",
                "Canary tests completed, by recommendation",
                &["recommendation"]
            )
            .expect("Failed to register canary_results"),

            anomalies_detected: register_int_counter!(
                "fleetguard_anomalies_detected_total",
                "Anomaly alerts raised by the detector"
            )
            .expect("Failed to register anomalies_detected"),

            subjects_monitored: register_int_gauge!(
                "fleetguard_subjects_monitored",
                "Subjects with a live baseline"
            )
            .expect("Failed to register subjects_monitored"),

            registered_agents: register_int_gauge!(
                "fleetguard_registered_agents",
                "Entries in the agent directory"
            )
            .expect("Failed to register registered_agents"),

            incidents_open: register_int_gauge!(
                "fleetguard_incidents_open",
                "Incidents currently in flight on the responder"
            )
            .expect("Failed to register incidents_open"),
        }
    }
}

/// Lightweight handle to the process-wide Prometheus metrics.
/// Clones share the same underlying collectors.
#[derive(Clone)]
pub struct AgentMetrics {
    _private: (),
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &AgentMetricsInner {
        GLOBAL_METRICS.get_or_init(AgentMetricsInner::new)
    }

    pub fn inc_messages_sent(&self, kind: &str) {
        self.inner().messages_sent.with_label_values(&[kind]).inc();
    }

    pub fn inc_messages_failed(&self, kind: &str, reason: &str) {
        self.inner()
            .messages_failed
            .with_label_values(&[kind, reason])
            .inc();
    }

    pub fn inc_oracle_fallback(&self, reason: &str) {
        self.inner()
            .oracle_fallbacks
            .with_label_values(&[reason])
            .inc();
    }

    pub fn observe_decision_latency(&self, duration_secs: f64) {
        self.inner().decision_latency_seconds.observe(duration_secs);
    }

    pub fn observe_runbook_latency(&self, duration_secs: f64) {
        self.inner().runbook_latency_seconds.observe(duration_secs);
    }

    pub fn inc_canary_result(&self, recommendation: &str) {
        self.inner()
            .canary_results
            .with_label_values(&[recommendation])
            .inc();
    }

    pub fn inc_anomalies_detected(&self) {
        self.inner().anomalies_detected.inc();
    }

    pub fn set_subjects_monitored(&self, count: i64) {
        self.inner().subjects_monitored.set(count);
    }

    pub fn set_registered_agents(&self, count: i64) {
        self.inner().registered_agents.set(count);
    }

    pub fn set_incidents_open(&self, count: i64) {
        self.inner().incidents_open.set(count);
    }
}

/// Event-tagged logger shared by the workers
#[derive(Clone)]
pub struct StructuredLogger {
    agent_name: String,
}

impl StructuredLogger {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn log_startup(&self, version: &str, address: &str, port: u16) {
        info!(
            event = "agent_started",
            agent = %self.agent_name,
            agent_version = %version,
            address = %address,
            port = port,
            "Agent started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "agent_shutdown",
            agent = %self.agent_name,
            reason = %reason,
            "Agent shutting down"
        );
    }

    pub fn log_canary_result(&self, result: &CanaryTestResult) {
        info!(
            event = "canary_completed",
            agent = %self.agent_name,
            update_id = %result.update_id,
            affected_count = result.affected_count,
            error_rate = result.error_rate,
            latency_impact = result.latency_impact,
            recommendation = %result.recommendation,
            "Canary test completed"
        );
    }

    pub fn log_anomaly(&self, alert: &AnomalyAlert) {
        if alert.severity >= Severity::High {
            warn!(
                event = "anomaly_detected",
                agent = %self.agent_name,
                alert_id = %alert.alert_id,
                subject_id = %alert.subject_id,
                severity = %alert.severity,
                metric_type = %alert.metric_type,
                current_value = alert.current_value,
                expected_value = alert.expected_value,
                "Anomaly detected"
            );
        } else {
            info!(
                event = "anomaly_detected",
                agent = %self.agent_name,
                alert_id = %alert.alert_id,
                subject_id = %alert.subject_id,
                severity = %alert.severity,
                metric_type = %alert.metric_type,
                current_value = alert.current_value,
                expected_value = alert.expected_value,
                "Anomaly detected"
            );
        }
    }

    pub fn log_decision(&self, incident_id: &str, action: &str, used_oracle: bool, confidence: f64) {
        info!(
            event = "decision_made",
            agent = %self.agent_name,
            incident_id = %incident_id,
            action = %action,
            used_oracle = used_oracle,
            confidence = confidence,
            "Remediation selected"
        );
    }

    pub fn log_action(&self, action: &ResponseAction) {
        match action.status {
            ActionStatus::Failed => warn!(
                event = "action_executed",
                agent = %self.agent_name,
                action_id = %action.action_id,
                action_type = %action.action_type,
                targets = action.target_subjects.len(),
                status = %action.status,
                "Runbook failed"
            ),
            _ => info!(
                event = "action_executed",
                agent = %self.agent_name,
                action_id = %action.action_id,
                action_type = %action.action_type,
                targets = action.target_subjects.len(),
                status = %action.status,
                "Runbook executed"
            ),
        }
    }

    pub fn log_status_update(&self, update: &StatusUpdate) {
        info!(
            event = "incident_notified",
            agent = %self.agent_name,
            incident_id = %update.incident_id,
            status = %update.status,
            title = %update.title,
            "Status update published"
        );
    }

    pub fn log_incident_dropped(&self, subject_id: &str, open_incident: &str) {
        info!(
            event = "incident_dropped",
            agent = %self.agent_name,
            subject_id = %subject_id,
            open_incident = %open_incident,
            "Incident already in flight for subject, dropping alert"
        );
    }

    pub fn log_incident_abandoned(&self, incident_id: &str, reason: &str) {
        warn!(
            event = "incident_abandoned",
            agent = %self.agent_name,
            incident_id = %incident_id,
            reason = %reason,
            "Incident abandoned"
        );
    }

    pub fn log_undeliverable(&self, recipient: &str, kind: &str, reason: &str) {
        warn!(
            event = "message_undeliverable",
            agent = %self.agent_name,
            recipient = %recipient,
            kind = %kind,
            reason = %reason,
            "Message could not be delivered"
        );
    }
}
