//! Error taxonomy for the worker pipeline
//!
//! None of these are fatal to a worker: directory and transport errors
//! abandon the triggering operation, oracle errors degrade to the rule
//! table and unknown actions degrade to INVESTIGATE.

use crate::incident::IncidentState;
use crate::models::ActionStatus;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("agent not found in directory: {name}")]
    NotFound { name: String },

    #[error("failed to persist directory to {path}: {reason}")]
    PersistFailed { path: String, reason: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("agent {name} is not registered")]
    Unregistered { name: String },

    #[error("agent {name} is unreachable: {reason}")]
    Unreachable { name: String, reason: String },

    #[error("delivery to {name} timed out after {timeout_ms}ms")]
    Timeout { name: String, timeout_ms: u64 },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OracleError {
    #[error("decision oracle unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("decision oracle timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("malformed oracle response: {reason}")]
    MalformedResponse { reason: String },
}

impl OracleError {
    /// Stable label for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            OracleError::Unavailable { .. } => "unavailable",
            OracleError::Timeout { .. } => "timeout",
            OracleError::MalformedResponse { .. } => "malformed_response",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("unknown action type: {name}")]
    UnknownAction { name: String },

    #[error("step {step} failed on {target}: {reason}")]
    StepFailed {
        step: String,
        target: String,
        reason: String,
    },

    #[error("action {action_id} cannot move from {from} to {to}")]
    InvalidTransition {
        action_id: String,
        from: ActionStatus,
        to: ActionStatus,
    },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CanaryError {
    #[error("update {update_id} has no target subjects")]
    NoTargets { update_id: String },

    #[error("update {update_id} was withdrawn during the observation window")]
    Withdrawn { update_id: String },

    #[error("update {update_id} is already under test")]
    AlreadyRunning { update_id: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IncidentError {
    #[error("incident {incident_id} cannot move from {from} to {to}")]
    InvalidTransition {
        incident_id: String,
        from: IncidentState,
        to: IncidentState,
    },

    #[error("no incident in flight for {subject_id}")]
    NotOpen { subject_id: String },
}
