//! FleetGuard agent library
//!
//! This crate provides the core functionality for:
//! - A name-addressed agent directory and message transport
//! - Canary testing of software updates
//! - Baseline anomaly detection over polled subject metrics
//! - Remediation decisions (oracle with rule-table fallback) and runbook execution
//! - Stakeholder notification and incident lifecycle tracking
//! - Health checks, work counters and observability

pub mod anomaly;
pub mod canary;
pub mod counters;
pub mod decision;
pub mod directory;
pub mod error;
pub mod health;
pub mod incident;
pub mod infrastructure;
pub mod models;
pub mod notifier;
pub mod observability;
pub mod persistence;
pub mod runbook;
pub mod transport;
pub mod workers;

pub use counters::{Counter, Counters};
pub use directory::{AgentDirectory, AgentRecord, AgentStatus};
pub use error::{
    CanaryError, DirectoryError, ExecutionError, IncidentError, OracleError, TransportError,
};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use transport::{InboundMessage, Transport};
pub use workers::{WorkerContext, WorkerRole};
