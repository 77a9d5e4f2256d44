//! Long-running workers
//!
//! Each worker owns an inbox of [`InboundMessage`]s and a shutdown
//! receiver, and reaches its peers only through the [`Transport`].

mod canary;
mod detector;
mod notifier;
mod responder;

pub use canary::CanaryWorker;
pub use detector::DetectorWorker;
pub use notifier::NotifierWorker;
pub use responder::{IncidentOutcome, ResponderWorker};

use crate::counters::Counters;
use crate::health::{components, HealthRegistry};
use crate::models::Envelope;
use crate::observability::StructuredLogger;
use crate::transport::{InboundMessage, Transport};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Inbound message stream of a worker
pub type Inbox = mpsc::Receiver<InboundMessage>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerRole {
    Canary,
    Detector,
    Responder,
    Notifier,
}

impl WorkerRole {
    pub const ALL: [WorkerRole; 4] = [
        WorkerRole::Canary,
        WorkerRole::Detector,
        WorkerRole::Responder,
        WorkerRole::Notifier,
    ];

    /// Name the worker registers under in the directory
    pub fn agent_name(&self) -> &'static str {
        match self {
            WorkerRole::Canary => "canary_agent",
            WorkerRole::Detector => "monitoring_agent",
            WorkerRole::Responder => "response_agent",
            WorkerRole::Notifier => "communication_agent",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            WorkerRole::Canary => 8001,
            WorkerRole::Detector => 8002,
            WorkerRole::Responder => 8003,
            WorkerRole::Notifier => 8004,
        }
    }

    pub fn capabilities(&self) -> &'static [&'static str] {
        match self {
            WorkerRole::Canary => &["canary_testing", "deployment_validation"],
            WorkerRole::Detector => &["monitoring", "anomaly_detection", "real_time_polling"],
            WorkerRole::Responder => &[
                "incident_response",
                "autonomous_recovery",
                "runbook_execution",
            ],
            WorkerRole::Notifier => &["stakeholder_notification", "status_page"],
        }
    }

    /// Health components this worker reports on
    pub fn components(&self) -> &'static [&'static str] {
        match self {
            WorkerRole::Canary => &[components::CANARY],
            WorkerRole::Detector => &[components::DETECTOR],
            WorkerRole::Responder => &[components::DECISION, components::EXECUTOR],
            WorkerRole::Notifier => &[components::NOTIFIER],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Canary => "canary",
            WorkerRole::Detector => "detector",
            WorkerRole::Responder => "responder",
            WorkerRole::Notifier => "notifier",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        WorkerRole::ALL
            .into_iter()
            .find(|role| role.as_str() == wanted || role.agent_name() == wanted)
            .ok_or_else(|| format!("unknown role '{}'", s))
    }
}

/// Shared handles every worker needs
#[derive(Clone)]
pub struct WorkerContext {
    pub name: String,
    pub transport: Transport,
    pub counters: Arc<Counters>,
    pub health: HealthRegistry,
    pub logger: StructuredLogger,
}

impl WorkerContext {
    pub fn new(
        name: impl Into<String>,
        transport: Transport,
        counters: Arc<Counters>,
        health: HealthRegistry,
    ) -> Self {
        let name = name.into();
        Self {
            logger: StructuredLogger::new(name.clone()),
            name,
            transport,
            counters,
            health,
        }
    }

    /// Send to a peer, logging and recording failures. Returns whether the
    /// message was delivered.
    pub async fn send_to(&self, recipient: &str, envelope: Envelope) -> bool {
        let kind = envelope.kind();
        let result = self
            .transport
            .send_envelope(&self.name, recipient, envelope)
            .await;
        self.health.observe(components::TRANSPORT, &result).await;

        match result {
            Ok(()) => true,
            Err(e) => {
                self.logger.log_undeliverable(recipient, kind, &e.to_string());
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parsing() {
        assert_eq!("canary".parse::<WorkerRole>(), Ok(WorkerRole::Canary));
        assert_eq!(" Responder ".parse::<WorkerRole>(), Ok(WorkerRole::Responder));
        assert_eq!("monitoring_agent".parse::<WorkerRole>(), Ok(WorkerRole::Detector));
        assert!("janitor".parse::<WorkerRole>().is_err());
    }

    #[test]
    fn test_role_identity() {
        let names: Vec<&str> = WorkerRole::ALL.iter().map(|r| r.agent_name()).collect();
        assert_eq!(
            names,
            ["canary_agent", "monitoring_agent", "response_agent", "communication_agent"]
        );
        let ports: Vec<u16> = WorkerRole::ALL.iter().map(|r| r.default_port()).collect();
        assert_eq!(ports, [8001, 8002, 8003, 8004]);
        assert!(WorkerRole::Responder
            .capabilities()
            .contains(&"runbook_execution"));
    }
}
