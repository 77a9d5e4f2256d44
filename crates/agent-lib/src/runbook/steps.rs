//! Runbook steps and the runners that perform them

use crate::error::ExecutionError;
use crate::infrastructure::InfrastructureClient;
use crate::models::ActionType;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// A single remediation step applied to one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    Stop,
    Revert,
    Restart,
    Drain,
    Redirect,
    MarkInactive,
    Provision,
    UpdateLoadBalancer,
    VerifyCapacity,
    TerminateExcess,
    RemoveFromLoadBalancer,
    BlockTraffic,
    CollectLogs,
    SnapshotMetrics,
    OpenTicket,
    ClearCache,
    Start,
    VerifyHealth,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Stop => "stop",
            Step::Revert => "revert",
            Step::Restart => "restart",
            Step::Drain => "drain",
            Step::Redirect => "redirect",
            Step::MarkInactive => "mark-inactive",
            Step::Provision => "provision",
            Step::UpdateLoadBalancer => "update-load-balancer",
            Step::VerifyCapacity => "verify-capacity",
            Step::TerminateExcess => "terminate-excess",
            Step::RemoveFromLoadBalancer => "remove-from-load-balancer",
            Step::BlockTraffic => "block-traffic",
            Step::CollectLogs => "collect-logs",
            Step::SnapshotMetrics => "snapshot-metrics",
            Step::OpenTicket => "open-ticket",
            Step::ClearCache => "clear-cache",
            Step::Start => "start",
            Step::VerifyHealth => "verify-health",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered steps for each remediation
pub fn steps_for(action: ActionType) -> &'static [Step] {
    match action {
        ActionType::Rollback => &[Step::Stop, Step::Revert, Step::Restart],
        ActionType::Failover => &[Step::Drain, Step::Redirect, Step::MarkInactive],
        ActionType::ScaleUp => &[Step::Provision, Step::UpdateLoadBalancer, Step::VerifyCapacity],
        ActionType::ScaleDown => &[Step::Drain, Step::TerminateExcess],
        ActionType::Isolate => &[Step::RemoveFromLoadBalancer, Step::BlockTraffic],
        ActionType::Investigate => &[Step::CollectLogs, Step::SnapshotMetrics, Step::OpenTicket],
        ActionType::Restart => &[Step::Stop, Step::ClearCache, Step::Start, Step::VerifyHealth],
    }
}

/// Performs one step on one target. A started step always runs to
/// completion.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, step: Step, target: &str) -> Result<(), ExecutionError>;
}

/// Runner that only waits, standing in for real infrastructure work
#[derive(Debug, Clone)]
pub struct SimulatedSteps {
    pub delay: Duration,
}

impl SimulatedSteps {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for SimulatedSteps {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl StepRunner for SimulatedSteps {
    async fn run(&self, step: Step, target: &str) -> Result<(), ExecutionError> {
        debug!(step = %step, target = %target, "Running simulated step");
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// Runner that reverts through the infrastructure API and simulates the
/// remaining steps
pub struct InfrastructureSteps {
    client: InfrastructureClient,
    simulated: SimulatedSteps,
}

impl InfrastructureSteps {
    pub fn new(client: InfrastructureClient, delay: Duration) -> Self {
        Self {
            client,
            simulated: SimulatedSteps::new(delay),
        }
    }
}

#[async_trait]
impl StepRunner for InfrastructureSteps {
    async fn run(&self, step: Step, target: &str) -> Result<(), ExecutionError> {
        match step {
            Step::Revert => {
                debug!(target = %target, "Reverting through infrastructure API");
                self.client
                    .rollback(target)
                    .await
                    .map_err(|e| ExecutionError::StepFailed {
                        step: step.to_string(),
                        target: target.to_string(),
                        reason: format!("{:#}", e),
                    })
            }
            _ => self.simulated.run(step, target).await,
        }
    }
}
