//! Runbook execution
//!
//! Each [`ActionType`] maps to a fixed list of [`Step`]s. Steps run in order
//! per target; targets run concurrently. The resulting [`ResponseAction`]
//! is COMPLETED only when every step on every target succeeded.

mod steps;

pub use steps::{steps_for, InfrastructureSteps, SimulatedSteps, Step, StepRunner};

use crate::decision::Decision;
use crate::error::ExecutionError;
use crate::models::{unix_now, ActionStatus, ActionType, ResponseAction};
use crate::observability::AgentMetrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

pub struct RunbookExecutor {
    runner: Arc<dyn StepRunner>,
    metrics: AgentMetrics,
}

impl RunbookExecutor {
    pub fn new(runner: Arc<dyn StepRunner>) -> Self {
        Self {
            runner,
            metrics: AgentMetrics::new(),
        }
    }

    pub async fn execute(&self, action_type: ActionType, targets: &[String]) -> ResponseAction {
        let reason = format!("Automated {}", action_type);
        self.run(new_action(action_type, targets, reason, None)).await
    }

    /// Execute an action given by name; unknown names run INVESTIGATE
    pub async fn execute_named(&self, name: &str, targets: &[String]) -> ResponseAction {
        let action_type = match name.parse::<ActionType>() {
            Ok(action_type) => action_type,
            Err(_) => {
                let e = ExecutionError::UnknownAction {
                    name: name.to_string(),
                };
                warn!(error = %e, "Falling back to INVESTIGATE");
                ActionType::Investigate
            }
        };
        self.execute(action_type, targets).await
    }

    /// Execute a decision, carrying its reasoning and oracle request id
    pub async fn execute_decision(&self, decision: &Decision, targets: &[String]) -> ResponseAction {
        let action = new_action(
            decision.action_type,
            targets,
            decision.reasoning.clone(),
            decision.oracle_request_id.clone(),
        );
        self.run(action).await
    }

    async fn run(&self, mut action: ResponseAction) -> ResponseAction {
        let start = Instant::now();
        let steps = steps_for(action.action_type);

        info!(
            action_id = %action.action_id,
            action_type = %action.action_type,
            targets = action.target_subjects.len(),
            steps = steps.len(),
            "Executing runbook"
        );

        let mut tasks = JoinSet::new();
        for target in action.target_subjects.iter().cloned() {
            let runner = self.runner.clone();
            tasks.spawn(async move {
                for step in steps {
                    runner.run(*step, &target).await?;
                }
                Ok::<(), ExecutionError>(())
            });
        }

        let mut failures = 0usize;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    error!(action_id = %action.action_id, error = %e, "Runbook step failed");
                }
                Err(e) => {
                    failures += 1;
                    error!(action_id = %action.action_id, error = %e, "Runbook task aborted");
                }
            }
        }

        let status = if failures == 0 {
            ActionStatus::Completed
        } else {
            ActionStatus::Failed
        };
        if let Err(e) = action.transition(status) {
            // Fresh actions are always INITIATED
            error!(error = %e, "Unexpected action state");
        }

        self.metrics
            .observe_runbook_latency(start.elapsed().as_secs_f64());
        info!(
            action_id = %action.action_id,
            status = %action.status,
            failed_targets = failures,
            "Runbook finished"
        );

        action
    }
}

fn new_action(
    action_type: ActionType,
    targets: &[String],
    reason: String,
    oracle_request_id: Option<String>,
) -> ResponseAction {
    let id = uuid::Uuid::new_v4().simple().to_string();
    ResponseAction {
        action_id: format!("ACTION-{}", &id[..12]),
        action_type,
        target_subjects: targets.to_vec(),
        reason,
        status: ActionStatus::Initiated,
        timestamp: unix_now(),
        oracle_request_id,
    }
}
