//! Canary worker: tests incoming updates and reports verdicts

use super::{Inbox, WorkerContext, WorkerRole};
use crate::canary::CanaryTester;
use crate::counters::Counter;
use crate::error::CanaryError;
use crate::health::components;
use crate::models::{CanaryRecommendation, CanaryTestResult, Envelope, Message, UpdatePackage};
use crate::observability::AgentMetrics;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

pub struct CanaryWorker {
    ctx: WorkerContext,
    tester: Arc<CanaryTester>,
    metrics: AgentMetrics,
}

impl CanaryWorker {
    pub fn new(ctx: WorkerContext, tester: Arc<CanaryTester>) -> Self {
        Self {
            ctx,
            tester,
            metrics: AgentMetrics::new(),
        }
    }

    /// Handle for withdrawals from outside the worker loop
    pub fn tester(&self) -> Arc<CanaryTester> {
        self.tester.clone()
    }

    pub async fn run(self, mut inbox: Inbox, mut shutdown: broadcast::Receiver<()>) {
        info!(agent = %self.ctx.name, "Canary worker started");
        let worker = Arc::new(self);
        let mut tests = JoinSet::new();

        loop {
            tokio::select! {
                maybe = inbox.recv() => {
                    let Some(inbound) = maybe else {
                        info!("Canary inbox closed");
                        break;
                    };
                    match inbound.envelope.message {
                        Message::UpdatePackage(update) => {
                            // Spawned so a withdrawal can reach the running window
                            let worker = worker.clone();
                            tests.spawn(async move { worker.handle_update(update).await; });
                        }
                        other => {
                            debug!(kind = other.kind(), sender = %inbound.sender, "Canary worker ignoring message");
                        }
                    }
                }
                Some(_) = tests.join_next(), if !tests.is_empty() => {}
                _ = shutdown.recv() => {
                    info!("Shutting down canary worker");
                    tests.abort_all();
                    break;
                }
            }
        }
    }

    /// Run one test and forward the verdict to the responder
    pub async fn handle_update(&self, update: UpdatePackage) -> Option<CanaryTestResult> {
        info!(
            update_id = %update.update_id,
            version = %update.version,
            targets = update.target_subjects.len(),
            "Received update for canary testing"
        );

        let result = match self.tester.run_test(&update).await {
            Ok(result) => result,
            Err(e @ (CanaryError::Withdrawn { .. } | CanaryError::AlreadyRunning { .. })) => {
                info!(error = %e, "Canary test ended early");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Canary test could not run");
                self.ctx.health.set_degraded(components::CANARY, e.to_string()).await;
                return None;
            }
        };
        self.ctx.health.set_healthy(components::CANARY).await;

        self.ctx.counters.increment(Counter::TestsRun);
        if result.recommendation == CanaryRecommendation::Rollback {
            let prevented = self.ctx.counters.increment(Counter::IncidentsPrevented);
            warn!(update_id = %result.update_id, prevented = prevented, "Bad update stopped by canary");
        }
        self.metrics
            .inc_canary_result(&result.recommendation.to_string());
        self.ctx.logger.log_canary_result(&result);

        self.ctx
            .send_to(
                WorkerRole::Responder.agent_name(),
                Envelope::new(result.clone()),
            )
            .await;

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canary::{CanaryConfig, KnownFailures};
    use crate::counters::Counters;
    use crate::directory::AgentDirectory;
    use crate::health::HealthRegistry;
    use crate::transport::{ChannelDelivery, Transport};
    use std::time::Duration;

    fn update(id: &str, targets: usize) -> UpdatePackage {
        UpdatePackage {
            update_id: id.to_string(),
            version: "2.4.1".to_string(),
            description: "routine patch".to_string(),
            target_subjects: (1..=targets).map(|i| format!("server-{}", i)).collect(),
            timestamp: 0,
        }
    }

    fn worker(failed: &[&str], units: u32) -> (CanaryWorker, Arc<Counters>, Arc<ChannelDelivery>) {
        let directory = Arc::new(AgentDirectory::new());
        directory.register("response_agent", "localhost", 8003, ["incident_response"]);
        let delivery = Arc::new(ChannelDelivery::new());
        let transport = Transport::new(directory, delivery.clone());
        let counters = Arc::new(Counters::new());
        let ctx = WorkerContext::new("canary_agent", transport, counters.clone(), HealthRegistry::new());

        let config = CanaryConfig {
            sample_fraction: 1.0,
            window_units: units,
            unit_interval: Duration::from_millis(5),
            seed: Some(7),
            ..CanaryConfig::default()
        };
        let tester = CanaryTester::with_signal(config, Arc::new(KnownFailures::new(failed.iter().copied())));
        (CanaryWorker::new(ctx, Arc::new(tester)), counters, delivery)
    }

    #[tokio::test]
    async fn test_rollback_verdict_is_counted_and_forwarded() {
        let (worker, counters, delivery) = worker(&["server-1", "server-2"], 3);
        let mut responder = delivery.mailbox("response_agent");

        let result = worker.handle_update(update("UPD-1", 4)).await.unwrap();

        assert_eq!(result.recommendation, CanaryRecommendation::Rollback);
        assert_eq!(counters.get(Counter::TestsRun), 1);
        assert_eq!(counters.get(Counter::IncidentsPrevented), 1);

        let inbound = responder.recv().await.unwrap();
        assert_eq!(inbound.sender, "canary_agent");
        assert_eq!(inbound.envelope.message, Message::CanaryTestResult(result));
    }

    #[tokio::test]
    async fn test_empty_update_is_not_counted() {
        let (worker, counters, _delivery) = worker(&[], 1);
        assert!(worker.handle_update(update("UPD-2", 0)).await.is_none());
        assert_eq!(counters.get(Counter::TestsRun), 0);
    }

    #[tokio::test]
    async fn test_withdrawn_run_is_not_counted() {
        let (worker, counters, _delivery) = worker(&[], 200);
        let tester = worker.tester();

        let run = worker.handle_update(update("UPD-3", 2));
        let withdraw = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(tester.withdraw("UPD-3"));
        };
        let (result, _) = tokio::join!(run, withdraw);

        assert!(result.is_none());
        assert_eq!(counters.get(Counter::TestsRun), 0);
        assert!(tester.running().is_empty());
    }
}
