//! Detector worker: forwards baseline alerts to the responder

use super::{Inbox, WorkerContext, WorkerRole};
use crate::anomaly::DetectionLoop;
use crate::counters::Counter;
use crate::models::{AnomalyAlert, Envelope};
use crate::observability::AgentMetrics;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

pub struct DetectorWorker {
    ctx: WorkerContext,
    detection: DetectionLoop,
    alerts: mpsc::Receiver<AnomalyAlert>,
    metrics: AgentMetrics,
}

impl DetectorWorker {
    pub fn new(
        ctx: WorkerContext,
        detection: DetectionLoop,
        alerts: mpsc::Receiver<AnomalyAlert>,
    ) -> Self {
        let detection = detection.with_health(ctx.health.clone());
        Self {
            ctx,
            detection,
            alerts,
            metrics: AgentMetrics::new(),
        }
    }

    pub async fn run(self, mut inbox: Inbox, mut shutdown: broadcast::Receiver<()>) {
        info!(agent = %self.ctx.name, "Detector worker started");

        let Self {
            ctx,
            detection,
            mut alerts,
            metrics,
        } = self;
        let poller = tokio::spawn(detection.run(shutdown.resubscribe()));
        let mut inbox_open = true;

        loop {
            tokio::select! {
                maybe = alerts.recv() => {
                    let Some(alert) = maybe else {
                        info!("Detection loop ended");
                        break;
                    };
                    forward(&ctx, &metrics, alert).await;
                }
                maybe = inbox.recv(), if inbox_open => {
                    match maybe {
                        Some(inbound) => debug!(
                            kind = inbound.envelope.kind(),
                            sender = %inbound.sender,
                            "Detector worker ignoring message"
                        ),
                        None => inbox_open = false,
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down detector worker");
                    break;
                }
            }
        }

        // The poller may be parked on a full alert channel
        drop(alerts);
        if let Err(e) = poller.await {
            warn!(error = %e, "Detection loop task failed");
        }
        info!("Detector worker stopped");
    }
}

async fn forward(ctx: &WorkerContext, metrics: &AgentMetrics, alert: AnomalyAlert) {
    ctx.counters.increment(Counter::AnomaliesDetected);
    metrics.inc_anomalies_detected();
    ctx.logger.log_anomaly(&alert);

    ctx.send_to(WorkerRole::Responder.agent_name(), Envelope::new(alert))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::{BaselineTracker, DetectionConfig};
    use crate::counters::Counters;
    use crate::directory::AgentDirectory;
    use crate::health::HealthRegistry;
    use crate::infrastructure::MetricsSource;
    use crate::models::SubjectMetrics;
    use crate::transport::{ChannelDelivery, Transport};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::time::Duration;

    /// Every subject reports a burst of errors on every poll
    struct ErroringFleet;

    #[async_trait]
    impl MetricsSource for ErroringFleet {
        async fn list_subjects(&self) -> anyhow::Result<Vec<String>> {
            Ok((0..10).map(|i| format!("server-{}", i)).collect())
        }

        async fn fetch(&self, subject_id: &str) -> anyhow::Result<SubjectMetrics> {
            Ok(SubjectMetrics {
                subject_id: subject_id.to_string(),
                cpu_usage: 40.0,
                memory_usage: 40.0,
                disk_usage: 50.0,
                network_latency: 20.0,
                error_count: 50,
                timestamp: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_shutdown_with_backed_up_alerts() {
        let delivery = Arc::new(ChannelDelivery::new());
        let ctx = WorkerContext::new(
            "monitoring_agent",
            Transport::new(Arc::new(AgentDirectory::new()), delivery.clone()),
            Arc::new(Counters::new()),
            HealthRegistry::new(),
        );
        let (detection, alerts) = DetectionLoop::new(
            Arc::new(ErroringFleet),
            Arc::new(BaselineTracker::new()),
            DetectionConfig {
                interval: Duration::from_millis(1),
                jitter: Duration::ZERO,
                max_subjects: 10,
                buffer_size: 1,
            },
        );
        let counters = ctx.counters.clone();
        let inbox = delivery.mailbox("monitoring_agent");
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(DetectorWorker::new(ctx, detection, alerts).run(inbox, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("detector worker did not stop")
            .unwrap();
        assert!(counters.get(Counter::AnomaliesDetected) > 0);
    }
}
