//! Detection loop
//!
//! Periodically lists the monitored subjects, fetches each one's metrics
//! and runs them through the baseline tracker. Alerts are pushed onto a
//! channel for the detector worker to forward.

use super::BaselineTracker;
use crate::health::{components, HealthRegistry};
use crate::infrastructure::MetricsSource;
use crate::models::AnomalyAlert;
use crate::observability::AgentMetrics;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Base poll interval (default: 5 seconds)
    pub interval: Duration,
    /// Maximum random delay added to each interval (default: 500ms)
    pub jitter: Duration,
    /// Cap on subjects polled per cycle (default: 10)
    pub max_subjects: usize,
    /// Alert channel depth
    pub buffer_size: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            jitter: Duration::from_millis(500),
            max_subjects: 10,
            buffer_size: 100,
        }
    }
}

/// Outcome of one poll cycle
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CycleReport {
    pub polled: usize,
    pub errors: usize,
    pub forgotten: usize,
    pub alerts: Vec<AnomalyAlert>,
}

pub struct DetectionLoop {
    source: Arc<dyn MetricsSource>,
    tracker: Arc<BaselineTracker>,
    config: DetectionConfig,
    alert_tx: mpsc::Sender<AnomalyAlert>,
    health: Option<HealthRegistry>,
    metrics: AgentMetrics,
}

impl DetectionLoop {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        tracker: Arc<BaselineTracker>,
        config: DetectionConfig,
    ) -> (Self, mpsc::Receiver<AnomalyAlert>) {
        let (alert_tx, alert_rx) = mpsc::channel(config.buffer_size.max(1));

        let detection_loop = Self {
            source,
            tracker,
            config,
            alert_tx,
            health: None,
            metrics: AgentMetrics::new(),
        };

        (detection_loop, alert_rx)
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Poll until shutdown is signalled
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            max_subjects = self.config.max_subjects,
            "Starting detection loop"
        );

        loop {
            let start = Instant::now();
            let report = self.poll_once().await;

            for alert in report.alerts {
                if self.alert_tx.send(alert).await.is_err() {
                    info!("Alert receiver dropped, stopping detection loop");
                    return;
                }
            }

            debug!(
                polled = report.polled,
                errors = report.errors,
                forgotten = report.forgotten,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Detection cycle complete"
            );

            tokio::select! {
                _ = sleep(self.next_delay()) => {}
                _ = shutdown.recv() => {
                    info!("Shutting down detection loop");
                    break;
                }
            }
        }
    }

    /// Run a single cycle: list, fetch, observe
    pub async fn poll_once(&self) -> CycleReport {
        let mut report = CycleReport::default();

        let mut subjects = match self.source.list_subjects().await {
            Ok(subjects) => subjects,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to list subjects, skipping cycle");
                self.mark_health(Some(format!("{:#}", e))).await;
                return report;
            }
        };
        subjects.truncate(self.config.max_subjects);

        report.forgotten = self.tracker.retain_subjects(&subjects);

        for subject_id in &subjects {
            // Fetch holds no tracker lock; observe is synchronous
            match self.source.fetch(subject_id).await {
                Ok(sample) => {
                    report.polled += 1;
                    if let Some(alert) = self.tracker.observe(&sample) {
                        report.alerts.push(alert);
                    }
                }
                Err(e) => {
                    report.errors += 1;
                    debug!(subject_id = %subject_id, error = %format!("{:#}", e), "Failed to fetch metrics");
                }
            }
        }

        self.metrics.set_subjects_monitored(self.tracker.len() as i64);

        let problem = (report.errors > 0 && report.polled == 0)
            .then(|| format!("all {} fetches failed", report.errors));
        self.mark_health(problem).await;

        report
    }

    fn next_delay(&self) -> Duration {
        let max_ms = self.config.jitter.as_millis() as u64;
        let jitter_ms = if max_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=max_ms)
        };
        self.config.interval + Duration::from_millis(jitter_ms)
    }

    async fn mark_health(&self, problem: Option<String>) {
        if let Some(health) = &self.health {
            match problem {
                Some(message) => health.set_degraded(components::DETECTOR, message).await,
                None => health.set_healthy(components::DETECTOR).await,
            }
        }
    }
}
