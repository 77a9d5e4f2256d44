//! Per-subject baselines
//!
//! Each subject's first sample becomes its baseline. Later samples are
//! compared against it; samples that trip no threshold are folded into
//! the cpu/memory exponential moving average, anomalous ones are not.

use crate::models::{unix_now, AlertRecommendation, AnomalyAlert, MetricType, Severity, SubjectMetrics};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Smoothing factor for the moving average
pub const DEFAULT_ALPHA: f64 = 0.1;

/// Snapshot of one subject's baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub cpu: f64,
    pub memory: f64,
    pub error_count: u64,
    /// Samples folded into the average, including the first
    pub samples: u64,
}

impl Baseline {
    fn from_sample(metrics: &SubjectMetrics) -> Self {
        Self {
            cpu: metrics.cpu_usage,
            memory: metrics.memory_usage,
            error_count: metrics.error_count,
            samples: 1,
        }
    }

    fn absorb(&mut self, metrics: &SubjectMetrics, alpha: f64) {
        self.cpu = alpha * metrics.cpu_usage + (1.0 - alpha) * self.cpu;
        self.memory = alpha * metrics.memory_usage + (1.0 - alpha) * self.memory;
        self.samples += 1;
    }
}

/// Thresholds applied against a subject's baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineThresholds {
    /// Absolute error count above which a sample is critical
    pub error_count: u64,
    /// CPU multiple of baseline considered a spike
    pub cpu_factor: f64,
    /// Memory multiple of baseline considered a leak
    pub memory_factor: f64,
    pub alpha: f64,
}

impl Default for BaselineThresholds {
    fn default() -> Self {
        Self {
            error_count: 10,
            cpu_factor: 2.0,
            memory_factor: 1.8,
            alpha: DEFAULT_ALPHA,
        }
    }
}

/// Sharded baseline store; observations for different subjects never
/// contend.
pub struct BaselineTracker {
    baselines: DashMap<String, Baseline>,
    thresholds: BaselineThresholds,
}

impl BaselineTracker {
    pub fn new() -> Self {
        Self::with_thresholds(BaselineThresholds::default())
    }

    pub fn with_thresholds(thresholds: BaselineThresholds) -> Self {
        Self {
            baselines: DashMap::new(),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &BaselineThresholds {
        &self.thresholds
    }

    /// Compare a sample with the subject's baseline.
    ///
    /// Returns at most one alert. Checks run in priority order: error count,
    /// cpu, memory.
    pub fn observe(&self, metrics: &SubjectMetrics) -> Option<AnomalyAlert> {
        match self.baselines.entry(metrics.subject_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(Baseline::from_sample(metrics));
                info!(
                    subject_id = %metrics.subject_id,
                    cpu = metrics.cpu_usage,
                    memory = metrics.memory_usage,
                    "Established baseline"
                );
                None
            }
            Entry::Occupied(mut slot) => {
                let baseline = slot.get_mut();
                let alert = self.evaluate(metrics, baseline);
                if alert.is_none() {
                    baseline.absorb(metrics, self.thresholds.alpha);
                    debug!(
                        subject_id = %metrics.subject_id,
                        cpu = baseline.cpu,
                        memory = baseline.memory,
                        "Baseline updated"
                    );
                }
                alert
            }
        }
    }

    fn evaluate(&self, metrics: &SubjectMetrics, baseline: &Baseline) -> Option<AnomalyAlert> {
        let t = &self.thresholds;

        let (severity, metric_type, current, expected, confidence, recommendation) =
            if metrics.error_count > t.error_count {
                (
                    Severity::Critical,
                    MetricType::Errors,
                    metrics.error_count as f64,
                    baseline.error_count as f64,
                    0.95,
                    AlertRecommendation::RollbackImmediately,
                )
            } else if metrics.cpu_usage > baseline.cpu * t.cpu_factor {
                (
                    Severity::High,
                    MetricType::Cpu,
                    metrics.cpu_usage,
                    baseline.cpu,
                    0.9,
                    AlertRecommendation::InvestigateHighCpu,
                )
            } else if metrics.memory_usage > baseline.memory * t.memory_factor {
                (
                    Severity::Medium,
                    MetricType::Memory,
                    metrics.memory_usage,
                    baseline.memory,
                    0.85,
                    AlertRecommendation::InvestigateMemoryLeak,
                )
            } else {
                return None;
            };

        Some(AnomalyAlert {
            alert_id: alert_id(&metrics.subject_id),
            severity,
            subject_id: metrics.subject_id.clone(),
            metric_type,
            current_value: current,
            expected_value: expected,
            confidence,
            recommendation,
            timestamp: unix_now(),
        })
    }

    pub fn baseline(&self, subject_id: &str) -> Option<Baseline> {
        self.baselines.get(subject_id).map(|b| *b.value())
    }

    /// Drop a subject that is no longer monitored
    pub fn forget(&self, subject_id: &str) -> bool {
        self.baselines.remove(subject_id).is_some()
    }

    /// Drop every subject not in `live`, returning how many were removed
    pub fn retain_subjects(&self, live: &[String]) -> usize {
        let before = self.baselines.len();
        self.baselines.retain(|subject, _| live.iter().any(|s| s == subject));
        before - self.baselines.len()
    }

    pub fn len(&self) -> usize {
        self.baselines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.baselines.is_empty()
    }
}

impl Default for BaselineTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn alert_id(subject_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("ALERT-{}-{}", subject_id, &suffix[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(subject: &str, cpu: f64, memory: f64, errors: u64) -> SubjectMetrics {
        SubjectMetrics {
            subject_id: subject.to_string(),
            cpu_usage: cpu,
            memory_usage: memory,
            disk_usage: 40.0,
            network_latency: 12.0,
            error_count: errors,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_first_observation_never_alerts() {
        let tracker = BaselineTracker::new();
        // Wildly anomalous values still only seed the baseline
        assert!(tracker.observe(&sample("server-1", 99.0, 99.0, 500)).is_none());
        assert_eq!(tracker.len(), 1);

        let baseline = tracker.baseline("server-1").unwrap();
        assert_eq!(baseline.cpu, 99.0);
        assert_eq!(baseline.error_count, 500);
        assert_eq!(baseline.samples, 1);
    }

    #[test]
    fn test_ema_update() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 50.0, 40.0, 0));
        assert!(tracker.observe(&sample("server-1", 60.0, 40.0, 0)).is_none());

        let baseline = tracker.baseline("server-1").unwrap();
        assert!((baseline.cpu - 51.0).abs() < 1e-9);
        assert!((baseline.memory - 40.0).abs() < 1e-9);
        assert_eq!(baseline.samples, 2);
    }

    #[test]
    fn test_error_threshold_is_critical() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 30.0, 40.0, 0));

        let alert = tracker.observe(&sample("server-1", 30.0, 40.0, 11)).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.metric_type, MetricType::Errors);
        assert_eq!(alert.recommendation, AlertRecommendation::RollbackImmediately);
        assert_eq!(alert.current_value, 11.0);
        assert_eq!(alert.confidence, 0.95);
        assert!(alert.alert_id.starts_with("ALERT-server-1-"));
    }

    #[test]
    fn test_error_count_at_threshold_does_not_alert() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 30.0, 40.0, 0));
        assert!(tracker.observe(&sample("server-1", 30.0, 40.0, 10)).is_none());
    }

    #[test]
    fn test_errors_take_priority_over_cpu_and_memory() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 20.0, 20.0, 0));

        let alert = tracker.observe(&sample("server-1", 90.0, 90.0, 50)).unwrap();
        assert_eq!(alert.metric_type, MetricType::Errors);
    }

    #[test]
    fn test_cpu_spike_is_high() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 20.0, 40.0, 0));

        let alert = tracker.observe(&sample("server-1", 41.0, 90.0, 0)).unwrap();
        assert_eq!(alert.severity, Severity::High);
        assert_eq!(alert.metric_type, MetricType::Cpu);
        assert_eq!(alert.expected_value, 20.0);
        assert_eq!(alert.recommendation, AlertRecommendation::InvestigateHighCpu);
    }

    #[test]
    fn test_memory_growth_is_medium() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 20.0, 40.0, 0));

        let alert = tracker.observe(&sample("server-1", 25.0, 73.0, 0)).unwrap();
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.metric_type, MetricType::Memory);
        assert_eq!(alert.confidence, 0.85);
    }

    #[test]
    fn test_anomalous_sample_does_not_move_baseline() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 20.0, 40.0, 0));
        tracker.observe(&sample("server-1", 80.0, 40.0, 0)).unwrap();

        let baseline = tracker.baseline("server-1").unwrap();
        assert_eq!(baseline.cpu, 20.0);
        assert_eq!(baseline.samples, 1);
    }

    #[test]
    fn test_subjects_are_independent() {
        let tracker = BaselineTracker::new();
        tracker.observe(&sample("server-1", 20.0, 40.0, 0));
        assert!(tracker.observe(&sample("server-2", 80.0, 40.0, 0)).is_none());
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_forget_and_retain() {
        let tracker = BaselineTracker::new();
        for id in ["server-1", "server-2", "server-3"] {
            tracker.observe(&sample(id, 20.0, 40.0, 0));
        }

        assert!(tracker.forget("server-1"));
        assert!(!tracker.forget("server-1"));

        let removed = tracker.retain_subjects(&["server-3".to_string()]);
        assert_eq!(removed, 1);
        assert!(tracker.baseline("server-2").is_none());
        assert!(tracker.baseline("server-3").is_some());

        // A forgotten subject starts over with a fresh baseline
        assert!(tracker.observe(&sample("server-1", 95.0, 40.0, 0)).is_none());
    }
}
