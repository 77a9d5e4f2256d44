//! Canary test runs
//!
//! A run trials an update on a random sample of its targets for a fixed
//! number of unit intervals, counting errors and warnings per sampled
//! subject per interval, then turns the error rate and a latency reading
//! into a DEPLOY / INVESTIGATE / ROLLBACK verdict.

use super::signal::{FaultSignal, MetadataFaultSignal};
use crate::error::CanaryError;
use crate::models::{CanaryRecommendation, CanaryTestResult, UpdatePackage};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Error rate above which an update is rolled back
pub const ROLLBACK_ERROR_RATE: f64 = 0.05;
/// Error rate above which an update needs investigation
pub const INVESTIGATE_ERROR_RATE: f64 = 0.01;
/// Latency impact above which an update needs investigation
pub const INVESTIGATE_LATENCY_IMPACT: f64 = 0.2;

const WARNING_PROBABILITY: f64 = 0.15;

#[derive(Debug, Clone)]
pub struct CanaryConfig {
    /// Fraction of targets trialled (default: 0.01)
    pub sample_fraction: f64,
    /// Number of observation intervals (default: 30)
    pub window_units: u32,
    /// Length of one observation interval (default: 1 second)
    pub unit_interval: Duration,
    /// Half-width of the latency impact range (default: 0.3)
    pub latency_bound: f64,
    /// Fixed seed for reproducible runs; entropy when unset
    pub seed: Option<u64>,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            sample_fraction: 0.01,
            window_units: 30,
            unit_interval: Duration::from_secs(1),
            latency_bound: 0.3,
            seed: None,
        }
    }
}

/// Verdict for a measured error rate and latency impact
pub fn recommend(error_rate: f64, latency_impact: f64) -> CanaryRecommendation {
    if error_rate > ROLLBACK_ERROR_RATE {
        CanaryRecommendation::Rollback
    } else if error_rate > INVESTIGATE_ERROR_RATE || latency_impact > INVESTIGATE_LATENCY_IMPACT {
        CanaryRecommendation::Investigate
    } else {
        CanaryRecommendation::Deploy
    }
}

/// Number of targets trialled for a given fleet size
pub fn sample_size(targets: usize, fraction: f64) -> usize {
    let wanted = (targets as f64 * fraction).round() as usize;
    wanted.max(1).min(targets)
}

struct RunningSlot<'a> {
    running: &'a DashMap<String, Arc<AtomicBool>>,
    update_id: &'a str,
}

impl Drop for RunningSlot<'_> {
    fn drop(&mut self) {
        self.running.remove(self.update_id);
    }
}

/// Runs canary tests; one tester serves concurrent runs for different
/// updates. A second run of an update already under test is refused.
pub struct CanaryTester {
    config: CanaryConfig,
    signal: Arc<dyn FaultSignal>,
    rng: Mutex<StdRng>,
    running: DashMap<String, Arc<AtomicBool>>,
}

impl CanaryTester {
    pub fn new(config: CanaryConfig) -> Self {
        Self::with_signal(config, Arc::new(MetadataFaultSignal::default()))
    }

    pub fn with_signal(config: CanaryConfig, signal: Arc<dyn FaultSignal>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            config,
            signal,
            rng: Mutex::new(rng),
            running: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CanaryConfig {
        &self.config
    }

    /// Updates currently inside their observation window
    pub fn running(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Ask a running test to stop at the next interval boundary.
    /// Returns false when no test for `update_id` is running.
    pub fn withdraw(&self, update_id: &str) -> bool {
        match self.running.get(update_id) {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(update_id = %update_id, "Canary test withdrawal requested");
                true
            }
            None => false,
        }
    }

    pub async fn run_test(&self, update: &UpdatePackage) -> Result<CanaryTestResult, CanaryError> {
        if update.target_subjects.is_empty() {
            return Err(CanaryError::NoTargets {
                update_id: update.update_id.clone(),
            });
        }

        let withdrawn = Arc::new(AtomicBool::new(false));
        match self.running.entry(update.update_id.clone()) {
            Entry::Occupied(_) => {
                warn!(update_id = %update.update_id, "Canary test already running for update");
                return Err(CanaryError::AlreadyRunning {
                    update_id: update.update_id.clone(),
                });
            }
            Entry::Vacant(slot) => {
                slot.insert(withdrawn.clone());
            }
        }
        // Also clears the slot when the run is aborted mid-window
        let _slot = RunningSlot {
            running: &self.running,
            update_id: &update.update_id,
        };

        self.observe(update, &withdrawn).await
    }

    async fn observe(
        &self,
        update: &UpdatePackage,
        withdrawn: &AtomicBool,
    ) -> Result<CanaryTestResult, CanaryError> {
        let total = update.target_subjects.len();
        let count = sample_size(total, self.config.sample_fraction);
        let sampled = self.sample(&update.target_subjects, count);
        let probabilities: Vec<f64> = sampled
            .iter()
            .map(|subject| self.signal.fault_probability(update, subject))
            .collect();

        info!(
            update_id = %update.update_id,
            version = %update.version,
            sampled = count,
            total = total,
            window_units = self.config.window_units,
            "Starting canary test"
        );

        let mut errors = 0u64;
        let mut warnings = 0u64;

        for unit in 0..self.config.window_units {
            if withdrawn.load(Ordering::SeqCst) {
                warn!(update_id = %update.update_id, unit = unit, "Canary test withdrawn");
                return Err(CanaryError::Withdrawn {
                    update_id: update.update_id.clone(),
                });
            }

            tokio::time::sleep(self.config.unit_interval).await;

            let (unit_errors, unit_warnings) = self.draw_unit(&probabilities);
            errors += unit_errors;
            warnings += unit_warnings;

            if unit_errors > 0 {
                debug!(update_id = %update.update_id, unit = unit, errors = unit_errors, "Errors on canary subjects");
            }
        }

        if withdrawn.load(Ordering::SeqCst) {
            return Err(CanaryError::Withdrawn {
                update_id: update.update_id.clone(),
            });
        }

        let observations = (count as u64 * self.config.window_units as u64).max(1) as f64;
        let error_rate = errors as f64 / observations;
        let warning_rate = warnings as f64 / observations;
        let latency_impact = self.latency_reading();
        let recommendation = recommend(error_rate, latency_impact);

        let details = match recommendation {
            CanaryRecommendation::Rollback => {
                format!("High error rate detected: {:.2}%", error_rate * 100.0)
            }
            CanaryRecommendation::Investigate => format!(
                "Elevated metrics: {:.2}% errors, {:+.2}x latency",
                error_rate * 100.0,
                latency_impact
            ),
            CanaryRecommendation::Deploy => "All metrics within acceptable range".to_string(),
        };

        info!(
            update_id = %update.update_id,
            errors = errors,
            warnings = warnings,
            error_rate = error_rate,
            warning_rate = warning_rate,
            latency_impact = latency_impact,
            recommendation = %recommendation,
            "Canary test complete"
        );

        Ok(CanaryTestResult {
            update_id: update.update_id.clone(),
            success: recommendation == CanaryRecommendation::Deploy,
            affected_count: count,
            error_rate,
            latency_impact,
            recommendation,
            details,
        })
    }

    fn rng(&self) -> std::sync::MutexGuard<'_, StdRng> {
        // A panic while holding the rng cannot leave it in a bad state
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn sample(&self, targets: &[String], count: usize) -> Vec<String> {
        let mut rng = self.rng();
        targets
            .choose_multiple(&mut *rng, count)
            .cloned()
            .collect()
    }

    fn draw_unit(&self, probabilities: &[f64]) -> (u64, u64) {
        let mut rng = self.rng();
        let mut errors = 0;
        let mut warnings = 0;

        for &p in probabilities {
            if p <= 0.0 {
                continue;
            }
            if rng.gen::<f64>() < p {
                errors += 1;
            } else if rng.gen::<f64>() < WARNING_PROBABILITY {
                warnings += 1;
            }
        }

        (errors, warnings)
    }

    fn latency_reading(&self) -> f64 {
        let bound = self.config.latency_bound.abs();
        if bound == 0.0 {
            return 0.0;
        }
        self.rng().gen_range(-bound..=bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canary::KnownFailures;

    fn package(targets: usize, version: &str) -> UpdatePackage {
        UpdatePackage {
            update_id: "UPD-100".to_string(),
            version: version.to_string(),
            description: "routine patch".to_string(),
            target_subjects: (0..targets).map(|i| format!("server-{}", i)).collect(),
            timestamp: 0,
        }
    }

    fn fast_config(fraction: f64, units: u32) -> CanaryConfig {
        CanaryConfig {
            sample_fraction: fraction,
            window_units: units,
            unit_interval: Duration::from_millis(1),
            latency_bound: 0.3,
            seed: Some(7),
        }
    }

    #[test]
    fn test_recommendation_boundaries() {
        assert_eq!(recommend(0.051, 0.0), CanaryRecommendation::Rollback);
        assert_eq!(recommend(0.05, 0.0), CanaryRecommendation::Investigate);
        assert_eq!(recommend(0.011, 0.0), CanaryRecommendation::Investigate);
        assert_eq!(recommend(0.01, 0.0), CanaryRecommendation::Deploy);
        assert_eq!(recommend(0.009, 0.1), CanaryRecommendation::Deploy);
        assert_eq!(recommend(0.0, 0.21), CanaryRecommendation::Investigate);
        assert_eq!(recommend(0.0, 0.2), CanaryRecommendation::Deploy);
    }

    #[test]
    fn test_sample_size() {
        assert_eq!(sample_size(50, 0.01), 1);
        assert_eq!(sample_size(50, 0.2), 10);
        assert_eq!(sample_size(3, 0.5), 2);
        assert_eq!(sample_size(4, 5.0), 4);
        assert_eq!(sample_size(1, 0.0), 1);
    }

    #[tokio::test]
    async fn test_empty_targets() {
        let tester = CanaryTester::new(fast_config(0.1, 3));
        let err = tester.run_test(&package(0, "1.0.0")).await.unwrap_err();
        assert_eq!(
            err,
            CanaryError::NoTargets {
                update_id: "UPD-100".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_clean_package_never_errors() {
        let tester = CanaryTester::new(fast_config(0.2, 5));
        let result = tester.run_test(&package(50, "1.0.1")).await.unwrap();

        assert_eq!(result.affected_count, 10);
        assert_eq!(result.error_rate, 0.0);
        assert!(result.latency_impact.abs() <= 0.3);
        assert_ne!(result.recommendation, CanaryRecommendation::Rollback);
        assert_eq!(
            result.success,
            result.recommendation == CanaryRecommendation::Deploy
        );
    }

    #[tokio::test]
    async fn test_known_failures_force_rollback() {
        // Every target fails, so whichever are sampled all error every unit
        let failed: Vec<String> = (0..20).map(|i| format!("server-{}", i)).collect();
        let tester = CanaryTester::with_signal(fast_config(0.25, 4), Arc::new(KnownFailures::new(failed)));

        let result = tester.run_test(&package(20, "1.0.1")).await.unwrap();

        assert_eq!(result.affected_count, 5);
        assert_eq!(result.error_rate, 1.0);
        assert_eq!(result.recommendation, CanaryRecommendation::Rollback);
        assert!(!result.success);
        assert!(result.details.starts_with("High error rate"));
    }

    #[tokio::test]
    async fn test_seeded_runs_are_reproducible() {
        let a = CanaryTester::new(fast_config(0.5, 20));
        let b = CanaryTester::new(fast_config(0.5, 20));

        let ra = a.run_test(&package(10, "2.0.0-broken")).await.unwrap();
        let rb = b.run_test(&package(10, "2.0.0-broken")).await.unwrap();
        assert_eq!(ra, rb);
    }

    #[tokio::test]
    async fn test_withdraw_aborts_window() {
        let config = CanaryConfig {
            unit_interval: Duration::from_millis(20),
            ..fast_config(0.1, 500)
        };
        let tester = Arc::new(CanaryTester::new(config));

        let runner = tester.clone();
        let handle = tokio::spawn(async move { runner.run_test(&package(10, "1.0.0")).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tester.running(), vec!["UPD-100".to_string()]);
        assert!(tester.withdraw("UPD-100"));

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            outcome,
            Err(CanaryError::Withdrawn {
                update_id: "UPD-100".to_string()
            })
        );
        assert!(tester.running().is_empty());
        assert!(!tester.withdraw("UPD-100"));
    }

    #[tokio::test]
    async fn test_second_run_of_same_update_is_refused() {
        let config = CanaryConfig {
            unit_interval: Duration::from_millis(20),
            ..fast_config(0.1, 500)
        };
        let tester = Arc::new(CanaryTester::new(config));

        let runner = tester.clone();
        let first = tokio::spawn(async move { runner.run_test(&package(10, "1.0.0")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = tester.run_test(&package(10, "1.0.0")).await;
        assert_eq!(
            second,
            Err(CanaryError::AlreadyRunning {
                update_id: "UPD-100".to_string()
            })
        );

        // The refused run must not disturb the one in progress
        assert_eq!(tester.running(), vec!["UPD-100".to_string()]);
        assert!(tester.withdraw("UPD-100"));
        let outcome = tokio::time::timeout(Duration::from_secs(2), first)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, Err(CanaryError::Withdrawn { .. })));
        assert!(tester.running().is_empty());
    }

    #[tokio::test]
    async fn test_aborted_run_is_no_longer_running() {
        let config = CanaryConfig {
            unit_interval: Duration::from_millis(20),
            ..fast_config(0.1, 500)
        };
        let tester = Arc::new(CanaryTester::new(config));

        let runner = tester.clone();
        let handle = tokio::spawn(async move { runner.run_test(&package(10, "1.0.0")).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tester.running().len(), 1);

        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());

        assert!(tester.running().is_empty());
        assert!(!tester.withdraw("UPD-100"));
    }
}
