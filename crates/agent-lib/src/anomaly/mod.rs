//! Baseline-driven anomaly detection
//!
//! - [`BaselineTracker`]: per-subject moving-average baselines and thresholds
//! - [`DetectionLoop`]: periodic polling of a [`MetricsSource`](crate::infrastructure::MetricsSource)

mod baseline;
mod detector;

pub use baseline::{Baseline, BaselineThresholds, BaselineTracker, DEFAULT_ALPHA};
pub use detector::{CycleReport, DetectionConfig, DetectionLoop};
