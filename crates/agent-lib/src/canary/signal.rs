//! Fault probability sources for canary observation

use crate::models::UpdatePackage;
use std::collections::HashSet;

/// Per-interval probability that a sampled subject records an error
pub trait FaultSignal: Send + Sync {
    fn fault_probability(&self, update: &UpdatePackage, subject_id: &str) -> f64;
}

/// Flags packages whose metadata marks them as broken
#[derive(Debug, Clone)]
pub struct MetadataFaultSignal {
    pub probability: f64,
}

impl MetadataFaultSignal {
    pub fn is_faulty(update: &UpdatePackage) -> bool {
        update.version.to_lowercase().contains("broken")
            || update.description.to_lowercase().contains("faulty")
    }
}

impl Default for MetadataFaultSignal {
    fn default() -> Self {
        Self { probability: 0.1 }
    }
}

impl FaultSignal for MetadataFaultSignal {
    fn fault_probability(&self, update: &UpdatePackage, _subject_id: &str) -> f64 {
        if Self::is_faulty(update) {
            self.probability
        } else {
            0.0
        }
    }
}

/// Subjects already known to be failing always error; everything else
/// falls back to the package metadata.
#[derive(Debug, Clone, Default)]
pub struct KnownFailures {
    failed: HashSet<String>,
    fallback: MetadataFaultSignal,
}

impl KnownFailures {
    pub fn new<I, S>(failed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            failed: failed.into_iter().map(Into::into).collect(),
            fallback: MetadataFaultSignal::default(),
        }
    }

    pub fn mark_failed(&mut self, subject_id: impl Into<String>) {
        self.failed.insert(subject_id.into());
    }

    pub fn len(&self) -> usize {
        self.failed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failed.is_empty()
    }
}

impl FaultSignal for KnownFailures {
    fn fault_probability(&self, update: &UpdatePackage, subject_id: &str) -> f64 {
        if self.failed.contains(subject_id) {
            1.0
        } else {
            self.fallback.fault_probability(update, subject_id)
        }
    }
}
