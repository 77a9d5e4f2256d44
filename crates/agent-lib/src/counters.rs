//! Per-agent work counters
//!
//! Monotonic tallies of completed work, mirrored to a JSON file after every
//! increment for audit. A failed write is logged and the in-memory value
//! stays authoritative.

use crate::persistence::{read_json, write_json_atomic};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Counter {
    TestsRun,
    IncidentsPrevented,
    AnomaliesDetected,
    ActionsTaken,
    IncidentsResolved,
    NotificationsSent,
    OracleDecisions,
}

impl Counter {
    pub const ALL: [Counter; 7] = [
        Counter::TestsRun,
        Counter::IncidentsPrevented,
        Counter::AnomaliesDetected,
        Counter::ActionsTaken,
        Counter::IncidentsResolved,
        Counter::NotificationsSent,
        Counter::OracleDecisions,
    ];

    fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::TestsRun => "tests_run",
            Counter::IncidentsPrevented => "incidents_prevented",
            Counter::AnomaliesDetected => "anomalies_detected",
            Counter::ActionsTaken => "actions_taken",
            Counter::IncidentsResolved => "incidents_resolved",
            Counter::NotificationsSent => "notifications_sent",
            Counter::OracleDecisions => "oracle_decisions",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Counters {
    values: [AtomicU64; 7],
    persistence_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl Counters {
    pub fn new() -> Self {
        Self {
            values: Default::default(),
            persistence_path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Counters mirrored to `path`, resuming from any values already there
    pub fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let counters = Self {
            persistence_path: Some(path.clone()),
            ..Self::new()
        };

        match read_json::<BTreeMap<Counter, u64>>(&path) {
            Ok(Some(stored)) => {
                for (counter, value) in stored {
                    counters.values[counter.index()].store(value, Ordering::SeqCst);
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %format!("{:#}", e), "Ignoring unreadable counters file"),
        }

        counters
    }

    /// Add one and return the new value
    pub fn increment(&self, counter: Counter) -> u64 {
        let value = self.values[counter.index()].fetch_add(1, Ordering::SeqCst) + 1;
        self.persist();
        value
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.values[counter.index()].load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BTreeMap<Counter, u64> {
        Counter::ALL
            .into_iter()
            .map(|counter| (counter, self.get(counter)))
            .collect()
    }

    fn persist(&self) {
        let Some(path) = &self.persistence_path else {
            return;
        };

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if let Err(e) = write_json_atomic(path, &self.snapshot()) {
            warn!(error = %format!("{:#}", e), "Failed to persist counters");
        }
    }
}

impl Default for Counters {
    fn default() -> Self {
        Self::new()
    }
}
