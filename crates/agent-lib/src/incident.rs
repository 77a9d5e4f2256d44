//! Incident lifecycle
//!
//! Every incident moves DETECTED -> DECIDING -> EXECUTING -> NOTIFIED with
//! no skipping and no going back. The tracker keeps at most one in-flight
//! incident per subject; an incident leaves the tracker when it reaches
//! NOTIFIED or is abandoned.

use crate::error::IncidentError;
use crate::models::unix_now;
use crate::observability::AgentMetrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentState {
    Detected,
    Deciding,
    Executing,
    Notified,
}

impl IncidentState {
    /// The only state this one may move to
    pub fn successor(self) -> Option<IncidentState> {
        match self {
            IncidentState::Detected => Some(IncidentState::Deciding),
            IncidentState::Deciding => Some(IncidentState::Executing),
            IncidentState::Executing => Some(IncidentState::Notified),
            IncidentState::Notified => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.successor().is_none()
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IncidentState::Detected => write!(f, "DETECTED"),
            IncidentState::Deciding => write!(f, "DECIDING"),
            IncidentState::Executing => write!(f, "EXECUTING"),
            IncidentState::Notified => write!(f, "NOTIFIED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub incident_id: String,
    pub subject_id: String,
    pub state: IncidentState,
    pub opened_at: i64,
}

impl Incident {
    pub fn new(subject_id: impl Into<String>) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self {
            incident_id: format!("INC-{}", &id[..12]),
            subject_id: subject_id.into(),
            state: IncidentState::Detected,
            opened_at: unix_now(),
        }
    }

    pub fn advance(&mut self, to: IncidentState) -> Result<(), IncidentError> {
        if self.state.successor() != Some(to) {
            return Err(IncidentError::InvalidTransition {
                incident_id: self.incident_id.clone(),
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

/// In-flight incidents keyed by subject
pub struct IncidentTracker {
    open: DashMap<String, Incident>,
    metrics: AgentMetrics,
}

impl IncidentTracker {
    pub fn new() -> Self {
        Self {
            open: DashMap::new(),
            metrics: AgentMetrics::new(),
        }
    }

    /// Open an incident for `subject_id`.
    /// Fails with the id of the incident already in flight, if any.
    pub fn open(&self, subject_id: &str) -> Result<Incident, String> {
        let incident = match self.open.entry(subject_id.to_string()) {
            Entry::Occupied(existing) => return Err(existing.get().incident_id.clone()),
            Entry::Vacant(slot) => slot.insert(Incident::new(subject_id)).value().clone(),
        };

        self.metrics.set_incidents_open(self.open.len() as i64);
        info!(
            incident_id = %incident.incident_id,
            subject_id = %subject_id,
            "Incident opened"
        );
        Ok(incident)
    }

    /// Move the subject's incident forward. Reaching NOTIFIED closes it.
    pub fn advance(&self, subject_id: &str, to: IncidentState) -> Result<Incident, IncidentError> {
        let incident = {
            let mut entry = self
                .open
                .get_mut(subject_id)
                .ok_or_else(|| IncidentError::NotOpen {
                    subject_id: subject_id.to_string(),
                })?;
            entry.advance(to)?;
            entry.value().clone()
        };

        debug!(
            incident_id = %incident.incident_id,
            state = %incident.state,
            "Incident advanced"
        );

        if incident.state.is_terminal() {
            self.open.remove(subject_id);
            self.metrics.set_incidents_open(self.open.len() as i64);
            info!(incident_id = %incident.incident_id, "Incident closed");
        }

        Ok(incident)
    }

    /// Drop the subject's incident without completing it
    pub fn abandon(&self, subject_id: &str) -> Result<Incident, IncidentError> {
        let (_, incident) = self
            .open
            .remove(subject_id)
            .ok_or_else(|| IncidentError::NotOpen {
                subject_id: subject_id.to_string(),
            })?;
        self.metrics.set_incidents_open(self.open.len() as i64);
        Ok(incident)
    }

    pub fn get(&self, subject_id: &str) -> Option<Incident> {
        self.open.get(subject_id).map(|i| i.value().clone())
    }

    pub fn len(&self) -> usize {
        self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }
}

impl Default for IncidentTracker {
    fn default() -> Self {
        Self::new()
    }
}
