//! Stakeholder status log
//!
//! Completed actions become RESOLVED status updates, anything else becomes
//! MITIGATING. Records are append-only, kept in memory and optionally
//! mirrored to a JSON-lines file.

use crate::counters::{Counter, Counters};
use crate::models::{unix_now, ActionStatus, IncidentStatus, ResponseAction, StatusUpdate};
use crate::persistence::append_json_line;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// In-memory records kept for `recent`
pub const DEFAULT_HISTORY: usize = 1000;

pub struct Notifier {
    log: RwLock<VecDeque<StatusUpdate>>,
    history: usize,
    log_path: Option<PathBuf>,
    counters: Arc<Counters>,
}

impl Notifier {
    pub fn new(counters: Arc<Counters>) -> Self {
        Self {
            log: RwLock::new(VecDeque::new()),
            history: DEFAULT_HISTORY,
            log_path: None,
            counters,
        }
    }

    pub fn with_log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    pub fn with_history(mut self, history: usize) -> Self {
        self.history = history.max(1);
        self
    }

    /// Turn an action into a status update and append it to the log
    pub fn publish(&self, action: &ResponseAction) -> StatusUpdate {
        let update = status_for(action);

        if let Some(path) = &self.log_path {
            if let Err(e) = append_json_line(path, &update) {
                warn!(error = %format!("{:#}", e), "Failed to append status update to file");
            }
        }

        {
            let mut log = self.log.write().unwrap_or_else(|p| p.into_inner());
            log.push_back(update.clone());
            while log.len() > self.history {
                log.pop_front();
            }
        }

        self.counters.increment(Counter::NotificationsSent);
        info!(
            incident_id = %update.incident_id,
            status = %update.status,
            title = %update.title,
            "Status update published"
        );

        update
    }

    /// Most recent updates, newest first
    pub fn recent(&self, limit: usize) -> Vec<StatusUpdate> {
        let log = self.log.read().unwrap_or_else(|p| p.into_inner());
        log.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.log.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Status record for an action
pub fn status_for(action: &ResponseAction) -> StatusUpdate {
    let status = match action.status {
        ActionStatus::Completed => IncidentStatus::Resolved,
        ActionStatus::Initiated | ActionStatus::Failed => IncidentStatus::Mitigating,
    };

    StatusUpdate {
        incident_id: action.action_id.clone(),
        status,
        title: format!("{} - {}", action.action_type, action.reason),
        description: format!(
            "Automated {} executed on {} subjects",
            action.action_type,
            action.target_subjects.len()
        ),
        affected_subjects: action.target_subjects.clone(),
        timestamp: unix_now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ActionType;

    fn action(status: ActionStatus) -> ResponseAction {
        ResponseAction {
            action_id: "ACTION-42".to_string(),
            action_type: ActionType::Rollback,
            target_subjects: vec!["server-1".to_string(), "server-2".to_string()],
            reason: "error spike".to_string(),
            status,
            timestamp: 0,
            oracle_request_id: None,
        }
    }

    #[test]
    fn test_completed_action_is_resolved() {
        let counters = Arc::new(Counters::new());
        let notifier = Notifier::new(counters.clone());

        let update = notifier.publish(&action(ActionStatus::Completed));

        assert_eq!(update.incident_id, "ACTION-42");
        assert_eq!(update.status, IncidentStatus::Resolved);
        assert_eq!(update.title, "ROLLBACK - error spike");
        assert_eq!(update.description, "Automated ROLLBACK executed on 2 subjects");
        assert_eq!(update.affected_subjects.len(), 2);
        assert_eq!(counters.get(Counter::NotificationsSent), 1);
    }

    #[test]
    fn test_failed_action_is_mitigating() {
        let notifier = Notifier::new(Arc::new(Counters::new()));
        assert_eq!(
            notifier.publish(&action(ActionStatus::Failed)).status,
            IncidentStatus::Mitigating
        );
        assert_eq!(
            notifier.publish(&action(ActionStatus::Initiated)).status,
            IncidentStatus::Mitigating
        );
    }

    #[test]
    fn test_recent_is_newest_first_and_bounded() {
        let notifier = Notifier::new(Arc::new(Counters::new())).with_history(3);
        for i in 0..5 {
            let mut a = action(ActionStatus::Completed);
            a.action_id = format!("ACTION-{}", i);
            notifier.publish(&a);
        }

        assert_eq!(notifier.len(), 3);
        let ids: Vec<String> = notifier.recent(2).into_iter().map(|u| u.incident_id).collect();
        assert_eq!(ids, vec!["ACTION-4", "ACTION-3"]);
    }

    #[test]
    fn test_log_file_is_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.jsonl");
        let notifier = Notifier::new(Arc::new(Counters::new())).with_log_file(&path);

        notifier.publish(&action(ActionStatus::Completed));
        notifier.publish(&action(ActionStatus::Failed));

        let content = std::fs::read_to_string(&path).unwrap();
        let records: Vec<StatusUpdate> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].status, IncidentStatus::Mitigating);
    }
}
