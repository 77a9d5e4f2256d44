//! Agent directory
//!
//! Maps agent names to connection info and capability tags. The map is
//! sharded per name so registration for one agent never blocks lookups of
//! another. The in-memory map is authoritative; the JSON file only seeds
//! it at startup and mirrors it for other processes and the CLI.

use crate::error::DirectoryError;
use crate::persistence::{read_json, write_json_atomic};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Advisory liveness of a registered agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Offline,
}

/// Connection info and capabilities of one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRecord {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub capabilities: BTreeSet<String>,
    pub status: AgentStatus,
}

impl AgentRecord {
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.contains(tag)
    }

    /// Base URL for HTTP delivery
    pub fn http_base(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// On-disk value; the name is the key of the enclosing object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct PersistedRecord {
    address: String,
    port: u16,
    capabilities: Vec<String>,
    status: AgentStatus,
}

impl PersistedRecord {
    fn from_record(record: &AgentRecord) -> Self {
        Self {
            address: record.address.clone(),
            port: record.port,
            capabilities: record.capabilities.iter().cloned().collect(),
            status: record.status,
        }
    }

    fn into_record(self, name: String) -> AgentRecord {
        AgentRecord {
            name,
            address: self.address,
            port: self.port,
            capabilities: self.capabilities.into_iter().collect(),
            status: self.status,
        }
    }
}

/// Name-keyed registry of agents
pub struct AgentDirectory {
    agents: DashMap<String, AgentRecord>,
    persistence_path: Option<PathBuf>,
}

impl AgentDirectory {
    /// In-memory directory with no backing file
    pub fn new() -> Self {
        Self {
            agents: DashMap::new(),
            persistence_path: None,
        }
    }

    /// Directory backed by `path`. Existing entries on disk are merged in;
    /// an unreadable file is logged and the directory starts empty.
    pub fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let directory = Self {
            agents: DashMap::new(),
            persistence_path: Some(path.into()),
        };

        if let Err(e) = directory.reload() {
            warn!(error = %e, "Failed to load persisted directory, starting empty");
        }

        directory
    }

    pub fn persistence_path(&self) -> Option<&Path> {
        self.persistence_path.as_deref()
    }

    /// Register or re-register an agent. Last writer wins.
    pub fn register<I, S>(&self, name: &str, address: &str, port: u16, capabilities: I) -> AgentRecord
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let record = AgentRecord {
            name: name.to_string(),
            address: address.to_string(),
            port,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            status: AgentStatus::Online,
        };

        let previous = self.agents.insert(name.to_string(), record.clone());
        match previous {
            Some(old) if old.address != record.address || old.port != record.port => {
                info!(
                    agent = %name,
                    old_address = %old.address,
                    old_port = old.port,
                    address = %record.address,
                    port = record.port,
                    "Agent re-registered at new address"
                );
            }
            Some(_) => debug!(agent = %name, "Agent re-registered"),
            None => info!(agent = %name, address = %address, port = port, "Agent registered"),
        }

        self.persist_or_log();
        record
    }

    pub fn lookup(&self, name: &str) -> Result<AgentRecord, DirectoryError> {
        self.agents
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| DirectoryError::NotFound {
                name: name.to_string(),
            })
    }

    /// All agents advertising `tag`, sorted by name
    pub fn find_by_capability(&self, tag: &str) -> Vec<AgentRecord> {
        let mut found: Vec<AgentRecord> = self
            .agents
            .iter()
            .filter(|r| r.value().has_capability(tag))
            .map(|r| r.value().clone())
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        found
    }

    pub fn set_status(&self, name: &str, status: AgentStatus) -> Result<(), DirectoryError> {
        {
            let mut entry = self
                .agents
                .get_mut(name)
                .ok_or_else(|| DirectoryError::NotFound {
                    name: name.to_string(),
                })?;
            entry.status = status;
        }
        debug!(agent = %name, status = ?status, "Agent status updated");
        self.persist_or_log();
        Ok(())
    }

    /// All agents sorted by name
    pub fn list(&self) -> Vec<AgentRecord> {
        let mut all: Vec<AgentRecord> = self.agents.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Remove every entry, in memory and in the backing file
    pub fn clear(&self) {
        self.agents.clear();
        info!("Directory cleared");
        if let Err(e) = self.persist_replace() {
            warn!(error = %e, "Failed to clear persisted directory, continuing in memory");
        }
    }

    /// Write the directory to its backing file. Entries that only exist on
    /// disk (registered by other processes) are preserved.
    pub fn persist(&self) -> Result<(), DirectoryError> {
        let Some(path) = self.persistence_path.as_ref() else {
            return Ok(());
        };

        let document: BTreeMap<String, PersistedRecord> = read_json(path)
            .unwrap_or_else(|e| {
                warn!(error = %e, "Ignoring unreadable directory file while persisting");
                None
            })
            .unwrap_or_default();

        self.write_document(path, document)
    }

    /// Overwrite the backing file with the in-memory entries only
    pub fn persist_replace(&self) -> Result<(), DirectoryError> {
        match self.persistence_path.as_ref() {
            Some(path) => self.write_document(path, BTreeMap::new()),
            None => Ok(()),
        }
    }

    fn write_document(
        &self,
        path: &Path,
        mut document: BTreeMap<String, PersistedRecord>,
    ) -> Result<(), DirectoryError> {
        for entry in self.agents.iter() {
            document.insert(entry.key().clone(), PersistedRecord::from_record(entry.value()));
        }

        write_json_atomic(path, &document).map_err(|e| DirectoryError::PersistFailed {
            path: path.display().to_string(),
            reason: format!("{:#}", e),
        })?;
        debug!(path = %path.display(), agents = document.len(), "Directory persisted");
        Ok(())
    }

    /// Merge entries from the backing file. Memory wins on conflicts.
    /// Returns the number of entries added.
    pub fn reload(&self) -> anyhow::Result<usize> {
        let Some(path) = self.persistence_path.as_ref() else {
            return Ok(0);
        };

        let document: BTreeMap<String, PersistedRecord> = match read_json(path)? {
            Some(document) => document,
            None => return Ok(0),
        };

        let mut added = 0;
        for (name, persisted) in document {
            if !self.agents.contains_key(&name) {
                self.agents
                    .insert(name.clone(), persisted.into_record(name));
                added += 1;
            }
        }

        info!(path = %path.display(), added = added, total = self.agents.len(), "Directory reloaded");
        Ok(added)
    }

    fn persist_or_log(&self) {
        if let Err(e) = self.persist() {
            warn!(error = %e, "Directory persistence failed, continuing in memory");
        }
    }
}

impl Default for AgentDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let directory = AgentDirectory::new();
        directory.register("canary_agent", "127.0.0.1", 8001, ["canary_testing"]);

        let record = directory.lookup("canary_agent").unwrap();
        assert_eq!(record.address, "127.0.0.1");
        assert_eq!(record.port, 8001);
        assert_eq!(record.status, AgentStatus::Online);
        assert!(record.has_capability("canary_testing"));
    }

    #[test]
    fn test_lookup_missing() {
        let directory = AgentDirectory::new();
        assert_eq!(
            directory.lookup("ghost"),
            Err(DirectoryError::NotFound {
                name: "ghost".to_string()
            })
        );
    }

    #[test]
    fn test_reregistration_overwrites_without_duplicates() {
        let directory = AgentDirectory::new();
        directory.register("response_agent", "127.0.0.1", 8003, ["incident_response"]);
        directory.register("notifier", "127.0.0.1", 8004, ["status_page"]);
        assert_eq!(directory.len(), 2);

        directory.register("response_agent", "10.0.0.7", 9003, ["incident_response"]);

        assert_eq!(directory.len(), 2);
        let record = directory.lookup("response_agent").unwrap();
        assert_eq!(record.address, "10.0.0.7");
        assert_eq!(record.port, 9003);
    }

    #[test]
    fn test_find_by_capability() {
        let directory = AgentDirectory::new();
        directory.register("b_monitor", "127.0.0.1", 1, ["monitoring", "anomaly_detection"]);
        directory.register("a_monitor", "127.0.0.1", 2, ["monitoring"]);
        directory.register("canary_agent", "127.0.0.1", 3, ["canary_testing"]);

        let names: Vec<String> = directory
            .find_by_capability("monitoring")
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["a_monitor", "b_monitor"]);
        assert!(directory.find_by_capability("billing").is_empty());
    }

    #[test]
    fn test_persist_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_registry.json");

        let directory = AgentDirectory::with_persistence(&path);
        directory.register("canary_agent", "127.0.0.1", 8001, ["canary_testing", "deployment_validation"]);
        directory.register("response_agent", "127.0.0.1", 8003, ["incident_response"]);
        directory.set_status("response_agent", AgentStatus::Offline).unwrap();

        let reloaded = AgentDirectory::with_persistence(&path);
        assert_eq!(reloaded.list(), directory.list());
    }

    #[test]
    fn test_persisted_format_is_keyed_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_registry.json");

        let directory = AgentDirectory::with_persistence(&path);
        directory.register("canary_agent", "127.0.0.1", 8001, ["canary_testing"]);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["canary_agent"]["address"], "127.0.0.1");
        assert_eq!(raw["canary_agent"]["port"], 8001);
        assert_eq!(raw["canary_agent"]["capabilities"][0], "canary_testing");
        assert_eq!(raw["canary_agent"]["status"], "online");
    }

    #[test]
    fn test_reload_keeps_memory_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_registry.json");

        let other_process = AgentDirectory::with_persistence(&path);
        other_process.register("canary_agent", "10.0.0.1", 8001, ["canary_testing"]);
        other_process.register("monitoring_agent", "10.0.0.2", 8002, ["monitoring"]);

        let local = AgentDirectory::new_for_path_without_load(&path);
        local.agents.insert(
            "canary_agent".to_string(),
            AgentRecord {
                name: "canary_agent".to_string(),
                address: "127.0.0.1".to_string(),
                port: 9001,
                capabilities: BTreeSet::new(),
                status: AgentStatus::Online,
            },
        );

        let added = local.reload().unwrap();
        assert_eq!(added, 1);
        assert_eq!(local.lookup("canary_agent").unwrap().port, 9001);
        assert_eq!(local.lookup("monitoring_agent").unwrap().address, "10.0.0.2");
    }

    #[test]
    fn test_persist_preserves_entries_from_other_processes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_registry.json");

        let first = AgentDirectory::with_persistence(&path);
        let second = AgentDirectory::with_persistence(&path);
        first.register("canary_agent", "127.0.0.1", 8001, ["canary_testing"]);
        second.register("response_agent", "127.0.0.1", 8003, ["incident_response"]);

        let merged = AgentDirectory::with_persistence(&path);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_persist_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail
        let path = dir.path().join("blocked");
        std::fs::create_dir_all(path.join("child")).unwrap();

        let directory = AgentDirectory::new_for_path_without_load(&path);
        directory.register("canary_agent", "127.0.0.1", 8001, ["canary_testing"]);

        assert!(directory.lookup("canary_agent").is_ok());
        assert!(matches!(
            directory.persist(),
            Err(DirectoryError::PersistFailed { .. })
        ));
    }

    #[test]
    fn test_clear() {
        let directory = AgentDirectory::new();
        directory.register("canary_agent", "127.0.0.1", 8001, ["canary_testing"]);
        directory.clear();
        assert!(directory.is_empty());
    }

    #[test]
    fn test_clear_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_registry.json");

        let directory = AgentDirectory::with_persistence(&path);
        directory.register("canary_agent", "127.0.0.1", 8001, ["canary_testing"]);
        directory.register("response_agent", "127.0.0.1", 8003, ["incident_response"]);
        directory.clear();

        let restarted = AgentDirectory::with_persistence(&path);
        assert_eq!(restarted.len(), 0);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({}));
    }

    impl AgentDirectory {
        fn new_for_path_without_load(path: &Path) -> Self {
            Self {
                agents: DashMap::new(),
                persistence_path: Some(path.to_path_buf()),
            }
        }
    }
}
