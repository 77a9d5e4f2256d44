//! Directory listing

use anyhow::{bail, Result};
use fleetguard_lib::{AgentDirectory, AgentRecord, AgentStatus};
use serde::Serialize;
use std::path::Path;
use tabled::Tabled;

use crate::output::{color_status, print_info, print_table, OutputFormat};

/// Row for agents table
#[derive(Debug, Tabled, Serialize)]
pub struct AgentRow {
    #[tabled(rename = "Name")]
    pub name: String,
    #[tabled(rename = "Endpoint")]
    pub endpoint: String,
    #[tabled(rename = "Status")]
    pub status: String,
    #[tabled(rename = "Capabilities")]
    pub capabilities: String,
}

impl AgentRow {
    fn from_record(record: &AgentRecord, colored: bool) -> Self {
        let status = match record.status {
            AgentStatus::Online => "online",
            AgentStatus::Offline => "offline",
        };
        Self {
            name: record.name.clone(),
            endpoint: record.http_base(),
            status: if colored {
                color_status(status)
            } else {
                status.to_string()
            },
            capabilities: record
                .capabilities
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", "),
        }
    }
}

/// Rows for every agent in the registry file, optionally filtered by
/// capability
pub fn load_rows(registry: &Path, capability: Option<&str>, colored: bool) -> Result<Vec<AgentRow>> {
    if !registry.exists() {
        bail!("No agent registry at {}", registry.display());
    }

    let directory = AgentDirectory::with_persistence(registry);
    let records = match capability {
        Some(tag) => directory.find_by_capability(tag),
        None => directory.list(),
    };

    Ok(records
        .iter()
        .map(|r| AgentRow::from_record(r, colored))
        .collect())
}

/// List the persisted agent directory
pub fn list_agents(registry: &Path, capability: Option<String>, format: OutputFormat) -> Result<()> {
    let colored = matches!(format, OutputFormat::Table);
    let rows = load_rows(registry, capability.as_deref(), colored)?;

    print_table(&rows, format);
    if colored && !rows.is_empty() {
        print_info(&format!("{} agents in {}", rows.len(), registry.display()));
    }
    Ok(())
}
