//! Agent configuration

use anyhow::{bail, Context, Result};
use fleetguard_lib::WorkerRole;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Agent configuration
///
/// Read from `FLEETGUARD_*` environment variables, layered over the file
/// named by `FLEETGUARD_CONFIG` when set. Only `role` is required.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Worker role to run, or `all` for every role in one process
    pub role: String,

    /// Address peers use to reach this agent
    #[serde(default = "default_address")]
    pub address: String,

    /// API port; defaults to the role's well-known port
    #[serde(default)]
    pub port: Option<u16>,

    /// Directory registry, counters and status log live here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Managed infrastructure API
    #[serde(default = "default_infrastructure_url")]
    pub infrastructure_url: String,

    /// Decision oracle endpoint; rules only when unset
    #[serde(default)]
    pub oracle_endpoint: Option<String>,

    #[serde(default)]
    pub oracle_api_key: Option<String>,

    #[serde(default = "default_oracle_timeout")]
    pub oracle_timeout_secs: u64,

    /// Minimum oracle confidence, clamped to 0.7..=0.8
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    #[serde(default = "default_detection_interval")]
    pub detection_interval_secs: u64,

    #[serde(default = "default_max_subjects")]
    pub max_subjects: usize,

    #[serde(default = "default_sample_fraction")]
    pub canary_sample_fraction: f64,

    #[serde(default = "default_window_units")]
    pub canary_window_units: u32,

    #[serde(default = "default_unit_interval")]
    pub canary_unit_interval_ms: u64,

    #[serde(default)]
    pub canary_seed: Option<u64>,

    /// `simulated` or `infrastructure`
    #[serde(default = "default_runbook_mode")]
    pub runbook_mode: String,

    #[serde(default = "default_step_delay")]
    pub step_delay_ms: u64,

    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Reload the shared directory file this often; never when unset
    #[serde(default)]
    pub directory_resync_secs: Option<u64>,
}

fn default_address() -> String {
    "localhost".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_infrastructure_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_oracle_timeout() -> u64 {
    10
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_detection_interval() -> u64 {
    5
}

fn default_max_subjects() -> usize {
    10
}

fn default_sample_fraction() -> f64 {
    0.01
}

fn default_window_units() -> u32 {
    30
}

fn default_unit_interval() -> u64 {
    1000
}

fn default_runbook_mode() -> String {
    "simulated".to_string()
}

fn default_step_delay() -> u64 {
    500
}

fn default_delivery_timeout() -> u64 {
    5
}

/// How runbook steps are carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunbookMode {
    Simulated,
    Infrastructure,
}

impl AgentConfig {
    /// Load configuration from environment and optional config file
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load with an explicit environment map in place of the process
    /// environment
    pub fn load_from(env: Option<HashMap<String, String>>) -> Result<Self> {
        let file = match &env {
            Some(vars) => vars.get("FLEETGUARD_CONFIG").cloned(),
            None => std::env::var("FLEETGUARD_CONFIG").ok(),
        };

        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::with_name(&path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("FLEETGUARD")
                .try_parsing(true)
                .source(env),
        );

        let config: AgentConfig = builder
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration (is FLEETGUARD_ROLE set?)")?;

        config.roles()?;
        config.runbook_mode()?;
        Ok(config)
    }

    /// Roles this process runs
    pub fn roles(&self) -> Result<Vec<WorkerRole>> {
        if self.role.trim().eq_ignore_ascii_case("all") {
            return Ok(WorkerRole::ALL.to_vec());
        }
        match self.role.parse::<WorkerRole>() {
            Ok(role) => Ok(vec![role]),
            Err(e) => bail!("{} (expected canary, detector, responder, notifier or all)", e),
        }
    }

    pub fn runs_all(&self) -> bool {
        self.role.trim().eq_ignore_ascii_case("all")
    }

    /// Port the API listens on
    pub fn api_port(&self) -> Result<u16> {
        if let Some(port) = self.port {
            return Ok(port);
        }
        let roles = self.roles()?;
        Ok(roles.first().map(|r| r.default_port()).unwrap_or(8000))
    }

    pub fn runbook_mode(&self) -> Result<RunbookMode> {
        match self.runbook_mode.trim().to_ascii_lowercase().as_str() {
            "simulated" => Ok(RunbookMode::Simulated),
            "infrastructure" => Ok(RunbookMode::Infrastructure),
            other => bail!("unknown runbook mode '{}'", other),
        }
    }

    pub fn registry_path(&self) -> PathBuf {
        self.data_dir.join("agent_registry.json")
    }

    pub fn counters_path(&self, agent_name: &str) -> PathBuf {
        self.data_dir.join(format!("{}_counters.json", agent_name))
    }

    pub fn status_log_path(&self) -> PathBuf {
        self.data_dir.join("status_updates.jsonl")
    }

    pub fn detection_interval(&self) -> Duration {
        Duration::from_secs(self.detection_interval_secs.max(1))
    }

    pub fn canary_unit_interval(&self) -> Duration {
        Duration::from_millis(self.canary_unit_interval_ms)
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn delivery_timeout(&self) -> Duration {
        Duration::from_secs(self.delivery_timeout_secs.max(1))
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_role_is_required() {
        assert!(AgentConfig::load_from(env(&[])).is_err());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        assert!(AgentConfig::load_from(env(&[("FLEETGUARD_ROLE", "janitor")])).is_err());
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::load_from(env(&[("FLEETGUARD_ROLE", "responder")])).unwrap();

        assert_eq!(config.roles().unwrap(), vec![WorkerRole::Responder]);
        assert_eq!(config.api_port().unwrap(), 8003);
        assert_eq!(config.address, "localhost");
        assert_eq!(config.infrastructure_url, "http://localhost:8000");
        assert!(config.oracle_endpoint.is_none());
        assert_eq!(config.canary_window_units, 30);
        assert_eq!(config.runbook_mode().unwrap(), RunbookMode::Simulated);
        assert_eq!(config.registry_path(), PathBuf::from("data/agent_registry.json"));
    }

    #[test]
    fn test_overrides() {
        let config = AgentConfig::load_from(env(&[
            ("FLEETGUARD_ROLE", "all"),
            ("FLEETGUARD_PORT", "9100"),
            ("FLEETGUARD_CANARY_SEED", "42"),
            ("FLEETGUARD_ORACLE_ENDPOINT", "http://oracle:11434/decide"),
        ]))
        .unwrap();

        assert!(config.runs_all());
        assert_eq!(config.roles().unwrap().len(), 4);
        assert_eq!(config.api_port().unwrap(), 9100);
        assert_eq!(config.canary_seed, Some(42));
        assert_eq!(
            config.oracle_endpoint.as_deref(),
            Some("http://oracle:11434/decide")
        );
    }
}
