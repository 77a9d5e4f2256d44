//! FleetGuard operator CLI
//!
//! Inspects the agent directory, injects updates for canary testing and
//! reads an agent's status log, counters and health.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{agents, canary, ops};
use std::path::PathBuf;

/// FleetGuard operator CLI
#[derive(Parser)]
#[command(name = "fgctl")]
#[command(author, version, about = "CLI for FleetGuard agents", long_about = None)]
pub struct Cli {
    /// Agent API URL (can also be set via FGCTL_AGENT_URL env var)
    #[arg(long, env = "FGCTL_AGENT_URL", default_value = "http://localhost:8001")]
    pub agent_url: String,

    /// Path to the shared agent registry file
    #[arg(long, env = "FGCTL_REGISTRY", default_value = "data/agent_registry.json")]
    pub registry: PathBuf,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered agents
    Agents {
        /// Only agents advertising this capability
        #[arg(long, short)]
        capability: Option<String>,
    },

    /// Submit an update package for canary testing
    Inject {
        /// Update identifier (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Update version
        #[arg(long, default_value = "1.0.0")]
        version: String,

        /// Update description
        #[arg(long, default_value = "")]
        description: String,

        /// Target subject; repeat for several
        #[arg(long = "target", short)]
        targets: Vec<String>,

        /// Generate targets server-1..server-N
        #[arg(long)]
        fleet_size: Option<usize>,
    },

    /// Abort a running canary test
    Withdraw {
        /// Update identifier
        update_id: String,
    },

    /// Show recent status updates from the notifier
    Status {
        /// Maximum number of updates
        #[arg(long, short, default_value = "20")]
        limit: usize,
    },

    /// Show work counters
    Counters,

    /// Show component health
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Directory listing reads the registry file directly
    if let Commands::Agents { capability } = &cli.command {
        return agents::list_agents(&cli.registry, capability.clone(), cli.format);
    }

    // Initialize client
    let client = client::ApiClient::new(&cli.agent_url)?;

    // Execute command
    match cli.command {
        Commands::Agents { .. } => {}
        Commands::Inject {
            id,
            version,
            description,
            targets,
            fleet_size,
        } => {
            let args = canary::InjectArgs {
                update_id: id,
                version,
                description,
                targets,
                fleet_size,
            };
            canary::inject(&client, args, cli.format).await?;
        }
        Commands::Withdraw { update_id } => {
            canary::withdraw(&client, &update_id, cli.format).await?;
        }
        Commands::Status { limit } => {
            ops::show_status(&client, limit, cli.format).await?;
        }
        Commands::Counters => {
            ops::show_counters(&client, cli.format).await?;
        }
        Commands::Health => {
            ops::show_health(&client, cli.format).await?;
        }
    }

    Ok(())
}
