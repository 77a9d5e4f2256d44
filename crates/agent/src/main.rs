//! FleetGuard agent
//!
//! Runs one worker role, or all four in a single process, behind the
//! agent HTTP API.

use anyhow::{Context, Result};
use fleetguard_lib::{
    anomaly::{BaselineTracker, DetectionConfig, DetectionLoop},
    canary::{CanaryConfig, CanaryTester},
    decision::{DecisionEngine, HttpOracle},
    health::{components, HealthRegistry},
    infrastructure::InfrastructureClient,
    notifier::Notifier,
    observability::{AgentMetrics, StructuredLogger},
    runbook::{InfrastructureSteps, RunbookExecutor, SimulatedSteps, StepRunner},
    transport::{ChannelDelivery, Delivery, HttpDelivery, Transport},
    workers::{
        CanaryWorker, DetectorWorker, NotifierWorker, ResponderWorker, WorkerContext, WorkerRole,
    },
    AgentDirectory, AgentStatus, Counters,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

use config::{AgentConfig, RunbookMode};

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");
const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fleetguard-agent");

    // Load configuration; a missing or unknown role is fatal
    let config = AgentConfig::load()?;
    let roles = config.roles()?;
    let port = config.api_port()?;
    info!(role = %config.role, port = port, "Agent configured");

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry
        .register_all(&[components::DIRECTORY, components::TRANSPORT])
        .await;
    for role in &roles {
        health_registry.register_all(role.components()).await;
    }

    let metrics = AgentMetrics::new();

    let directory = Arc::new(AgentDirectory::with_persistence(config.registry_path()));
    let inboxes = Arc::new(ChannelDelivery::new());
    let delivery: Arc<dyn Delivery> = if config.runs_all() {
        inboxes.clone()
    } else {
        Arc::new(HttpDelivery::new())
    };
    let transport =
        Transport::new(directory.clone(), delivery).with_timeout(config.delivery_timeout());

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut app_state = api::AppState::new(health_registry.clone(), metrics.clone(), inboxes.clone());
    let mut workers: Vec<JoinHandle<()>> = Vec::new();
    let mut names = Vec::new();

    for role in &roles {
        let name = role.agent_name();
        names.push(name);

        directory.register(name, &config.address, port, role.capabilities().iter().copied());

        let counters = Arc::new(Counters::with_persistence(config.counters_path(name)));
        app_state.counters.push((name.to_string(), counters.clone()));

        let ctx = WorkerContext::new(name, transport.clone(), counters.clone(), health_registry.clone());
        ctx.logger.log_startup(AGENT_VERSION, &config.address, port);

        let inbox = inboxes.mailbox(name);
        let shutdown = shutdown_tx.subscribe();

        let handle = match role {
            WorkerRole::Canary => {
                let tester = Arc::new(CanaryTester::new(CanaryConfig {
                    sample_fraction: config.canary_sample_fraction,
                    window_units: config.canary_window_units,
                    unit_interval: config.canary_unit_interval(),
                    seed: config.canary_seed,
                    ..CanaryConfig::default()
                }));
                app_state.canary = Some(tester.clone());
                tokio::spawn(CanaryWorker::new(ctx, tester).run(inbox, shutdown))
            }
            WorkerRole::Detector => {
                let source = InfrastructureClient::with_timeout(
                    &config.infrastructure_url,
                    Duration::from_secs(5),
                )?;
                let detection_config = DetectionConfig {
                    interval: config.detection_interval(),
                    max_subjects: config.max_subjects,
                    ..DetectionConfig::default()
                };
                let (detection, alerts) = DetectionLoop::new(
                    Arc::new(source),
                    Arc::new(BaselineTracker::new()),
                    detection_config,
                );
                tokio::spawn(DetectorWorker::new(ctx, detection, alerts).run(inbox, shutdown))
            }
            WorkerRole::Responder => {
                let engine = build_engine(&config)?;
                let executor = RunbookExecutor::new(build_runner(&config)?);
                tokio::spawn(ResponderWorker::new(ctx, engine, executor).run(inbox, shutdown))
            }
            WorkerRole::Notifier => {
                let notifier = Arc::new(
                    Notifier::new(counters).with_log_file(config.status_log_path()),
                );
                app_state.notifier = Some(notifier.clone());
                tokio::spawn(NotifierWorker::new(ctx, notifier).run(inbox, shutdown))
            }
        };
        workers.push(handle);
    }

    metrics.set_registered_agents(directory.len() as i64);

    if let Some(secs) = config.directory_resync_secs {
        tokio::spawn(resync_directory(
            directory.clone(),
            Duration::from_secs(secs.max(1)),
            health_registry.clone(),
            shutdown_tx.subscribe(),
        ));
    }

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    // Start the agent API
    let api_handle = tokio::spawn(api::serve(port, Arc::new(app_state)));

    // Wait for shutdown signal or API failure
    let logger = StructuredLogger::new(config.role.clone());
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        served = api_handle => {
            match served {
                Ok(Ok(())) => logger.log_shutdown("API server stopped"),
                Ok(Err(e)) => error!(error = %format!("{:#}", e), "API server failed"),
                Err(e) => error!(error = %e, "API server task panicked"),
            }
        }
    }

    health_registry.set_ready(false).await;
    let _ = shutdown_tx.send(());

    for name in names {
        if let Err(e) = directory.set_status(name, AgentStatus::Offline) {
            warn!(agent = %name, error = %e, "Failed to mark agent offline");
        }
    }

    for handle in workers {
        if tokio::time::timeout(WORKER_DRAIN_TIMEOUT, handle).await.is_err() {
            warn!("Worker did not stop in time");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn build_engine(config: &AgentConfig) -> Result<DecisionEngine> {
    let Some(endpoint) = &config.oracle_endpoint else {
        info!("No decision oracle configured, using rule table");
        return Ok(DecisionEngine::rules_only());
    };

    let mut oracle = HttpOracle::new(endpoint, config.oracle_timeout())
        .with_context(|| format!("Invalid oracle endpoint {}", endpoint))?;
    if let Some(key) = &config.oracle_api_key {
        oracle = oracle.with_api_key(key.clone());
    }

    info!(endpoint = %endpoint, "Decision oracle configured");
    Ok(DecisionEngine::with_oracle(Arc::new(oracle))
        .confidence_threshold(config.confidence_threshold)
        .oracle_timeout(config.oracle_timeout()))
}

fn build_runner(config: &AgentConfig) -> Result<Arc<dyn StepRunner>> {
    Ok(match config.runbook_mode()? {
        RunbookMode::Simulated => Arc::new(SimulatedSteps::new(config.step_delay())),
        RunbookMode::Infrastructure => {
            let client = InfrastructureClient::new(&config.infrastructure_url)?;
            Arc::new(InfrastructureSteps::new(client, config.step_delay()))
        }
    })
}

/// Periodically pick up peers registered by other processes
async fn resync_directory(
    directory: Arc<AgentDirectory>,
    every: Duration,
    health: HealthRegistry,
    mut shutdown: broadcast::Receiver<()>,
) {
    let metrics = AgentMetrics::new();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(every) => {
                let result = directory.reload();
                health.observe(components::DIRECTORY, &result).await;
                match result {
                    Ok(added) if added > 0 => info!(added = added, "Directory resynced"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %format!("{:#}", e), "Directory resync failed"),
                }
                metrics.set_registered_agents(directory.len() as i64);
            }
            _ = shutdown.recv() => break,
        }
    }
}
