//! Cooling Agent - reinforcement-learning control for a simulated
//! data-center cooling environment
//!
//! This binary wires the environment simulator, the double-DQN agent and
//! the control loop together, exposes health/metrics/status over HTTP, and
//! checkpoints the run on shutdown.

use anyhow::Result;
use cooling_lib::{
    checkpoint::{CheckpointConfig, CheckpointManager},
    control::{ControlLoop, LoopConfig},
    env::{Environment, EnvironmentConfig},
    health::{components, HealthRegistry},
    learner::{DqnAgent, ModelConfig, ReplayConfig, RewardWeights, TrainingConfig},
    observability::{AgentMetrics, StructuredLogger},
    transport::{OutboundMessage, StatusPublisher},
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting cooling-agent");

    // Load configuration
    let config = config::AgentConfig::load()?;
    info!(agent_id = %config.agent_id, "Agent configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::ENVIRONMENT).await;
    health_registry.register(components::AGENT).await;
    health_registry.register(components::TRAINER).await;
    health_registry.register(components::CHECKPOINT).await;

    // Initialize metrics and the structured logger
    let metrics = AgentMetrics::new();
    let logger = StructuredLogger::new(&config.agent_id);
    logger.log_startup(AGENT_VERSION);

    // Build the explicit object graph: environment, agent, control loop
    let environment = Environment::new(EnvironmentConfig::default());
    let model_config = ModelConfig::default();
    let mut agent = DqnAgent::new(
        environment.layout(),
        TrainingConfig::default(),
        model_config.clone(),
        ReplayConfig::default(),
        RewardWeights::default(),
    );

    let checkpoint_config = CheckpointConfig {
        dir: PathBuf::from(&config.checkpoint_dir),
        ..Default::default()
    };

    if config.resume {
        let manager = CheckpointManager::new(checkpoint_config.clone())?;
        if let Some(snapshot) = manager.load_latest()? {
            agent
                .restore(
                    &snapshot.parameters,
                    snapshot.normalizer,
                    snapshot.metadata.timestep,
                    snapshot.metadata.epsilon,
                )
                .await?;
            info!(
                timestep = snapshot.metadata.timestep,
                "Resumed from checkpoint"
            );
        }
    }

    let (publisher, mut outbound_rx) = StatusPublisher::channel(256);
    let (_signal_tx, signal_rx) = mpsc::channel(32);

    let loop_config = LoopConfig {
        action_interval: Duration::from_millis(config.action_interval_ms),
        metrics_interval: Duration::from_secs(config.metrics_interval_secs),
        external_interval: Duration::from_secs(config.external_interval_secs),
        ..Default::default()
    };

    let (control_loop, _loop_handle) = ControlLoop::new(
        environment,
        agent,
        model_config,
        loop_config,
        checkpoint_config,
        publisher,
        signal_rx,
        health_registry.clone(),
        metrics.clone(),
        logger.clone(),
    )?;

    // Forward outbound messages: status snapshots feed the HTTP surface,
    // condition requests go to whatever transport adapter is attached
    let (status_tx, status_rx) = watch::channel(None);
    tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            match message {
                OutboundMessage::Status(update) => {
                    let _ = status_tx.send(Some(update));
                }
                OutboundMessage::ConditionsRequest { city } => {
                    debug!(city = %city, "Conditions requested, no feed attached");
                }
            }
        }
    });

    // Create shared application state
    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics.clone(),
        status_rx,
    ));

    // Mark agent as ready after initialization
    health_registry.set_ready(true).await;

    // Start health and metrics server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Run the control loop until SIGINT
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_task = tokio::spawn(control_loop.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    // The loop writes a final checkpoint and flushes the training log
    let _ = shutdown_tx.send(());
    let _ = loop_task.await;
    info!("Shutting down");

    Ok(())
}
