//! Training/control loop
//!
//! Drives the simulation on fixed cadences: an action tick (act, observe,
//! store, train), a slower passive metrics tick, and a polling tick for the
//! external conditions feed. The loop can be paused and resumed; in-flight
//! work completes rather than being aborted, and no single tick's failure
//! terminates the loop.

use crate::checkpoint::{
    AgentSnapshot, CheckpointConfig, CheckpointManager, CheckpointMetadata,
};
use crate::env::Environment;
use crate::health::{components, HealthRegistry};
use crate::learner::{DqnAgent, ModelConfig};
use crate::models::{Action, TrainingLogEntry};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::transport::{InboundSignal, StatusPublisher};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, Instant};
use tracing::{debug, error, info, warn};

/// Control loop configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Cadence of the act-observe-train cycle
    pub action_interval: Duration,
    /// Cadence of the passive environment tick
    pub metrics_interval: Duration,
    /// Cadence of outside-conditions polling
    pub external_interval: Duration,
    /// City passed to the weather feed
    pub weather_city: String,
    /// Failure risk above which a transition is marked terminal
    pub done_risk_threshold: f64,
    /// Where the per-step training log is flushed on shutdown
    pub training_log_path: Option<PathBuf>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            action_interval: Duration::from_secs(1),
            metrics_interval: Duration::from_secs(60),
            external_interval: Duration::from_secs(30),
            weather_city: "Brussels".to_string(),
            done_risk_threshold: 0.8,
            training_log_path: Some(PathBuf::from("./training_log.json")),
        }
    }
}

/// Commands accepted while the loop is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopCommand {
    /// Stop scheduling action ticks; in-flight work completes
    Pause,
    /// Resume scheduling action ticks
    Resume,
}

/// Handle for pausing and resuming a running loop
#[derive(Clone)]
pub struct LoopHandle {
    tx: mpsc::Sender<LoopCommand>,
}

impl LoopHandle {
    pub async fn pause(&self) {
        let _ = self.tx.send(LoopCommand::Pause).await;
    }

    pub async fn resume(&self) {
        let _ = self.tx.send(LoopCommand::Resume).await;
    }
}

/// The agent's act-observe-train state machine on a timer
pub struct ControlLoop {
    env: Environment,
    agent: DqnAgent,
    model_config: ModelConfig,
    config: LoopConfig,
    checkpoints: CheckpointManager,
    publisher: StatusPublisher,
    signals: mpsc::Receiver<InboundSignal>,
    signals_closed: bool,
    commands: mpsc::Receiver<LoopCommand>,
    commands_closed: bool,
    health: HealthRegistry,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    running: bool,
    training_log: Vec<TrainingLogEntry>,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        env: Environment,
        agent: DqnAgent,
        model_config: ModelConfig,
        config: LoopConfig,
        checkpoint_config: CheckpointConfig,
        publisher: StatusPublisher,
        signals: mpsc::Receiver<InboundSignal>,
        health: HealthRegistry,
        metrics: AgentMetrics,
        logger: StructuredLogger,
    ) -> Result<(Self, LoopHandle)> {
        let checkpoints = CheckpointManager::new(checkpoint_config)?;
        let (tx, commands) = mpsc::channel(8);

        let control_loop = Self {
            env,
            agent,
            model_config,
            config,
            checkpoints,
            publisher,
            signals,
            signals_closed: false,
            commands,
            commands_closed: false,
            health,
            metrics,
            logger,
            running: true,
            training_log: Vec::new(),
        };

        Ok((control_loop, LoopHandle { tx }))
    }

    /// Run until the shutdown signal fires, then write a final checkpoint
    /// and flush the training log
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            action_interval_ms = self.config.action_interval.as_millis() as u64,
            metrics_interval_ms = self.config.metrics_interval.as_millis() as u64,
            "Starting control loop"
        );

        let mut action_ticker = interval(self.config.action_interval);
        let mut metrics_ticker = interval(self.config.metrics_interval);
        let mut external_ticker = interval(self.config.external_interval);

        loop {
            tokio::select! {
                _ = action_ticker.tick() => {
                    if self.running {
                        self.step().await;
                    }
                }
                _ = metrics_ticker.tick() => {
                    self.passive_tick();
                }
                _ = external_ticker.tick() => {
                    self.publisher.request_conditions(&self.config.weather_city);
                }
                command = self.commands.recv(), if !self.commands_closed => {
                    match command {
                        Some(LoopCommand::Pause) => {
                            if self.running {
                                info!("Control loop paused");
                                self.running = false;
                            }
                        }
                        Some(LoopCommand::Resume) => {
                            if !self.running {
                                info!("Control loop resumed");
                                self.running = true;
                            }
                        }
                        None => self.commands_closed = true,
                    }
                }
                signal = self.signals.recv(), if !self.signals_closed => {
                    match signal {
                        Some(signal) => self.apply_signal(signal),
                        None => self.signals_closed = true,
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }

        self.save_checkpoint().await;
        if let Err(e) = self.flush_training_log() {
            warn!(error = %e, "Failed to flush training log");
        }
        self.logger.log_shutdown("shutdown signal");
    }

    /// One act-observe-train cycle
    async fn step(&mut self) {
        let started = Instant::now();

        let old_state = self.env.normalized_state();
        let old_risk = self.env.failure_risk();
        let valid = self.env.valid_actions();

        // A failing backend degrades to the safe maintain action; the loop
        // itself keeps ticking
        let requested = match self.agent.select_action(&old_state, &valid).await {
            Ok(action) => {
                self.health.set_healthy(components::AGENT).await;
                action
            }
            Err(e) => {
                warn!(error = %e, "Action selection failed, falling back to maintain");
                self.metrics.inc_backend_errors();
                self.health
                    .set_degraded(components::AGENT, format!("Selection failed: {e}"))
                    .await;
                if let Err(reset) = self.agent.reset_backend().await {
                    error!(error = %reset, "Estimator backend reset failed");
                }
                Action::Maintain
            }
        };

        let outcome = self.env.execute_action(requested);
        if outcome.overridden {
            self.metrics.inc_emergency_overrides();
            self.logger.log_emergency_override(
                outcome.requested.name(),
                outcome.applied.name(),
                self.env.failure_risk(),
            );
        }

        let new_state = self.env.normalized_state();
        let new_risk = self.env.failure_risk();
        let reward = self.agent.compute_reward(
            &new_state,
            outcome.applied,
            old_risk,
            new_risk,
            self.env.energy_price_factor(),
        );
        let done = new_risk > self.config.done_risk_threshold;
        self.agent
            .remember(&old_state, outcome.applied, reward, &new_state, done);

        let train_started = Instant::now();
        let loss = match self.agent.train_step().await {
            Ok(loss) => {
                if loss.is_some() {
                    self.metrics
                        .observe_training_latency(train_started.elapsed().as_secs_f64());
                    self.health.set_healthy(components::TRAINER).await;
                }
                loss
            }
            Err(e) => {
                warn!(error = %e, "Training failed, skipping this tick");
                self.metrics.inc_backend_errors();
                self.health
                    .set_degraded(components::TRAINER, format!("Training failed: {e}"))
                    .await;
                if let Err(reset) = self.agent.reset_backend().await {
                    error!(error = %reset, "Estimator backend reset failed");
                }
                None
            }
        };

        if let Some(loss) = loss {
            self.metrics.set_last_loss(loss);
            let freq = self.agent.config().checkpoint_freq;
            if freq > 0 && self.agent.step_count() % freq == 0 {
                self.save_checkpoint().await;
            }
        }

        self.publisher
            .publish_status(self.env.status(Some(outcome.applied)));
        self.metrics.inc_action(outcome.applied.name());
        self.metrics
            .set_step_gauges(self.agent.epsilon(), new_risk, self.agent.memory_len());
        self.metrics
            .set_environment_gauges(self.env.storage().current_kwh, self.env.energy_kw());
        self.metrics
            .observe_step_latency(started.elapsed().as_secs_f64());
        self.health.set_healthy(components::ENVIRONMENT).await;

        self.training_log.push(TrainingLogEntry {
            step: self.agent.step_count(),
            action: outcome.applied,
            reward,
            loss,
            epsilon: self.agent.epsilon(),
            risk: new_risk,
            energy_kw: self.env.energy_kw(),
            avg_rack_temp_c: self.env.avg_rack_temp_c(),
        });

        debug!(
            step = self.agent.step_count(),
            action = %outcome.applied,
            reward,
            epsilon = self.agent.epsilon(),
            loss,
            risk = new_risk,
            "Control step complete"
        );
    }

    /// Passive environment advance plus a status emission
    fn passive_tick(&mut self) {
        self.env.tick();
        self.publisher.publish_status(self.env.status(None));
        self.metrics
            .set_environment_gauges(self.env.storage().current_kwh, self.env.energy_kw());
    }

    /// Apply one inbound signal to the environment
    fn apply_signal(&mut self, signal: InboundSignal) {
        match signal {
            InboundSignal::Conditions(conditions) => {
                self.env.apply_conditions(conditions);
            }
            InboundSignal::SetTargetTemperature { value } => {
                info!(value, "Operator set target temperature");
                self.env.set_target_temperature(value);
            }
            InboundSignal::SetWorkload { value } => {
                info!(value, "Operator set workload");
                self.env.set_workload(value);
            }
        }
    }

    /// Assemble and persist a checkpoint
    async fn save_checkpoint(&mut self) {
        let snapshot = self.snapshot().await;
        match self.checkpoints.save(&snapshot) {
            Ok(path) => {
                self.metrics.inc_checkpoints();
                self.logger
                    .log_checkpoint(&path, snapshot.metadata.timestep);
                self.health.set_healthy(components::CHECKPOINT).await;
            }
            Err(e) => {
                warn!(error = %e, "Checkpoint save failed");
                self.health
                    .set_degraded(components::CHECKPOINT, format!("Save failed: {e}"))
                    .await;
            }
        }
    }

    async fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            parameters: self.agent.parameters().await,
            normalizer: self.agent.normalizer().clone(),
            metadata: CheckpointMetadata {
                saved_at: chrono::Utc::now().timestamp(),
                timestep: self.agent.step_count(),
                epsilon: self.agent.epsilon(),
                last_loss: self.agent.last_loss(),
                best_loss: self.agent.best_loss(),
                reward_stats: self.agent.reward_stats(),
                training: self.agent.config().clone(),
                model: self.model_config.clone(),
                environment: self.env.config().clone(),
            },
        }
    }

    /// Write the accumulated per-step log as JSON
    fn flush_training_log(&self) -> Result<()> {
        let Some(path) = &self.config.training_log_path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(&self.training_log)
            .context("Failed to serialize training log")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write training log to {:?}", path))?;
        info!(path = %path.display(), entries = self.training_log.len(), "Training log flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::EnvironmentConfig;
    use crate::learner::{ReplayConfig, RewardWeights, TrainingConfig};
    use crate::transport::OutboundMessage;

    fn build_loop(
        dir: &std::path::Path,
        batch_size: usize,
    ) -> (ControlLoop, LoopHandle, mpsc::Receiver<OutboundMessage>, mpsc::Sender<InboundSignal>) {
        let env = Environment::new(EnvironmentConfig {
            seed: Some(5),
            ..Default::default()
        });
        let model_config = ModelConfig {
            hidden_units: 8,
            noise_scale: 0.0,
            seed: Some(5),
            ..Default::default()
        };
        let agent = DqnAgent::new(
            env.layout(),
            TrainingConfig {
                batch_size,
                seed: Some(5),
                ..Default::default()
            },
            model_config.clone(),
            ReplayConfig::default(),
            RewardWeights::default(),
        );

        let (publisher, outbound_rx) = StatusPublisher::channel(64);
        let (signal_tx, signal_rx) = mpsc::channel(8);

        let (control_loop, handle) = ControlLoop::new(
            env,
            agent,
            model_config,
            LoopConfig {
                action_interval: Duration::from_millis(5),
                training_log_path: Some(dir.join("training_log.json")),
                ..Default::default()
            },
            CheckpointConfig {
                dir: dir.join("checkpoints"),
                max_keep: 3,
            },
            publisher,
            signal_rx,
            HealthRegistry::new(),
            AgentMetrics::new(),
            StructuredLogger::new("test_agent"),
        )
        .unwrap();

        (control_loop, handle, outbound_rx, signal_tx)
    }

    #[tokio::test]
    async fn test_step_records_transition_and_emits_status() {
        let dir = tempfile::tempdir().unwrap();
        // Batch size high enough that training is skipped
        let (mut control_loop, _handle, mut outbound_rx, _signal_tx) =
            build_loop(dir.path(), 1000);

        control_loop.step().await;
        control_loop.step().await;

        assert_eq!(control_loop.training_log.len(), 2);
        assert_eq!(control_loop.agent.memory_len(), 2);
        // Training skipped: below one batch of transitions
        assert!(control_loop.training_log.iter().all(|e| e.loss.is_none()));

        match outbound_rx.recv().await.unwrap() {
            OutboundMessage::Status(status) => assert!(status.action.is_some()),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_step_trains_once_batch_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let (mut control_loop, _handle, _outbound_rx, _signal_tx) = build_loop(dir.path(), 4);

        for _ in 0..8 {
            control_loop.step().await;
        }
        assert!(control_loop
            .training_log
            .iter()
            .any(|e| e.loss.is_some()));
        assert!(control_loop.agent.step_count() > 0);
    }

    #[tokio::test]
    async fn test_inbound_signal_applies_override() {
        let dir = tempfile::tempdir().unwrap();
        let (mut control_loop, _handle, _outbound_rx, _signal_tx) = build_loop(dir.path(), 1000);

        control_loop.apply_signal(InboundSignal::SetTargetTemperature { value: 26.0 });
        let status = control_loop.env.status(None);
        assert_eq!(status.target_temp_c, 26.0);

        control_loop.apply_signal(InboundSignal::Conditions(
            crate::models::OutsideConditions {
                temperature_c: 30.0,
                humidity_pct: 20.0,
            },
        ));
        assert_eq!(
            control_loop.env.energy_price(),
            control_loop.env.config().peak_energy_price
        );
    }

    #[tokio::test]
    async fn test_shutdown_writes_final_checkpoint_and_log() {
        let dir = tempfile::tempdir().unwrap();
        let (control_loop, _handle, _outbound_rx, _signal_tx) = build_loop(dir.path(), 1000);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(control_loop.run(shutdown_rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();

        let checkpoints: Vec<_> = std::fs::read_dir(dir.path().join("checkpoints"))
            .unwrap()
            .collect();
        assert!(!checkpoints.is_empty());
        assert!(dir.path().join("training_log.json").exists());
    }

    #[tokio::test]
    async fn test_pause_stops_action_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let (control_loop, handle, _outbound_rx, _signal_tx) = build_loop(dir.path(), 1000);

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(control_loop.run(shutdown_rx));

        handle.pause().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
        // The loop exited cleanly while paused; the final checkpoint still
        // happens on shutdown
        assert!(dir.path().join("checkpoints").exists());
    }
}
