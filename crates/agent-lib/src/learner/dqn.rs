//! Double-DQN control agent
//!
//! Owns the online/target estimator pair behind a single async model lock,
//! the replay memory, the state normalizer, and the exploration schedule.
//! Targets decouple action selection (online network) from value evaluation
//! (target network); the target network is hard-synced on a fixed cadence.

use super::network::{MlpEstimator, ModelConfig, NetworkParameters};
use super::normalizer::StateNormalizer;
use super::replay::{PrioritizedReplayMemory, ReplayConfig};
use super::reward::{RewardInput, RewardTermStat, RewardTracker, RewardWeights};
use super::ValueEstimator;
use crate::models::{Action, Experience, StateLayout};
use anyhow::{Context, Result};
use ndarray::Array2;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Training hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Discount factor
    pub gamma: f64,
    /// Initial exploration rate
    pub epsilon: f64,
    /// Exploration floor
    pub epsilon_min: f64,
    /// Multiplicative decay applied after each training step
    pub epsilon_decay: f64,
    /// Transitions per training batch
    pub batch_size: usize,
    /// Hard target sync cadence, in training steps
    pub target_update_freq: u64,
    /// Checkpoint cadence, in training steps
    pub checkpoint_freq: u64,
    /// Bootstrap horizon: targets discount by gamma^n
    pub n_step_returns: u32,
    /// Steps over which the softmax temperature anneals to its floor
    pub softmax_anneal_steps: u64,
    /// Softmax temperature floor
    pub min_temperature: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            gamma: 0.95,
            epsilon: 1.0,
            epsilon_min: 0.01,
            epsilon_decay: 0.995,
            batch_size: 32,
            target_update_freq: 200,
            checkpoint_freq: 1000,
            n_step_returns: 3,
            softmax_anneal_steps: 10_000,
            min_temperature: 0.1,
            seed: None,
        }
    }
}

type BoxedEstimator = Box<dyn ValueEstimator + Send>;
type EstimatorFactory = Box<dyn Fn() -> BoxedEstimator + Send + Sync>;

struct EstimatorPair {
    online: BoxedEstimator,
    target: BoxedEstimator,
}

/// Double-DQN agent with noisy-network exploration
pub struct DqnAgent {
    layout: StateLayout,
    config: TrainingConfig,
    reward_weights: RewardWeights,
    factory: EstimatorFactory,
    // Single advisory lock over everything that touches network parameters
    models: Mutex<EstimatorPair>,
    normalizer: StateNormalizer,
    memory: PrioritizedReplayMemory,
    tracker: RewardTracker,
    rng: SmallRng,
    step_count: u64,
    epsilon: f64,
    last_loss: Option<f64>,
    best_loss: Option<f64>,
    last_good: Option<NetworkParameters>,
}

impl DqnAgent {
    pub fn new(
        layout: StateLayout,
        config: TrainingConfig,
        model_config: ModelConfig,
        replay_config: ReplayConfig,
        reward_weights: RewardWeights,
    ) -> Self {
        let input_len = layout.len();
        let factory: EstimatorFactory = Box::new(move || {
            Box::new(MlpEstimator::new(
                input_len,
                Action::COUNT,
                model_config.clone(),
            ))
        });
        Self::with_factory(layout, config, replay_config, reward_weights, factory)
    }

    /// Build an agent over an arbitrary estimator backend
    pub fn with_factory(
        layout: StateLayout,
        config: TrainingConfig,
        replay_config: ReplayConfig,
        reward_weights: RewardWeights,
        factory: EstimatorFactory,
    ) -> Self {
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let models = Mutex::new(EstimatorPair {
            online: factory(),
            target: factory(),
        });

        Self {
            normalizer: StateNormalizer::new(layout.len()),
            memory: PrioritizedReplayMemory::new(replay_config),
            tracker: RewardTracker::new(),
            epsilon: config.epsilon,
            layout,
            config,
            reward_weights,
            factory,
            models,
            rng,
            step_count: 0,
            last_loss: None,
            best_loss: None,
            last_good: None,
        }
    }

    /// Clamp a raw state vector to its documented bounds
    ///
    /// Wrong-length input collapses to the zero state; non-finite entries
    /// become 0. Malformed state never propagates into the training path.
    pub fn sanitize_state(&self, state: &[f64]) -> Vec<f64> {
        let expected = self.layout.len();
        if state.len() != expected {
            warn!(
                expected,
                got = state.len(),
                "State length mismatch, substituting zero state"
            );
            return vec![0.0; expected];
        }

        state
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                if !value.is_finite() {
                    return 0.0;
                }
                let (lo, hi) = self.layout.bounds(i);
                value.clamp(lo, hi)
            })
            .collect()
    }

    /// Pick an action for the current state, restricted to `valid`
    ///
    /// With probability epsilon the action is drawn uniformly from the
    /// valid set; otherwise a temperature-annealed softmax over the noisy
    /// estimator's action values decides, again over valid actions only.
    pub async fn select_action(&mut self, state: &[f64], valid: &[Action]) -> Result<Action> {
        if valid.is_empty() {
            return Ok(Action::Maintain);
        }

        if self.rng.gen::<f64>() < self.epsilon {
            let idx = self.rng.gen_range(0..valid.len());
            return Ok(valid[idx]);
        }

        let clean = self.sanitize_state(state);
        let normalized = self.normalizer.normalize(&clean);
        let states = Array2::from_shape_vec((1, normalized.len()), normalized)
            .context("Failed to shape state for inference")?;

        let q_values = {
            let mut pair = self.models.lock().await;
            pair.online.predict(states.view()).await?
        };
        let row = q_values.row(0);

        // Temperature anneals toward the floor, sharpening exploitation
        let progress = self.step_count as f64 / self.config.softmax_anneal_steps.max(1) as f64;
        let temperature = (1.0 - progress).max(self.config.min_temperature);

        let scaled: Vec<f64> = valid
            .iter()
            .map(|a| row.get(a.index()).copied().unwrap_or(0.0) / temperature)
            .collect();
        let max = scaled.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = scaled.iter().map(|q| (q - max).exp()).collect();
        let sum: f64 = exp.iter().sum();

        let r: f64 = self.rng.gen::<f64>() * sum;
        let mut cumulative = 0.0;
        for (i, e) in exp.iter().enumerate() {
            cumulative += e;
            if r < cumulative {
                return Ok(valid[i]);
            }
        }
        Ok(valid[valid.len() - 1])
    }

    /// Reward for one observed transition
    pub fn compute_reward(
        &mut self,
        new_state: &[f64],
        action: Action,
        old_risk: f64,
        new_risk: f64,
        energy_price_factor: f64,
    ) -> f64 {
        let clean = self.sanitize_state(new_state);
        let input = RewardInput::from_transition(
            &self.layout,
            &clean,
            action,
            old_risk,
            new_risk,
            energy_price_factor,
        );
        let total = self.tracker.total(&self.reward_weights, &input);
        self.tracker.maybe_log(self.step_count);
        total
    }

    /// Store a transition, updating the normalizer on both endpoints first
    pub fn remember(
        &mut self,
        state: &[f64],
        action: Action,
        reward: f64,
        next_state: &[f64],
        done: bool,
    ) {
        let clean_state = self.sanitize_state(state);
        let clean_next = self.sanitize_state(next_state);

        self.normalizer.update(&clean_state);
        self.normalizer.update(&clean_next);

        self.memory.add(
            Experience {
                state: clean_state,
                action,
                reward,
                next_state: clean_next,
                done,
            },
            None,
        );
    }

    /// Run one prioritized double-DQN training step
    ///
    /// Returns `Ok(None)` when the replay memory cannot fill a batch yet.
    pub async fn train_step(&mut self) -> Result<Option<f64>> {
        if self.memory.len() < self.config.batch_size {
            return Ok(None);
        }
        let Some(batch) = self.memory.sample(self.config.batch_size, &mut self.rng) else {
            return Ok(None);
        };

        let n = batch.experiences.len();
        let width = self.layout.len();
        let mut states = Array2::zeros((n, width));
        let mut next_states = Array2::zeros((n, width));
        for (i, exp) in batch.experiences.iter().enumerate() {
            let s = self.normalizer.normalize(&exp.state);
            let ns = self.normalizer.normalize(&exp.next_state);
            for j in 0..width {
                states[[i, j]] = s[j];
                next_states[[i, j]] = ns[j];
            }
        }

        let discount = self.config.gamma.powi(self.config.n_step_returns as i32);

        // The lock is held across the whole batch so the target network can
        // never be synced mid-computation
        let (loss, td_errors) = {
            let mut pair = self.models.lock().await;

            let online_next = pair.online.predict(next_states.view()).await?;
            let target_next = pair.target.predict(next_states.view()).await?;
            let current = pair.online.predict(states.view()).await?;

            let mut targets = current.clone();
            let mut td_errors = Vec::with_capacity(n);
            for (i, exp) in batch.experiences.iter().enumerate() {
                let best = argmax(online_next.row(i).iter().copied());
                let bootstrap = if exp.done {
                    0.0
                } else {
                    target_next[[i, best]]
                };
                let target_value = exp.reward + discount * bootstrap;
                let action_idx = exp.action.index();
                td_errors.push((target_value - current[[i, action_idx]]).abs());
                targets[[i, action_idx]] = target_value;
            }

            let loss = pair
                .online
                .train(states.view(), targets.view(), &batch.weights)
                .await?;

            self.step_count += 1;
            if self.step_count % self.config.target_update_freq == 0 {
                Self::sync_target(&mut pair, &self.factory).await?;
                self.last_good = Some(pair.online.parameters());
            }

            (loss, td_errors)
        };

        self.memory.update_priorities(&batch.indices, &td_errors);

        self.epsilon = (self.epsilon * self.config.epsilon_decay).max(self.config.epsilon_min);
        self.last_loss = Some(loss);
        self.best_loss = Some(match self.best_loss {
            Some(best) => best.min(loss),
            None => loss,
        });

        debug!(
            step = self.step_count,
            loss,
            epsilon = self.epsilon,
            "Training step complete"
        );
        Ok(Some(loss))
    }

    /// Hard-overwrite the target network from the online network
    ///
    /// A shape mismatch means the architecture drifted; the target is
    /// discarded, rebuilt, and re-synced rather than silently skipped.
    async fn sync_target(pair: &mut EstimatorPair, factory: &EstimatorFactory) -> Result<()> {
        let params = pair.online.parameters();
        if let Err(e) = pair.target.set_parameters(&params).await {
            warn!(error = %e, "Target architecture mismatch, rebuilding target network");
            pair.target = factory();
            pair.target
                .set_parameters(&params)
                .await
                .context("Rebuilt target network still rejects online parameters")?;
        }
        debug!("Target network synchronized");
        Ok(())
    }

    /// Rebuild the estimator pair after a backend failure
    ///
    /// Both networks are reconstructed and, when available, restored from
    /// the last known-good parameter snapshot.
    pub async fn reset_backend(&mut self) -> Result<()> {
        warn!("Resetting estimator backend");
        let mut pair = self.models.lock().await;
        pair.online = (self.factory)();
        pair.target = (self.factory)();
        if let Some(params) = &self.last_good {
            pair.online
                .set_parameters(params)
                .await
                .context("Failed to restore online network after reset")?;
            pair.target
                .set_parameters(params)
                .await
                .context("Failed to restore target network after reset")?;
        }
        info!("Estimator backend reset complete");
        Ok(())
    }

    /// Current online-network parameters
    pub async fn parameters(&self) -> NetworkParameters {
        self.models.lock().await.online.parameters()
    }

    /// Restore agent state from a checkpoint
    pub async fn restore(
        &mut self,
        parameters: &NetworkParameters,
        normalizer: StateNormalizer,
        step_count: u64,
        epsilon: f64,
    ) -> Result<()> {
        let mut pair = self.models.lock().await;
        pair.online
            .set_parameters(parameters)
            .await
            .context("Checkpoint parameters do not fit the online network")?;
        pair.target
            .set_parameters(parameters)
            .await
            .context("Checkpoint parameters do not fit the target network")?;
        drop(pair);

        self.last_good = Some(parameters.clone());
        self.normalizer = normalizer;
        self.step_count = step_count;
        self.epsilon = epsilon.clamp(self.config.epsilon_min, 1.0);
        info!(step_count, epsilon = self.epsilon, "Agent state restored");
        Ok(())
    }

    pub fn layout(&self) -> StateLayout {
        self.layout
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn normalizer(&self) -> &StateNormalizer {
        &self.normalizer
    }

    pub fn reward_stats(&self) -> Vec<RewardTermStat> {
        self.tracker.snapshot()
    }

    pub fn memory_len(&self) -> usize {
        self.memory.len()
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.last_loss
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_loss
    }
}

fn argmax(values: impl Iterator<Item = f64>) -> usize {
    let mut best_idx = 0;
    let mut best = f64::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best {
            best = v;
            best_idx = i;
        }
    }
    best_idx
}
