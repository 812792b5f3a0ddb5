//! Value estimation and training
//!
//! This module holds the learning half of the control loop: online state
//! normalization, prioritized replay, the trainable value estimator pair,
//! the reward terms, and the double-DQN agent that ties them together.

mod dqn;
mod network;
mod normalizer;
mod replay;
mod reward;

pub use dqn::{DqnAgent, TrainingConfig};
pub use network::{LayerParameters, MlpEstimator, ModelConfig, NetworkParameters};
pub use normalizer::StateNormalizer;
pub use replay::{PrioritizedReplayMemory, ReplayConfig, SampledBatch, MIN_PRIORITY};
pub use reward::{
    evaluate, RewardInput, RewardStat, RewardTerm, RewardTermStat, RewardTracker, RewardWeights,
};

use anyhow::Result;
use ndarray::{Array2, ArrayView2};

pub use async_trait::async_trait;

/// Contract for trainable action-value estimators
///
/// Calls may suspend (an out-of-process backend is a valid implementation).
/// Mutation (`train`, `set_parameters`) and reads (`predict`) are not safe
/// to interleave; callers serialize access through the agent's model lock.
#[async_trait]
pub trait ValueEstimator: Send {
    /// Action values for a batch of normalized states
    async fn predict<'a>(&mut self, states: ArrayView2<'a, f64>) -> Result<Array2<f64>>;

    /// Fit the estimator toward per-sample target action values, scaled by
    /// importance-sampling weights; returns the batch loss
    async fn train<'a>(
        &mut self,
        states: ArrayView2<'a, f64>,
        targets: ArrayView2<'a, f64>,
        sample_weights: &[f64],
    ) -> Result<f64>;

    /// Whole-network parameter snapshot
    fn parameters(&self) -> NetworkParameters;

    /// Overwrite all parameters; fails on any architecture mismatch
    async fn set_parameters(&mut self, parameters: &NetworkParameters) -> Result<()>;
}
