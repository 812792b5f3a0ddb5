//! Prioritized experience replay
//!
//! Bounded circular buffer of transitions with priority-weighted sampling
//! and importance-sampling correction. New entries default to the maximum
//! observed priority so unseen transitions are sampled at least as often as
//! known ones.

use crate::models::Experience;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Priorities never drop below this floor, so every stored transition keeps
/// a nonzero sampling probability
pub const MIN_PRIORITY: f64 = 1e-6;

/// Replay memory configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Maximum number of stored transitions
    pub capacity: usize,
    /// Priority exponent: 0 is uniform sampling, 1 is fully prioritized
    pub alpha: f64,
    /// Initial importance-sampling exponent
    pub beta: f64,
    /// Beta annealing step applied per sample call, toward 1
    pub beta_increment: f64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            alpha: 0.6,
            beta: 0.4,
            beta_increment: 0.001,
        }
    }
}

/// A sampled training batch
#[derive(Debug, Clone)]
pub struct SampledBatch {
    /// Copies of the sampled transitions
    pub experiences: Vec<Experience>,
    /// Buffer indices of the samples, for priority updates
    pub indices: Vec<usize>,
    /// Importance weights, normalized so the batch maximum is 1
    pub weights: Vec<f64>,
}

/// Bounded circular buffer with priority-biased sampling
pub struct PrioritizedReplayMemory {
    config: ReplayConfig,
    memory: Vec<Experience>,
    priorities: Vec<f64>,
    position: usize,
    beta: f64,
    priority_sum: f64,
    max_priority: f64,
}

impl PrioritizedReplayMemory {
    pub fn new(config: ReplayConfig) -> Self {
        let capacity = config.capacity.max(1);
        Self {
            beta: config.beta,
            config: ReplayConfig { capacity, ..config },
            memory: Vec::with_capacity(capacity),
            priorities: Vec::with_capacity(capacity),
            position: 0,
            priority_sum: 0.0,
            max_priority: 1.0,
        }
    }

    /// Number of stored transitions
    pub fn len(&self) -> usize {
        self.memory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memory.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Current importance-sampling exponent
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Sum of stored priorities
    pub fn priority_sum(&self) -> f64 {
        self.priority_sum
    }

    /// Store a transition, overwriting the oldest slot when full
    ///
    /// Without an explicit priority the entry gets the maximum observed
    /// priority.
    pub fn add(&mut self, experience: Experience, priority: Option<f64>) {
        let priority = priority.unwrap_or(self.max_priority).max(MIN_PRIORITY);

        if self.memory.len() < self.config.capacity {
            self.memory.push(experience);
            self.priorities.push(priority);
        } else {
            self.priority_sum -= self.priorities[self.position];
            self.memory[self.position] = experience;
            self.priorities[self.position] = priority;
            self.position = (self.position + 1) % self.config.capacity;
        }

        self.priority_sum += priority;
        self.max_priority = self.max_priority.max(priority);
    }

    /// Draw a prioritized batch with importance weights
    ///
    /// Returns `None` when the memory is empty; callers treat that as "skip
    /// training this tick". Sampling is inverse-CDF with replacement over
    /// `priority^alpha`, and beta anneals toward 1 on every call.
    pub fn sample(&mut self, batch_size: usize, rng: &mut impl Rng) -> Option<SampledBatch> {
        if self.memory.is_empty() || batch_size == 0 {
            return None;
        }

        self.beta = (self.beta + self.config.beta_increment).min(1.0);

        let scaled: Vec<f64> = self
            .priorities
            .iter()
            .map(|p| p.powf(self.config.alpha))
            .collect();
        let total: f64 = scaled.iter().sum();
        if total <= 0.0 {
            return None;
        }

        let n = self.memory.len() as f64;
        let mut indices = Vec::with_capacity(batch_size);
        let mut weights = Vec::with_capacity(batch_size);

        for _ in 0..batch_size {
            let r: f64 = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut chosen = scaled.len() - 1;
            for (idx, p) in scaled.iter().enumerate() {
                cumulative += p;
                if r < cumulative {
                    chosen = idx;
                    break;
                }
            }

            let probability = scaled[chosen] / total;
            indices.push(chosen);
            weights.push((n * probability).powf(-self.beta));
        }

        let max_weight = weights.iter().copied().fold(f64::MIN, f64::max);
        if max_weight > 0.0 {
            for w in &mut weights {
                *w /= max_weight;
            }
        }

        let experiences = indices.iter().map(|&i| self.memory[i].clone()).collect();

        Some(SampledBatch {
            experiences,
            indices,
            weights,
        })
    }

    /// Reassign priorities after a training batch
    ///
    /// Values are floored at `MIN_PRIORITY` so priorities stay strictly
    /// positive.
    pub fn update_priorities(&mut self, indices: &[usize], priorities: &[f64]) {
        for (&idx, &priority) in indices.iter().zip(priorities) {
            if idx >= self.priorities.len() {
                continue;
            }
            let priority = priority.max(MIN_PRIORITY);
            self.priority_sum += priority - self.priorities[idx];
            self.priorities[idx] = priority;
            self.max_priority = self.max_priority.max(priority);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Action;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn experience(tag: f64) -> Experience {
        Experience {
            state: vec![tag; 4],
            action: Action::Maintain,
            reward: tag,
            next_state: vec![tag; 4],
            done: false,
        }
    }

    fn memory(capacity: usize) -> PrioritizedReplayMemory {
        PrioritizedReplayMemory::new(ReplayConfig {
            capacity,
            ..Default::default()
        })
    }

    #[test]
    fn test_empty_sample_returns_none() {
        let mut mem = memory(100);
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(mem.sample(32, &mut rng).is_none());
    }

    #[test]
    fn test_capacity_never_exceeded() {
        let mut mem = memory(5);
        for i in 0..20 {
            mem.add(experience(i as f64), None);
            assert!(mem.len() <= 5);
        }
        assert_eq!(mem.len(), 5);
    }

    #[test]
    fn test_fifo_eviction_when_full() {
        let mut mem = memory(3);
        for i in 0..5 {
            mem.add(experience(i as f64), Some(1.0));
        }
        // Entries 0 and 1 were overwritten
        let stored: Vec<f64> = mem.memory.iter().map(|e| e.reward).collect();
        assert!(!stored.contains(&0.0));
        assert!(!stored.contains(&1.0));
        assert!(stored.contains(&4.0));
    }

    #[test]
    fn test_priority_sum_stays_consistent() {
        let mut mem = memory(4);
        for i in 0..10 {
            mem.add(experience(i as f64), Some(0.5 + i as f64 * 0.1));
        }
        mem.update_priorities(&[0, 2], &[2.0, 3.0]);

        let expected: f64 = mem.priorities.iter().sum();
        assert!((mem.priority_sum() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_priorities_stay_strictly_positive() {
        let mut mem = memory(4);
        mem.add(experience(1.0), Some(1.0));
        mem.update_priorities(&[0], &[0.0]);
        assert!(mem.priorities[0] >= MIN_PRIORITY);
    }

    #[test]
    fn test_weights_normalized_to_at_most_one() {
        let mut mem = memory(100);
        let mut rng = SmallRng::seed_from_u64(3);
        for i in 0..50 {
            mem.add(experience(i as f64), Some(0.1 + (i % 7) as f64));
        }

        let batch = mem.sample(32, &mut rng).unwrap();
        assert_eq!(batch.experiences.len(), 32);
        assert!(batch.weights.iter().all(|w| *w > 0.0 && *w <= 1.0 + 1e-12));
        assert!(batch.weights.iter().any(|w| (*w - 1.0).abs() < 1e-12));
    }

    #[test]
    fn test_beta_anneals_toward_one() {
        let mut mem = memory(10);
        let mut rng = SmallRng::seed_from_u64(5);
        mem.add(experience(1.0), None);

        let initial = mem.beta();
        for _ in 0..1000 {
            mem.sample(1, &mut rng);
        }
        assert!(mem.beta() > initial);
        assert!(mem.beta() <= 1.0);
    }

    #[test]
    fn test_sampling_frequency_tracks_priorities() {
        let mut mem = PrioritizedReplayMemory::new(ReplayConfig {
            capacity: 2,
            alpha: 1.0,
            beta: 0.4,
            beta_increment: 0.0,
        });
        let mut rng = SmallRng::seed_from_u64(11);

        mem.add(experience(0.0), Some(1.0));
        mem.add(experience(1.0), Some(3.0));

        let mut counts = [0usize; 2];
        for _ in 0..2000 {
            let batch = mem.sample(1, &mut rng).unwrap();
            counts[batch.indices[0]] += 1;
        }

        // Expected split 1:3
        let fraction = counts[1] as f64 / 2000.0;
        assert!(
            (fraction - 0.75).abs() < 0.05,
            "high-priority fraction was {}",
            fraction
        );
    }

    #[test]
    fn test_new_entries_use_max_priority() {
        let mut mem = memory(10);
        mem.add(experience(0.0), Some(4.0));
        mem.add(experience(1.0), None);
        assert_eq!(mem.priorities[1], 4.0);
    }
}
