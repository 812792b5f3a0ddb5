//! Online state normalization
//!
//! Maintains per-dimension running mean/variance with Welford's algorithm,
//! plus running min/max as a fallback for degenerate dimensions. The
//! snapshot is persisted at checkpoint time so a resumed run keeps its
//! calibration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Standard deviation below which a dimension is treated as constant
const STD_EPSILON: f64 = 1e-7;

/// Per-dimension running statistics over observed state vectors
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateNormalizer {
    means: Vec<f64>,
    stds: Vec<f64>,
    count: u64,
    min_values: Vec<f64>,
    max_values: Vec<f64>,
}

impl StateNormalizer {
    pub fn new(dimensions: usize) -> Self {
        Self {
            means: vec![0.0; dimensions],
            stds: vec![1.0; dimensions],
            count: 0,
            min_values: vec![f64::INFINITY; dimensions],
            max_values: vec![f64::NEG_INFINITY; dimensions],
        }
    }

    /// Number of dimensions tracked
    pub fn dimensions(&self) -> usize {
        self.means.len()
    }

    /// Number of state vectors folded in so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Fold one observed state vector into the running statistics
    pub fn update(&mut self, state: &[f64]) {
        debug_assert_eq!(state.len(), self.means.len());
        self.count += 1;
        let n = self.count as f64;

        for (i, &value) in state.iter().enumerate().take(self.means.len()) {
            self.min_values[i] = self.min_values[i].min(value);
            self.max_values[i] = self.max_values[i].max(value);

            let delta = value - self.means[i];
            self.means[i] += delta / n;
            if self.count > 1 {
                let std = self.stds[i];
                self.stds[i] =
                    (((n - 1.0) * std * std + delta * (value - self.means[i])) / n).sqrt();
            }
        }
    }

    /// Normalize a state vector with the current statistics
    ///
    /// Dimensions with near-zero variance fall back to min-max scaling over
    /// the observed range (0 when the range itself is zero). Repeated calls
    /// without an intervening `update` return identical output.
    pub fn normalize(&self, state: &[f64]) -> Vec<f64> {
        state
            .iter()
            .enumerate()
            .map(|(i, &value)| {
                if i >= self.means.len() {
                    return 0.0;
                }
                if self.stds[i] < STD_EPSILON {
                    let range = self.max_values[i] - self.min_values[i];
                    if range > 0.0 {
                        (value - self.min_values[i]) / range
                    } else {
                        0.0
                    }
                } else {
                    (value - self.means[i]) / self.stds[i]
                }
            })
            .collect()
    }

    /// Persist the statistics as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self).context("Failed to serialize normalizer")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write normalizer to {:?}", path))?;
        Ok(())
    }

    /// Restore statistics persisted by `save`
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read normalizer from {:?}", path))?;
        serde_json::from_slice(&data).context("Failed to deserialize normalizer")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_normalize_idempotent_without_update() {
        let mut normalizer = StateNormalizer::new(3);
        normalizer.update(&[1.0, 2.0, 3.0]);
        normalizer.update(&[2.0, 4.0, 6.0]);

        let input = [1.5, 3.0, 4.5];
        let first = normalizer.normalize(&input);
        let second = normalizer.normalize(&input);
        assert_eq!(first, second);
    }

    #[test]
    fn test_converges_on_iid_sample() {
        let mut rng = SmallRng::seed_from_u64(17);
        let mut normalizer = StateNormalizer::new(1);

        // Uniform samples around mean 5.0
        let samples: Vec<f64> = (0..20_000).map(|_| 3.0 + rng.gen::<f64>() * 4.0).collect();
        for s in &samples {
            normalizer.update(&[*s]);
        }

        let normalized: Vec<f64> = samples.iter().map(|s| normalizer.normalize(&[*s])[0]).collect();
        let mean: f64 = normalized.iter().sum::<f64>() / normalized.len() as f64;
        let var: f64 = normalized.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            / normalized.len() as f64;

        assert!(mean.abs() < 0.05, "mean was {}", mean);
        assert!((var.sqrt() - 1.0).abs() < 0.05, "std was {}", var.sqrt());
    }

    #[test]
    fn test_constant_dimension_falls_back_to_min_max() {
        let mut normalizer = StateNormalizer::new(2);
        for _ in 0..50 {
            normalizer.update(&[0.85, 0.85]);
        }

        // Zero observed range maps to 0
        let out = normalizer.normalize(&[0.85, 0.85]);
        assert_eq!(out, vec![0.0, 0.0]);
    }

    #[test]
    fn test_constant_dimension_uses_observed_range() {
        let mut normalizer = StateNormalizer::new(1);
        // A dimension pinned to two endpoint observations then held constant
        normalizer.update(&[0.0]);
        normalizer.update(&[0.0]);
        for _ in 0..100 {
            normalizer.update(&[0.0]);
        }
        normalizer.update(&[10.0]);

        let out = normalizer.normalize(&[5.0]);
        assert!(out[0].is_finite());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("normalizer.json");

        let mut normalizer = StateNormalizer::new(4);
        for i in 0..100 {
            let x = i as f64;
            normalizer.update(&[x, x * 2.0, x * 3.0, -x]);
        }
        normalizer.save(&path).unwrap();

        let restored = StateNormalizer::load(&path).unwrap();
        assert_eq!(restored.count(), normalizer.count());

        let input = [12.0, 24.0, 36.0, -12.0];
        assert_eq!(restored.normalize(&input), normalizer.normalize(&input));
    }
}
