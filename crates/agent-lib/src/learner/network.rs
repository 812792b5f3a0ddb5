//! In-process value estimator
//!
//! A small fully-connected network trained with weighted Huber loss and
//! plain clipped-gradient descent. The hidden noisy layer perturbs its
//! weights and bias with fresh zero-mean Gaussian noise on every forward
//! pass, so exploration comes from the value estimate itself rather than
//! from randomizing the chosen action.

use super::{async_trait, ValueEstimator};
use anyhow::{bail, Context, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Estimator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Width of the two hidden layers
    pub hidden_units: usize,
    /// Standard deviation of the noisy layer's per-pass perturbation
    pub noise_scale: f64,
    /// Gradient-descent step size
    pub learning_rate: f64,
    /// Elementwise gradient clip value
    pub grad_clip: f64,
    /// Huber loss transition point
    pub huber_delta: f64,
    /// RNG seed; `None` seeds from entropy
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_units: 256,
            noise_scale: 0.1,
            learning_rate: 0.001,
            grad_clip: 1.0,
            huber_delta: 1.0,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Activation {
    Relu,
    Linear,
}

impl Activation {
    fn apply(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| v.max(0.0)),
            Activation::Linear => z.clone(),
        }
    }

    fn derivative(self, z: &Array2<f64>) -> Array2<f64> {
        match self {
            Activation::Relu => z.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => Array2::ones(z.raw_dim()),
        }
    }
}

#[derive(Debug, Clone)]
struct Layer {
    weights: Array2<f64>,
    bias: Array1<f64>,
    activation: Activation,
    noisy: bool,
}

/// Whole-network parameter snapshot, portable across estimator instances
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkParameters {
    pub layers: Vec<LayerParameters>,
}

/// One layer's weights in row-major order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerParameters {
    pub rows: usize,
    pub cols: usize,
    pub weights: Vec<f64>,
    pub bias: Vec<f64>,
}

impl NetworkParameters {
    /// True when both snapshots describe the same architecture
    pub fn shape_matches(&self, other: &NetworkParameters) -> bool {
        self.layers.len() == other.layers.len()
            && self
                .layers
                .iter()
                .zip(&other.layers)
                .all(|(a, b)| a.rows == b.rows && a.cols == b.cols)
    }
}

/// Activations captured during a forward pass, for backpropagation
struct ForwardPass {
    pre: Vec<Array2<f64>>,
    post: Vec<Array2<f64>>,
    effective_weights: Vec<Array2<f64>>,
}

/// Three-layer perceptron with one noisy hidden layer
pub struct MlpEstimator {
    layers: Vec<Layer>,
    config: ModelConfig,
    input_len: usize,
    n_actions: usize,
    rng: SmallRng,
}

impl MlpEstimator {
    pub fn new(input_len: usize, n_actions: usize, config: ModelConfig) -> Self {
        let mut rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_entropy(),
        };

        let h = config.hidden_units.max(1);
        let layers = vec![
            Self::init_layer(input_len, h, Activation::Relu, false, &mut rng),
            Self::init_layer(h, h, Activation::Relu, true, &mut rng),
            Self::init_layer(h, n_actions, Activation::Linear, false, &mut rng),
        ];

        Self {
            layers,
            config,
            input_len,
            n_actions,
            rng,
        }
    }

    fn init_layer(
        fan_in: usize,
        fan_out: usize,
        activation: Activation,
        noisy: bool,
        rng: &mut SmallRng,
    ) -> Layer {
        // He initialization for relu layers, Glorot for the linear head
        let std = match activation {
            Activation::Relu => (2.0 / fan_in as f64).sqrt(),
            Activation::Linear => (2.0 / (fan_in + fan_out) as f64).sqrt(),
        };
        let dist = Normal::new(0.0, std).unwrap_or_else(|_| Normal::new(0.0, 0.01).unwrap());

        Layer {
            weights: Array2::from_shape_fn((fan_in, fan_out), |_| dist.sample(rng)),
            bias: Array1::zeros(fan_out),
            activation,
            noisy,
        }
    }

    pub fn input_len(&self) -> usize {
        self.input_len
    }

    pub fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn forward(&mut self, states: ArrayView2<f64>) -> Result<ForwardPass> {
        if states.ncols() != self.input_len {
            bail!(
                "Input width mismatch: expected {}, got {}",
                self.input_len,
                states.ncols()
            );
        }

        let noise = Normal::new(0.0, self.config.noise_scale)
            .context("Invalid noise scale")?;

        let mut pre = Vec::with_capacity(self.layers.len());
        let mut post = Vec::with_capacity(self.layers.len());
        let mut effective_weights = Vec::with_capacity(self.layers.len());
        let mut activation = states.to_owned();

        for layer in &self.layers {
            let (weights, bias) = if layer.noisy && self.config.noise_scale > 0.0 {
                let w = layer.weights.mapv(|v| v + noise.sample(&mut self.rng));
                let b = layer.bias.mapv(|v| v + noise.sample(&mut self.rng));
                (w, b)
            } else {
                (layer.weights.clone(), layer.bias.clone())
            };

            let mut z = activation.dot(&weights);
            z += &bias;
            let out = layer.activation.apply(&z);

            pre.push(z);
            effective_weights.push(weights);
            activation = out.clone();
            post.push(out);
        }

        let output = post.last().map(|o| o.iter().all(|v| v.is_finite()));
        if output != Some(true) {
            bail!("Estimator produced non-finite action values");
        }

        Ok(ForwardPass {
            pre,
            post,
            effective_weights,
        })
    }
}

#[async_trait]
impl ValueEstimator for MlpEstimator {
    async fn predict<'a>(&mut self, states: ArrayView2<'a, f64>) -> Result<Array2<f64>> {
        let pass = self.forward(states)?;
        Ok(pass.post.into_iter().last().unwrap_or_default())
    }

    async fn train<'a>(
        &mut self,
        states: ArrayView2<'a, f64>,
        targets: ArrayView2<'a, f64>,
        sample_weights: &[f64],
    ) -> Result<f64> {
        if targets.nrows() != states.nrows() || targets.ncols() != self.n_actions {
            bail!(
                "Target shape mismatch: expected {}x{}, got {}x{}",
                states.nrows(),
                self.n_actions,
                targets.nrows(),
                targets.ncols()
            );
        }
        if sample_weights.len() != states.nrows() {
            bail!(
                "Sample weight count mismatch: expected {}, got {}",
                states.nrows(),
                sample_weights.len()
            );
        }

        let pass = self.forward(states)?;
        let prediction = pass.post.last().cloned().unwrap_or_default();
        let diff = &prediction - &targets;

        let delta = self.config.huber_delta;
        let batch = states.nrows() as f64;
        let scale = 1.0 / (batch * self.n_actions as f64);

        // Weighted Huber loss
        let mut loss = 0.0;
        for (i, row) in diff.outer_iter().enumerate() {
            let w = sample_weights[i];
            for d in row {
                let abs = d.abs();
                let term = if abs <= delta {
                    0.5 * d * d
                } else {
                    delta * (abs - 0.5 * delta)
                };
                loss += w * term * scale;
            }
        }

        // Gradient of the loss w.r.t. the prediction
        let mut grad = diff.mapv(|d| d.clamp(-delta, delta));
        for (i, mut row) in grad.outer_iter_mut().enumerate() {
            row.mapv_inplace(|g| g * sample_weights[i] * scale);
        }

        // Backpropagate through the layers; noisy perturbations used in the
        // forward pass stay in the chain, updates land on the base weights
        let last = self.layers.len() - 1;
        let mut grad_z = &grad * &self.layers[last].activation.derivative(&pass.pre[last]);
        for layer_idx in (0..self.layers.len()).rev() {
            let input: ArrayView2<f64> = if layer_idx == 0 {
                states.view()
            } else {
                pass.post[layer_idx - 1].view()
            };

            let grad_w = input.t().dot(&grad_z);
            let grad_b = grad_z.sum_axis(Axis(0));

            if layer_idx > 0 {
                let upstream = grad_z.dot(&pass.effective_weights[layer_idx].t());
                grad_z = &upstream
                    * &self.layers[layer_idx - 1]
                        .activation
                        .derivative(&pass.pre[layer_idx - 1]);
            }

            let clip = self.config.grad_clip;
            let lr = self.config.learning_rate;
            let layer = &mut self.layers[layer_idx];
            layer
                .weights
                .zip_mut_with(&grad_w, |w, g| *w -= lr * g.clamp(-clip, clip));
            layer
                .bias
                .zip_mut_with(&grad_b, |b, g| *b -= lr * g.clamp(-clip, clip));
        }

        Ok(loss)
    }

    fn parameters(&self) -> NetworkParameters {
        NetworkParameters {
            layers: self
                .layers
                .iter()
                .map(|layer| LayerParameters {
                    rows: layer.weights.nrows(),
                    cols: layer.weights.ncols(),
                    weights: layer.weights.iter().copied().collect(),
                    bias: layer.bias.to_vec(),
                })
                .collect(),
        }
    }

    async fn set_parameters(&mut self, parameters: &NetworkParameters) -> Result<()> {
        if parameters.layers.len() != self.layers.len() {
            bail!(
                "Architecture mismatch: expected {} layers, got {}",
                self.layers.len(),
                parameters.layers.len()
            );
        }

        for (layer, params) in self.layers.iter().zip(&parameters.layers) {
            if layer.weights.nrows() != params.rows || layer.weights.ncols() != params.cols {
                bail!(
                    "Layer shape mismatch: expected {}x{}, got {}x{}",
                    layer.weights.nrows(),
                    layer.weights.ncols(),
                    params.rows,
                    params.cols
                );
            }
            if params.weights.len() != params.rows * params.cols
                || params.bias.len() != params.cols
            {
                bail!("Layer parameter data does not match its declared shape");
            }
        }

        for (layer, params) in self.layers.iter_mut().zip(&parameters.layers) {
            layer.weights =
                Array2::from_shape_vec((params.rows, params.cols), params.weights.clone())
                    .context("Failed to restore layer weights")?;
            layer.bias = Array1::from_vec(params.bias.clone());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn quiet_config() -> ModelConfig {
        ModelConfig {
            hidden_units: 16,
            noise_scale: 0.0,
            learning_rate: 0.05,
            seed: Some(9),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_predict_shape() {
        let mut net = MlpEstimator::new(4, 3, quiet_config());
        let states = Array2::zeros((5, 4));
        let out = net.predict(states.view()).await.unwrap();
        assert_eq!(out.dim(), (5, 3));
    }

    #[tokio::test]
    async fn test_predict_rejects_wrong_width() {
        let mut net = MlpEstimator::new(4, 3, quiet_config());
        let states = Array2::zeros((2, 7));
        assert!(net.predict(states.view()).await.is_err());
    }

    #[tokio::test]
    async fn test_training_reduces_loss() {
        let mut net = MlpEstimator::new(2, 2, quiet_config());
        let states = array![[0.0, 1.0], [1.0, 0.0], [0.5, 0.5]];
        let targets = array![[1.0, -1.0], [-1.0, 1.0], [0.0, 0.0]];
        let weights = vec![1.0; 3];

        let first = net
            .train(states.view(), targets.view(), &weights)
            .await
            .unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = net
                .train(states.view(), targets.view(), &weights)
                .await
                .unwrap();
        }
        assert!(last < first, "loss did not drop: {} -> {}", first, last);
    }

    #[tokio::test]
    async fn test_noisy_layer_perturbs_predictions() {
        let config = ModelConfig {
            noise_scale: 0.5,
            seed: Some(9),
            hidden_units: 16,
            ..Default::default()
        };
        let mut net = MlpEstimator::new(3, 2, config);
        let states = array![[0.3, 0.6, 0.9]];

        let a = net.predict(states.view()).await.unwrap();
        let b = net.predict(states.view()).await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_zero_noise_is_deterministic() {
        let mut net = MlpEstimator::new(3, 2, quiet_config());
        let states = array![[0.3, 0.6, 0.9]];

        let a = net.predict(states.view()).await.unwrap();
        let b = net.predict(states.view()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_parameter_round_trip() {
        let mut source = MlpEstimator::new(4, 3, quiet_config());
        let mut sink = MlpEstimator::new(
            4,
            3,
            ModelConfig {
                seed: Some(1234),
                ..quiet_config()
            },
        );

        sink.set_parameters(&source.parameters()).await.unwrap();

        let states = array![[0.1, 0.2, 0.3, 0.4]];
        assert_eq!(
            source.predict(states.view()).await.unwrap(),
            sink.predict(states.view()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_set_parameters_rejects_shape_mismatch() {
        let source = MlpEstimator::new(4, 3, quiet_config());
        let mut other = MlpEstimator::new(5, 3, quiet_config());
        assert!(other.set_parameters(&source.parameters()).await.is_err());
    }

    #[test]
    fn test_shape_matches() {
        let a = MlpEstimator::new(4, 3, quiet_config()).parameters();
        let b = MlpEstimator::new(4, 3, quiet_config()).parameters();
        let c = MlpEstimator::new(6, 3, quiet_config()).parameters();
        assert!(a.shape_matches(&b));
        assert!(!a.shape_matches(&c));
    }

    #[tokio::test]
    async fn test_training_stays_finite_on_large_targets() {
        let mut net = MlpEstimator::new(2, 2, quiet_config());
        let states = array![[1.0, -1.0]];
        let targets = array![[1e6, -1e6]];

        for _ in 0..50 {
            net.train(states.view(), targets.view(), &[1.0])
                .await
                .unwrap();
        }
        let out = net.predict(states.view()).await.unwrap();
        assert!(out.iter().all(|v| v.is_finite()));
    }
}
