//! Small feed-forward network: one tanh hidden layer and a linear output,
//! trained with mini-batch Adam on squared error plus L2 weight decay.
//!
//! Parameters are stored flat:
//! `[w1 (hidden x input) | b1 (hidden) | w2 (hidden) | b2]`.

use rand::seq::SliceRandom;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{
    check_training_set, f64_param, usize_param, warn_unknown_keys, Algorithm, Hyperparameters,
    ModelError, Trainable,
};

const KNOWN_KEYS: &[&str] = &["hidden_units", "learning_rate", "epochs", "batch_size", "l2"];
const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlpRegressor {
    pub hidden_units: usize,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub l2: f64,
    pub seed: u64,
    input_dim: usize,
    params: Vec<f64>,
}

impl MlpRegressor {
    pub fn from_hyperparameters(h: &Hyperparameters, seed: u64) -> Result<Self, ModelError> {
        warn_unknown_keys(h, Algorithm::NeuralNet, KNOWN_KEYS);
        let l2 = match h.get("l2") {
            Some(&v) if !v.is_finite() || v < 0.0 => {
                return Err(ModelError::InvalidHyperparameter { name: "l2", value: v })
            }
            Some(&v) => v,
            None => 1e-4,
        };
        Ok(Self {
            hidden_units: usize_param(h, "hidden_units", 16, 1, 1_024)?,
            learning_rate: f64_param(h, "learning_rate", 0.01, 0.0, 1.0)?,
            epochs: usize_param(h, "epochs", 200, 1, 100_000)?,
            batch_size: usize_param(h, "batch_size", 32, 1, 1_000_000)?,
            l2,
            seed,
            input_dim: 0,
            params: Vec::new(),
        })
    }

    fn layout(&self) -> (usize, usize, usize, usize) {
        let w1 = self.hidden_units * self.input_dim;
        let b1 = w1;
        let w2 = b1 + self.hidden_units;
        let b2 = w2 + self.hidden_units;
        (w1, b1, w2, b2)
    }

    fn param_count(&self) -> usize {
        self.hidden_units * self.input_dim + 2 * self.hidden_units + 1
    }

    /// Forward pass writing hidden activations into `hidden`.
    fn forward(&self, x: &[f64], hidden: &mut [f64]) -> f64 {
        let (_, b1, w2, b2) = self.layout();
        let d = self.input_dim;
        let mut out = self.params[b2];
        for j in 0..self.hidden_units {
            let row = &self.params[j * d..(j + 1) * d];
            let z = self.params[b1 + j] + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>();
            let h = z.tanh();
            hidden[j] = h;
            out += self.params[w2 + j] * h;
        }
        out
    }
}

impl Trainable for MlpRegressor {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError> {
        let dim = check_training_set(features, targets)?;
        let n = targets.len();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        self.input_dim = dim;
        let (w1_end, b1, w2, b2) = self.layout();
        let count = self.param_count();
        self.params = vec![0.0; count];

        // Xavier-uniform initialisation for both weight matrices.
        let limit1 = (6.0 / (dim + self.hidden_units) as f64).sqrt();
        for p in &mut self.params[..w1_end] {
            *p = rng.gen_range(-limit1..limit1);
        }
        let limit2 = (6.0 / (self.hidden_units + 1) as f64).sqrt();
        for p in &mut self.params[w2..b2] {
            *p = rng.gen_range(-limit2..limit2);
        }
        self.params[b2] = targets.iter().sum::<f64>() / n as f64;

        let mut m = vec![0.0; count];
        let mut v = vec![0.0; count];
        let mut grad = vec![0.0; count];
        let mut hidden = vec![0.0; self.hidden_units];
        let mut order: Vec<usize> = (0..n).collect();
        let mut step: i32 = 0;

        for _ in 0..self.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(self.batch_size.max(1)) {
                grad.iter_mut().for_each(|g| *g = 0.0);

                for &i in batch {
                    let x = &features[i];
                    let out = self.forward(x, &mut hidden);
                    let d_out = out - targets[i];

                    grad[b2] += d_out;
                    for j in 0..self.hidden_units {
                        let h = hidden[j];
                        grad[w2 + j] += d_out * h;
                        let d_hidden = d_out * self.params[w2 + j] * (1.0 - h * h);
                        grad[b1 + j] += d_hidden;
                        let row = j * dim;
                        for k in 0..dim {
                            grad[row + k] += d_hidden * x[k];
                        }
                    }
                }

                let scale = 1.0 / batch.len() as f64;
                step += 1;
                let bias1 = 1.0 - ADAM_BETA1.powi(step);
                let bias2 = 1.0 - ADAM_BETA2.powi(step);
                for idx in 0..count {
                    let mut g = grad[idx] * scale;
                    let is_weight = idx < w1_end || (idx >= w2 && idx < b2);
                    if is_weight {
                        g += self.l2 * self.params[idx];
                    }
                    m[idx] = ADAM_BETA1 * m[idx] + (1.0 - ADAM_BETA1) * g;
                    v[idx] = ADAM_BETA2 * v[idx] + (1.0 - ADAM_BETA2) * g * g;
                    let m_hat = m[idx] / bias1;
                    let v_hat = v[idx] / bias2;
                    self.params[idx] -= self.learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPS);
                }
            }
        }

        if self.params.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite("network weights"));
        }
        Ok(())
    }

    fn predict_one(&self, features: &[f64]) -> f64 {
        if self.params.is_empty() || features.len() != self.input_dim {
            return f64::NAN;
        }
        let mut hidden = vec![0.0; self.hidden_units];
        self.forward(features, &mut hidden)
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }
}
