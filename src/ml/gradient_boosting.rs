//! Squared-loss gradient boosting over CART regression trees.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{
    check_training_set, f64_param, usize_param, warn_unknown_keys, Algorithm, Hyperparameters,
    ModelError, RegressionTree, Trainable, TreeParams,
};

const KNOWN_KEYS: &[&str] = &[
    "n_estimators",
    "learning_rate",
    "max_depth",
    "min_samples_leaf",
    "subsample",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBoostingRegressor {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub tree_params: TreeParams,
    /// Fraction of rows drawn (without replacement) for each stage.
    pub subsample: f64,
    pub seed: u64,
    init: f64,
    input_dim: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostingRegressor {
    pub fn from_hyperparameters(h: &Hyperparameters, seed: u64) -> Result<Self, ModelError> {
        warn_unknown_keys(h, Algorithm::GradientBoosting, KNOWN_KEYS);
        Ok(Self {
            n_estimators: usize_param(h, "n_estimators", 100, 1, 5_000)?,
            learning_rate: f64_param(h, "learning_rate", 0.05, 0.0, 1.0)?,
            tree_params: TreeParams {
                max_depth: usize_param(h, "max_depth", 3, 1, 32)?,
                min_samples_leaf: usize_param(h, "min_samples_leaf", 1, 1, 100_000)?,
                max_features: None,
            },
            subsample: f64_param(h, "subsample", 1.0, 0.0, 1.0)?,
            seed,
            init: 0.0,
            input_dim: 0,
            trees: Vec::new(),
        })
    }

    pub fn stages(&self) -> usize {
        self.trees.len()
    }
}

impl Trainable for GradientBoostingRegressor {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError> {
        let dim = check_training_set(features, targets)?;
        let n = targets.len();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        self.input_dim = dim;
        self.init = targets.iter().sum::<f64>() / n as f64;
        self.trees = Vec::with_capacity(self.n_estimators);

        let mut current = vec![self.init; n];
        let mut residuals = vec![0.0; n];
        let mut all_rows: Vec<usize> = (0..n).collect();
        let sample_size = ((n as f64 * self.subsample).round() as usize).clamp(1, n);

        for _ in 0..self.n_estimators {
            for i in 0..n {
                residuals[i] = targets[i] - current[i];
            }

            let rows: &[usize] = if sample_size < n {
                all_rows.shuffle(&mut rng);
                &all_rows[..sample_size]
            } else {
                &all_rows
            };

            let tree = RegressionTree::fit(features, &residuals, rows, &self.tree_params, &mut rng);
            for (i, row) in features.iter().enumerate() {
                current[i] += self.learning_rate * tree.predict_one(row);
            }
            self.trees.push(tree);
        }

        if current.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("boosting stage output"));
        }
        Ok(())
    }

    fn predict_one(&self, features: &[f64]) -> f64 {
        self.init
            + self.learning_rate
                * self
                    .trees
                    .iter()
                    .map(|t| t.predict_one(features))
                    .sum::<f64>()
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }
}
