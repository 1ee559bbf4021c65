//! Bootstrap-aggregated CART trees with per-split feature subsampling.
//!
//! Trees are independent given their seed, so they are fitted in parallel on
//! the rayon pool. Tree `i` always uses seed `seed + i`, which keeps the forest
//! reproducible regardless of thread scheduling.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::{
    check_training_set, f64_param, usize_param, warn_unknown_keys, Algorithm, Hyperparameters,
    ModelError, RegressionTree, Trainable, TreeParams,
};

const KNOWN_KEYS: &[&str] = &[
    "n_estimators",
    "max_depth",
    "min_samples_leaf",
    "max_features",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Fraction of features considered at each split.
    pub max_features: f64,
    pub seed: u64,
    input_dim: usize,
    trees: Vec<RegressionTree>,
}

impl RandomForestRegressor {
    pub fn from_hyperparameters(h: &Hyperparameters, seed: u64) -> Result<Self, ModelError> {
        warn_unknown_keys(h, Algorithm::RandomForest, KNOWN_KEYS);
        Ok(Self {
            n_estimators: usize_param(h, "n_estimators", 100, 1, 5_000)?,
            max_depth: usize_param(h, "max_depth", 8, 1, 32)?,
            min_samples_leaf: usize_param(h, "min_samples_leaf", 1, 1, 100_000)?,
            max_features: f64_param(h, "max_features", 1.0, 0.0, 1.0)?,
            seed,
            input_dim: 0,
            trees: Vec::new(),
        })
    }

    pub fn tree_count(&self) -> usize {
        self.trees.len()
    }
}

impl Trainable for RandomForestRegressor {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError> {
        let dim = check_training_set(features, targets)?;
        let n = targets.len();
        let params = TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            max_features: Some(((dim as f64 * self.max_features).ceil() as usize).clamp(1, dim)),
        };
        let base_seed = self.seed;

        self.trees = (0..self.n_estimators)
            .into_par_iter()
            .map(|i| {
                let mut rng = ChaCha8Rng::seed_from_u64(base_seed.wrapping_add(i as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(features, targets, &bootstrap, &params, &mut rng)
            })
            .collect();
        self.input_dim = dim;
        Ok(())
    }

    fn predict_one(&self, features: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_one(features)).sum::<f64>() / self.trees.len() as f64
    }

    fn input_dim(&self) -> usize {
        self.input_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::r2_score;

    fn threshold_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..120)
            .map(|i| vec![(i as f64 / 10.0).sin(), i as f64 / 120.0])
            .collect();
        let y: Vec<f64> = x.iter().map(|r| (r[1] > 0.5) as u8 as f64).collect();
        (x, y)
    }

    #[test]
    fn test_forest_fits_threshold() {
        let (x, y) = threshold_data();
        let mut h = Hyperparameters::new();
        h.insert("n_estimators".into(), 30.0);
        let mut forest = RandomForestRegressor::from_hyperparameters(&h, 3).unwrap();
        forest.fit(&x, &y).unwrap();

        assert_eq!(forest.tree_count(), 30);
        assert!(r2_score(&y, &forest.predict(&x)) > 0.9);
    }

    #[test]
    fn test_parallel_fit_is_deterministic() {
        let (x, y) = threshold_data();
        let mut h = Hyperparameters::new();
        h.insert("n_estimators".into(), 16.0);
        h.insert("max_features".into(), 0.5);

        let mut a = RandomForestRegressor::from_hyperparameters(&h, 9).unwrap();
        let mut b = RandomForestRegressor::from_hyperparameters(&h, 9).unwrap();
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        for row in &x {
            assert_eq!(a.predict_one(row), b.predict_one(row));
        }
    }
}
