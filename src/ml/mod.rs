//! Candidate Model Family
//!
//! Native regression models used as shadow candidates. Every model fits the
//! 0/1 cost-adjusted success label and its output is mapped onto the 0-10
//! production score scale by [`ScoringArtifact`].
//!
//! Algorithms are a closed set selected from a declarative [`CandidateSpec`]
//! list rather than by string dispatch:
//! - [`GradientBoostingRegressor`] - squared-loss boosting of CART trees
//! - [`RandomForestRegressor`] - bagged CART trees, fitted in parallel
//! - [`MlpRegressor`] - one hidden tanh layer trained with Adam

pub mod gradient_boosting;
pub mod neural_net;
pub mod random_forest;
pub mod scaler;
pub mod tree;

pub use gradient_boosting::GradientBoostingRegressor;
pub use neural_net::MlpRegressor;
pub use random_forest::RandomForestRegressor;
pub use scaler::StandardScaler;
pub use tree::{RegressionTree, TreeParams};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Lowest score the production scorer emits.
pub const SCORE_MIN: f64 = 0.0;
/// Highest score the production scorer emits.
pub const SCORE_MAX: f64 = 10.0;
/// Midpoint of the score range: `score >= DECISION_THRESHOLD` is a predicted win.
pub const DECISION_THRESHOLD: f64 = (SCORE_MIN + SCORE_MAX) / 2.0;

/// Hyperparameter name -> value.
pub type Hyperparameters = BTreeMap<String, f64>;

/// Candidate algorithm family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    GradientBoosting,
    RandomForest,
    NeuralNet,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::GradientBoosting => "gradient_boosting",
            Algorithm::RandomForest => "random_forest",
            Algorithm::NeuralNet => "neural_net",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "gradient_boosting" | "gradient-boosting" | "gbm" => Ok(Algorithm::GradientBoosting),
            "random_forest" | "random-forest" | "rf" => Ok(Algorithm::RandomForest),
            "neural_net" | "neural-net" | "mlp" => Ok(Algorithm::NeuralNet),
            other => Err(format!("Unknown algorithm: {}", other)),
        }
    }
}

/// One entry of the declarative candidate list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSpec {
    pub algorithm: Algorithm,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl CandidateSpec {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            algorithm,
            hyperparameters: Hyperparameters::new(),
        }
    }

    pub fn with(mut self, key: &str, value: f64) -> Self {
        self.hyperparameters.insert(key.to_string(), value);
        self
    }

    /// The default nightly line-up: one candidate per algorithm family.
    pub fn default_lineup() -> Vec<CandidateSpec> {
        vec![
            CandidateSpec::new(Algorithm::GradientBoosting)
                .with("n_estimators", 100.0)
                .with("learning_rate", 0.05)
                .with("max_depth", 3.0)
                .with("min_samples_leaf", 5.0)
                .with("subsample", 0.8),
            CandidateSpec::new(Algorithm::RandomForest)
                .with("n_estimators", 100.0)
                .with("max_depth", 6.0)
                .with("min_samples_leaf", 5.0)
                .with("max_features", 0.5),
            CandidateSpec::new(Algorithm::NeuralNet)
                .with("hidden_units", 16.0)
                .with("learning_rate", 0.01)
                .with("epochs", 200.0)
                .with("batch_size", 32.0)
                .with("l2", 0.0001),
        ]
    }
}

/// Capability shared by every candidate algorithm.
pub trait Trainable: Send + Sync {
    /// Fit on row-major features and their targets.
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError>;

    /// Predict a single (already scaled) feature vector.
    fn predict_one(&self, features: &[f64]) -> f64;

    fn predict(&self, features: &[Vec<f64>]) -> Vec<f64> {
        features.iter().map(|row| self.predict_one(row)).collect()
    }

    /// Input dimension seen at fit time (0 before fitting).
    fn input_dim(&self) -> usize;
}

/// A trained or trainable candidate model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum Model {
    GradientBoosting(GradientBoostingRegressor),
    RandomForest(RandomForestRegressor),
    NeuralNet(MlpRegressor),
}

impl Model {
    /// Build an unfitted model for a candidate spec.
    pub fn from_spec(spec: &CandidateSpec, seed: u64) -> Result<Self, ModelError> {
        let h = &spec.hyperparameters;
        Ok(match spec.algorithm {
            Algorithm::GradientBoosting => {
                Model::GradientBoosting(GradientBoostingRegressor::from_hyperparameters(h, seed)?)
            }
            Algorithm::RandomForest => {
                Model::RandomForest(RandomForestRegressor::from_hyperparameters(h, seed)?)
            }
            Algorithm::NeuralNet => Model::NeuralNet(MlpRegressor::from_hyperparameters(h, seed)?),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Model::GradientBoosting(_) => Algorithm::GradientBoosting,
            Model::RandomForest(_) => Algorithm::RandomForest,
            Model::NeuralNet(_) => Algorithm::NeuralNet,
        }
    }

    fn inner(&self) -> &dyn Trainable {
        match self {
            Model::GradientBoosting(m) => m,
            Model::RandomForest(m) => m,
            Model::NeuralNet(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Trainable {
        match self {
            Model::GradientBoosting(m) => m,
            Model::RandomForest(m) => m,
            Model::NeuralNet(m) => m,
        }
    }
}

impl Trainable for Model {
    fn fit(&mut self, features: &[Vec<f64>], targets: &[f64]) -> Result<(), ModelError> {
        self.inner_mut().fit(features, targets)
    }

    fn predict_one(&self, features: &[f64]) -> f64 {
        self.inner().predict_one(features)
    }

    fn input_dim(&self) -> usize {
        self.inner().input_dim()
    }
}

/// A model together with the scaler it was trained behind.
#[derive(Debug, Clone)]
pub struct ScoringArtifact {
    pub model: Model,
    pub scaler: StandardScaler,
}

impl ScoringArtifact {
    pub fn new(model: Model, scaler: StandardScaler) -> Self {
        Self { model, scaler }
    }

    /// Raw model output for an unscaled feature vector.
    pub fn raw_prediction(&self, features: &[f64]) -> Result<f64, ModelError> {
        let scaled = self.scaler.transform_one(features)?;
        if self.model.input_dim() != scaled.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.model.input_dim(),
                got: scaled.len(),
            });
        }
        let raw = self.model.predict_one(&scaled);
        if !raw.is_finite() {
            return Err(ModelError::NonFinite("prediction"));
        }
        Ok(raw)
    }

    /// Score on the production 0-10 scale.
    pub fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        Ok(to_score(self.raw_prediction(features)?))
    }
}

/// Map a success-probability estimate onto the clamped score scale.
pub fn to_score(raw: f64) -> f64 {
    (raw * SCORE_MAX).clamp(SCORE_MIN, SCORE_MAX)
}

/// Coefficient of determination.
///
/// Constant targets score 1.0 when reproduced exactly and 0.0 otherwise.
pub fn r2_score(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let mean = actual[..n].iter().sum::<f64>() / n as f64;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for i in 0..n {
        ss_res += (actual[i] - predicted[i]).powi(2);
        ss_tot += (actual[i] - mean).powi(2);
    }
    if ss_tot <= f64::EPSILON {
        return if ss_res <= f64::EPSILON { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Validate a feature matrix against its targets, returning the column count.
pub(crate) fn check_training_set(features: &[Vec<f64>], targets: &[f64]) -> Result<usize, ModelError> {
    if features.is_empty() {
        return Err(ModelError::EmptyDataset);
    }
    if features.len() != targets.len() {
        return Err(ModelError::DimensionMismatch {
            expected: features.len(),
            got: targets.len(),
        });
    }
    let dim = features[0].len();
    if dim == 0 {
        return Err(ModelError::EmptyDataset);
    }
    for row in features {
        if row.len() != dim {
            return Err(ModelError::DimensionMismatch {
                expected: dim,
                got: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("feature"));
        }
    }
    if targets.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite("target"));
    }
    Ok(dim)
}

/// Read an integer-valued hyperparameter within `[min, max]`.
pub(crate) fn usize_param(
    h: &Hyperparameters,
    key: &'static str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ModelError> {
    let Some(&value) = h.get(key) else {
        return Ok(default);
    };
    if !value.is_finite() || value.fract() != 0.0 || value < min as f64 || value > max as f64 {
        return Err(ModelError::InvalidHyperparameter { name: key, value });
    }
    Ok(value as usize)
}

/// Read a real-valued hyperparameter within `(min_exclusive, max]`.
pub(crate) fn f64_param(
    h: &Hyperparameters,
    key: &'static str,
    default: f64,
    min_exclusive: f64,
    max: f64,
) -> Result<f64, ModelError> {
    let Some(&value) = h.get(key) else {
        return Ok(default);
    };
    if !value.is_finite() || value <= min_exclusive || value > max {
        return Err(ModelError::InvalidHyperparameter { name: key, value });
    }
    Ok(value)
}

/// Warn about keys a model does not understand.
pub(crate) fn warn_unknown_keys(h: &Hyperparameters, algorithm: Algorithm, known: &[&str]) {
    for key in h.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(%algorithm, key = %key, "Ignoring unknown hyperparameter");
        }
    }
}

/// Errors raised while fitting or applying a model.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    EmptyDataset,
    DimensionMismatch { expected: usize, got: usize },
    InvalidHyperparameter { name: &'static str, value: f64 },
    NonFinite(&'static str),
    NotFitted,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyDataset => write!(f, "Empty training set"),
            Self::DimensionMismatch { expected, got } => {
                write!(f, "Dimension mismatch: expected {}, got {}", expected, got)
            }
            Self::InvalidHyperparameter { name, value } => {
                write!(f, "Invalid hyperparameter {} = {}", name, value)
            }
            Self::NonFinite(what) => write!(f, "Non-finite {}", what),
            Self::NotFitted => write!(f, "Model has not been fitted"),
        }
    }
}

impl std::error::Error for ModelError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_round_trips_through_str() {
        for algo in [
            Algorithm::GradientBoosting,
            Algorithm::RandomForest,
            Algorithm::NeuralNet,
        ] {
            assert_eq!(algo.as_str().parse::<Algorithm>().unwrap(), algo);
        }
        assert!("svm".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_score_is_clamped() {
        assert_eq!(to_score(-0.3), SCORE_MIN);
        assert_eq!(to_score(1.7), SCORE_MAX);
        assert!((to_score(0.62) - 6.2).abs() < 1e-12);
        assert_eq!(DECISION_THRESHOLD, 5.0);
    }

    #[test]
    fn test_r2_score() {
        let y = [1.0, 0.0, 1.0, 0.0];
        assert!((r2_score(&y, &y) - 1.0).abs() < 1e-12);
        assert!(r2_score(&y, &[0.5; 4]).abs() < 1e-12);
        assert!(r2_score(&y, &[0.0, 1.0, 0.0, 1.0]) < 0.0);
        assert_eq!(r2_score(&[1.0, 1.0], &[1.0, 1.0]), 1.0);
        assert_eq!(r2_score(&[1.0, 1.0], &[0.0, 1.0]), 0.0);
    }

    #[test]
    fn test_invalid_hyperparameter_rejected() {
        let spec = CandidateSpec::new(Algorithm::GradientBoosting).with("max_depth", 0.0);
        let err = Model::from_spec(&spec, 1).unwrap_err();
        assert!(matches!(
            err,
            ModelError::InvalidHyperparameter { name: "max_depth", .. }
        ));
    }

    #[test]
    fn test_model_serde_is_tagged_by_algorithm() {
        let model = Model::from_spec(&CandidateSpec::new(Algorithm::RandomForest), 7).unwrap();
        let json = serde_json::to_value(&model).unwrap();
        assert_eq!(json["algorithm"], "random_forest");
        let back: Model = serde_json::from_value(json).unwrap();
        assert_eq!(back.algorithm(), Algorithm::RandomForest);
    }

    #[test]
    fn test_scoring_artifact_rejects_wrong_dimension() {
        let features = vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![0.5, 0.5]];
        let targets = vec![0.0, 1.0, 0.5];
        let scaler = StandardScaler::fit(&features).unwrap();
        let scaled = scaler.transform(&features).unwrap();
        let mut model = Model::from_spec(
            &CandidateSpec::new(Algorithm::GradientBoosting).with("n_estimators", 5.0),
            3,
        )
        .unwrap();
        model.fit(&scaled, &targets).unwrap();
        let artifact = ScoringArtifact::new(model, scaler);

        assert!(artifact.score(&[0.2, 0.8]).is_ok());
        assert!(matches!(
            artifact.score(&[0.2, 0.8, 0.1]),
            Err(ModelError::DimensionMismatch { .. })
        ));
    }
}
