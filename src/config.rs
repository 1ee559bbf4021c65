//! Engine configuration
//!
//! Loaded from TOML (`--config` or `SHADOW_EVOLUTION_CONFIG`), then overridden
//! by environment variables. Every field has a default, so an empty file or no
//! file at all yields a runnable configuration.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::ml::CandidateSpec;
use crate::providers::OutcomeHorizon;

pub const CONFIG_PATH_ENV: &str = "SHADOW_EVOLUTION_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvolutionConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub evaluator: EvaluatorConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub janitor: JanitorConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Where state lives on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
    /// Labelled signals and realized outcomes written by the labelling pipeline.
    #[serde(default = "default_signal_db_path")]
    pub signal_db_path: PathBuf,
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/shadow_registry.db")
}
fn default_artifact_dir() -> PathBuf {
    PathBuf::from("data/models")
}
fn default_signal_db_path() -> PathBuf {
    PathBuf::from("data/signals.db")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            artifact_dir: default_artifact_dir(),
            signal_db_path: default_signal_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainerConfig {
    /// History window handed to the training data provider.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Below this many usable rows a run is skipped.
    #[serde(default = "default_min_training_rows")]
    pub min_training_rows: usize,
    /// Below this many rows the full set is used for both train and test.
    #[serde(default = "default_min_rows_for_holdout")]
    pub min_rows_for_holdout: usize,
    #[serde(default = "default_test_fraction")]
    pub test_fraction: f64,
    /// Maximum allowed `train_score - test_score`.
    #[serde(default = "default_overfit_threshold")]
    pub overfit_threshold: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "CandidateSpec::default_lineup")]
    pub candidates: Vec<CandidateSpec>,
}

fn default_lookback_days() -> u32 {
    90
}
fn default_min_training_rows() -> usize {
    50
}
fn default_min_rows_for_holdout() -> usize {
    100
}
fn default_test_fraction() -> f64 {
    0.2
}
fn default_overfit_threshold() -> f64 {
    0.25
}
fn default_seed() -> u64 {
    42
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            min_training_rows: default_min_training_rows(),
            min_rows_for_holdout: default_min_rows_for_holdout(),
            test_fraction: default_test_fraction(),
            overfit_threshold: default_overfit_threshold(),
            seed: default_seed(),
            candidates: CandidateSpec::default_lineup(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_validation_window_hours")]
    pub validation_window_hours: u64,
    #[serde(default = "default_min_predictions_for_eval")]
    pub min_predictions_for_eval: usize,
    /// Absolute accuracy improvement required over the incumbent.
    #[serde(default = "default_promotion_margin")]
    pub promotion_margin: f64,
    #[serde(default)]
    pub outcome_horizon: OutcomeHorizon,
    /// Optional McNemar p-value bound; unset means the margin alone decides.
    #[serde(default)]
    pub max_p_value: Option<f64>,
}

fn default_validation_window_hours() -> u64 {
    72
}
fn default_min_predictions_for_eval() -> usize {
    20
}
fn default_promotion_margin() -> f64 {
    0.02
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            validation_window_hours: default_validation_window_hours(),
            min_predictions_for_eval: default_min_predictions_for_eval(),
            promotion_margin: default_promotion_margin(),
            outcome_horizon: OutcomeHorizon::default(),
            max_p_value: None,
        }
    }
}

impl EvaluatorConfig {
    pub fn validation_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.validation_window_hours as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_recorder_workers")]
    pub workers: usize,
}

fn default_queue_capacity() -> usize {
    4096
}
fn default_recorder_workers() -> usize {
    2
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            workers: default_recorder_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorConfig {
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_retention_days() -> u32 {
    14
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_train_interval_hours")]
    pub train_interval_hours: u64,
    #[serde(default = "default_evaluate_interval_minutes")]
    pub evaluate_interval_minutes: u64,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
}

fn default_train_interval_hours() -> u64 {
    24
}
fn default_evaluate_interval_minutes() -> u64 {
    60
}
fn default_cleanup_interval_hours() -> u64 {
    24
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            train_interval_hours: default_train_interval_hours(),
            evaluate_interval_minutes: default_evaluate_interval_minutes(),
            cleanup_interval_hours: default_cleanup_interval_hours(),
        }
    }
}

impl EvolutionConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the effective configuration: explicit path, then
    /// `SHADOW_EVOLUTION_CONFIG`, then defaults; env overrides applied last.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from));
        let mut config = match path {
            Some(p) => Self::load(&p)?,
            None => {
                tracing::debug!("No config file given, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `SHADOW_*` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SHADOW_DB_PATH") {
            self.storage.database_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHADOW_ARTIFACT_DIR") {
            self.storage.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHADOW_SIGNAL_DB_PATH") {
            self.storage.signal_db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("SHADOW_VALIDATION_WINDOW_HOURS") {
            self.evaluator.validation_window_hours = v
                .trim()
                .parse()
                .with_context(|| format!("SHADOW_VALIDATION_WINDOW_HOURS={}", v))?;
        }
        if let Some(v) = lookup("SHADOW_RETENTION_DAYS") {
            self.janitor.retention_days = v
                .trim()
                .parse()
                .with_context(|| format!("SHADOW_RETENTION_DAYS={}", v))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let t = &self.trainer;
        if t.candidates.is_empty() {
            bail!("trainer.candidates must not be empty");
        }
        if !(t.test_fraction > 0.0 && t.test_fraction <= 0.5) {
            bail!("trainer.test_fraction must be in (0, 0.5], got {}", t.test_fraction);
        }
        if !(t.overfit_threshold > 0.0) {
            bail!("trainer.overfit_threshold must be > 0, got {}", t.overfit_threshold);
        }
        if t.min_training_rows == 0 {
            bail!("trainer.min_training_rows must be > 0");
        }

        let e = &self.evaluator;
        if e.validation_window_hours == 0 {
            bail!("evaluator.validation_window_hours must be > 0");
        }
        if !(e.promotion_margin >= 0.0 && e.promotion_margin < 1.0) {
            bail!("evaluator.promotion_margin must be in [0, 1), got {}", e.promotion_margin);
        }
        if e.min_predictions_for_eval == 0 {
            bail!("evaluator.min_predictions_for_eval must be > 0");
        }
        if let Some(p) = e.max_p_value {
            if !(p > 0.0 && p <= 1.0) {
                bail!("evaluator.max_p_value must be in (0, 1], got {}", p);
            }
        }

        if self.recorder.queue_capacity == 0 || self.recorder.workers == 0 {
            bail!("recorder.queue_capacity and recorder.workers must be > 0");
        }
        if self.janitor.retention_days == 0 {
            bail!("janitor.retention_days must be > 0");
        }
        let s = &self.schedule;
        if s.train_interval_hours == 0 || s.evaluate_interval_minutes == 0 || s.cleanup_interval_hours == 0 {
            bail!("schedule intervals must be > 0");
        }
        Ok(())
    }
}
