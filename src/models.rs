use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ml::{Algorithm, Hyperparameters};

/// ShadowModel lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShadowStatus {
    Training,
    Validating,
    Promoted,
    Expired,
    Failed,
}

impl ShadowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShadowStatus::Training => "TRAINING",
            ShadowStatus::Validating => "VALIDATING",
            ShadowStatus::Promoted => "PROMOTED",
            ShadowStatus::Expired => "EXPIRED",
            ShadowStatus::Failed => "FAILED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ShadowStatus::Promoted | ShadowStatus::Expired | ShadowStatus::Failed
        )
    }

    /// Whether `self -> next` is a legal lifecycle step.
    pub fn can_transition_to(&self, next: ShadowStatus) -> bool {
        matches!(
            (self, next),
            (ShadowStatus::Training, ShadowStatus::Validating)
                | (ShadowStatus::Training, ShadowStatus::Failed)
                | (ShadowStatus::Validating, ShadowStatus::Promoted)
                | (ShadowStatus::Validating, ShadowStatus::Expired)
        )
    }
}

impl fmt::Display for ShadowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShadowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "TRAINING" => Ok(ShadowStatus::Training),
            "VALIDATING" => Ok(ShadowStatus::Validating),
            "PROMOTED" => Ok(ShadowStatus::Promoted),
            "EXPIRED" => Ok(ShadowStatus::Expired),
            "FAILED" => Ok(ShadowStatus::Failed),
            other => Err(format!("Unknown shadow status: {}", other)),
        }
    }
}

/// Why a shadow left VALIDATING without being promoted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    InsufficientSample,
    BelowMargin,
    NotSignificant,
    StaleValidation,
    PromotionFailed,
}

impl ExpiryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryReason::InsufficientSample => "insufficient_sample",
            ExpiryReason::BelowMargin => "below_margin",
            ExpiryReason::NotSignificant => "not_significant",
            ExpiryReason::StaleValidation => "stale_validation",
            ExpiryReason::PromotionFailed => "promotion_failed",
        }
    }
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A candidate model under evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowModel {
    pub id: String,
    pub algorithm: Algorithm,
    pub hyperparameters: Hyperparameters,
    pub model_path: String,
    pub scaler_path: String,
    pub artifact_digest: String,
    pub status: ShadowStatus,
    pub status_reason: Option<String>,
    pub train_score: Option<f64>,
    pub test_score: Option<f64>,
    pub validation_accuracy: Option<f64>,
    pub incumbent_accuracy: Option<f64>,
    pub joined_predictions: Option<i64>,
    pub p_value: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub validation_start: Option<DateTime<Utc>>,
    pub validation_end: Option<DateTime<Utc>>,
    pub promoted_at: Option<DateTime<Utc>>,
}

/// Insert payload for a freshly trained candidate.
#[derive(Debug, Clone)]
pub struct NewShadowModel {
    pub id: String,
    pub algorithm: Algorithm,
    pub hyperparameters: Hyperparameters,
    pub model_path: String,
    pub scaler_path: String,
    pub artifact_digest: String,
    pub train_score: f64,
    pub test_score: f64,
    pub created_at: DateTime<Utc>,
}

/// One shadow's parallel prediction for one live signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowPrediction {
    pub id: i64,
    pub shadow_model_id: String,
    pub signal_id: String,
    pub shadow_score: f64,
    pub incumbent_score: f64,
    pub actual_outcome: Option<f64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewShadowPrediction {
    pub shadow_model_id: String,
    pub signal_id: String,
    pub shadow_score: f64,
    pub incumbent_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Audit record for a candidate dropped by the overfit guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectedCandidate {
    pub id: String,
    pub algorithm: Algorithm,
    pub hyperparameters: Hyperparameters,
    pub train_score: f64,
    pub test_score: f64,
    pub overfit_gap: f64,
    pub rejected_at: DateTime<Utc>,
}

/// Scores written by the evaluator regardless of outcome.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationRecord {
    pub validation_accuracy: Option<f64>,
    pub incumbent_accuracy: Option<f64>,
    pub joined_predictions: usize,
    pub p_value: Option<f64>,
    pub validation_end: DateTime<Utc>,
}

/// Persisted generation marker of the canonical incumbent pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncumbentState {
    pub generation: u64,
    pub shadow_model_id: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// One labelled row from the training data provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub signal_id: String,
    pub features: Vec<f64>,
    /// Cost-adjusted success label (1.0 = success).
    pub label: f64,
    pub observed_at: DateTime<Utc>,
}

// =============================================================================
// Job reports
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainedCandidate {
    pub id: String,
    pub algorithm: Algorithm,
    pub train_score: f64,
    pub test_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailedCandidate {
    pub algorithm: Algorithm,
    pub error: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InsufficientData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingReport {
    pub rows: usize,
    pub trained: Vec<TrainedCandidate>,
    pub rejected: Vec<RejectedCandidate>,
    pub failed: Vec<FailedCandidate>,
    pub skipped_reason: Option<SkipReason>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: String,
    pub algorithm: Algorithm,
    pub shadow_accuracy: Option<f64>,
    pub incumbent_accuracy: Option<f64>,
    pub joined: usize,
    pub p_value: Option<f64>,
    pub promoted: bool,
    /// Expiry reason, or `None` when promoted or deferred.
    pub reason: Option<ExpiryReason>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupReport {
    pub models_removed: usize,
    pub predictions_removed: usize,
    pub files_removed: usize,
    pub rejections_removed: usize,
}

// =============================================================================
// Timestamp helpers (rows store Unix milliseconds)
// =============================================================================

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
