//! Candidate Trainer
//!
//! Fits the configured candidate line-up on one labelled history window,
//! drops overfit candidates and registers the survivors as VALIDATING shadows.
//!
//! A candidate only ever becomes a row after its artifacts are fully written,
//! and its artifacts are removed again if registration fails.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::artifacts::ArtifactStore;
use super::registry::ShadowRegistry;
use crate::config::TrainerConfig;
use crate::metrics::EvolutionMetrics;
use crate::ml::{r2_score, CandidateSpec, Model, ModelError, StandardScaler, Trainable};
use crate::models::{
    FailedCandidate, NewShadowModel, RejectedCandidate, SkipReason, TrainedCandidate,
    TrainingExample, TrainingReport,
};

/// Scaled train/test matrices shared by every candidate of one run.
struct PreparedData {
    scaler: StandardScaler,
    train_x: Vec<Vec<f64>>,
    train_y: Vec<f64>,
    test_x: Vec<Vec<f64>>,
    test_y: Vec<f64>,
}

struct FittedCandidate {
    model: Model,
    train_score: f64,
    test_score: f64,
}

pub struct CandidateTrainer {
    config: TrainerConfig,
    registry: ShadowRegistry,
    artifacts: Arc<ArtifactStore>,
    metrics: Arc<EvolutionMetrics>,
}

impl CandidateTrainer {
    pub fn new(
        config: TrainerConfig,
        registry: ShadowRegistry,
        artifacts: Arc<ArtifactStore>,
        metrics: Arc<EvolutionMetrics>,
    ) -> Self {
        Self {
            config,
            registry,
            artifacts,
            metrics,
        }
    }

    /// Train every configured candidate on `rows`.
    ///
    /// Too few usable rows is a skipped run, not an error. Per-candidate
    /// failures land in the report and never abort the batch.
    pub async fn train(&self, rows: Vec<TrainingExample>, now: DateTime<Utc>) -> Result<TrainingReport> {
        EvolutionMetrics::inc(&self.metrics.training_runs);

        let (rows, dropped) = sanitize_rows(rows);
        if dropped > 0 {
            warn!(dropped, "Dropped malformed training rows");
        }

        let mut report = TrainingReport {
            rows: rows.len(),
            ..Default::default()
        };
        if rows.len() < self.config.min_training_rows {
            info!(
                rows = rows.len(),
                required = self.config.min_training_rows,
                "Not enough labelled rows, skipping training run"
            );
            EvolutionMetrics::inc(&self.metrics.training_runs_skipped);
            report.skipped_reason = Some(SkipReason::InsufficientData);
            return Ok(report);
        }

        let data = Arc::new(prepare(&rows, &self.config)?);
        info!(
            rows = rows.len(),
            train = data.train_y.len(),
            test = data.test_y.len(),
            candidates = self.config.candidates.len(),
            "🧪 Training shadow candidates"
        );

        let handles: Vec<_> = self
            .config
            .candidates
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                let task_spec = spec.clone();
                let data = data.clone();
                let seed = self.config.seed.wrapping_add(i as u64);
                let handle =
                    tokio::task::spawn_blocking(move || fit_candidate(&task_spec, seed, &data));
                (spec.clone(), handle)
            })
            .collect();

        for (spec, handle) in handles {
            let fitted = match handle.await {
                Ok(Ok(fitted)) => fitted,
                Ok(Err(e)) => {
                    self.record_failure(&mut report, &spec, e.to_string());
                    continue;
                }
                Err(e) => {
                    self.record_failure(&mut report, &spec, format!("training task panicked: {}", e));
                    continue;
                }
            };

            let gap = fitted.train_score - fitted.test_score;
            if gap > self.config.overfit_threshold {
                self.record_rejection(&mut report, &spec, &fitted, gap, now);
                continue;
            }

            match self.persist_and_register(&spec, &fitted, &data.scaler, now) {
                Ok(trained) => {
                    EvolutionMetrics::inc(&self.metrics.candidates_trained);
                    info!(
                        shadow_id = %trained.id,
                        algorithm = %trained.algorithm,
                        train_score = trained.train_score,
                        test_score = trained.test_score,
                        "✅ Shadow candidate registered"
                    );
                    report.trained.push(trained);
                }
                Err(e) => self.record_failure(&mut report, &spec, e),
            }
        }

        info!(
            trained = report.trained.len(),
            rejected = report.rejected.len(),
            failed = report.failed.len(),
            "Training run finished"
        );
        Ok(report)
    }

    fn persist_and_register(
        &self,
        spec: &CandidateSpec,
        fitted: &FittedCandidate,
        scaler: &StandardScaler,
        now: DateTime<Utc>,
    ) -> std::result::Result<TrainedCandidate, String> {
        let paths = self
            .artifacts
            .persist_candidate(spec.algorithm, &fitted.model, scaler, now)
            .map_err(|e| format!("persisting artifacts: {}", e))?;

        let candidate = NewShadowModel {
            id: Uuid::new_v4().to_string(),
            algorithm: spec.algorithm,
            hyperparameters: spec.hyperparameters.clone(),
            model_path: paths.model_path.clone(),
            scaler_path: paths.scaler_path.clone(),
            artifact_digest: paths.digest.clone(),
            train_score: fitted.train_score,
            test_score: fitted.test_score,
            created_at: now,
        };

        if let Err(e) = self.registry.register_candidate(&candidate, now) {
            for name in [&paths.model_path, &paths.scaler_path] {
                if let Err(rm) = self.artifacts.remove(name) {
                    error!(path = %name, error = %rm, "Failed to remove unregistered artifact");
                }
            }
            return Err(format!("registering shadow: {}", e));
        }

        Ok(TrainedCandidate {
            id: candidate.id,
            algorithm: spec.algorithm,
            train_score: fitted.train_score,
            test_score: fitted.test_score,
        })
    }

    fn record_rejection(
        &self,
        report: &mut TrainingReport,
        spec: &CandidateSpec,
        fitted: &FittedCandidate,
        gap: f64,
        now: DateTime<Utc>,
    ) {
        let rejected = RejectedCandidate {
            id: Uuid::new_v4().to_string(),
            algorithm: spec.algorithm,
            hyperparameters: spec.hyperparameters.clone(),
            train_score: fitted.train_score,
            test_score: fitted.test_score,
            overfit_gap: gap,
            rejected_at: now,
        };
        if let Err(e) = self.registry.record_rejection(&rejected) {
            warn!(algorithm = %spec.algorithm, error = %e, "Failed to persist overfit rejection");
        }
        EvolutionMetrics::inc(&self.metrics.candidates_rejected);
        info!(
            algorithm = %spec.algorithm,
            train_score = fitted.train_score,
            test_score = fitted.test_score,
            gap,
            threshold = self.config.overfit_threshold,
            "Candidate rejected by overfit guard"
        );
        report.rejected.push(rejected);
    }

    fn record_failure(&self, report: &mut TrainingReport, spec: &CandidateSpec, error: String) {
        EvolutionMetrics::inc(&self.metrics.candidates_failed);
        warn!(algorithm = %spec.algorithm, error = %error, "Candidate failed");
        report.failed.push(FailedCandidate {
            algorithm: spec.algorithm,
            error,
        });
    }
}

/// Order rows chronologically and drop those that cannot be trained on.
/// Returns the kept rows and the number dropped.
pub(crate) fn sanitize_rows(mut rows: Vec<TrainingExample>) -> (Vec<TrainingExample>, usize) {
    rows.sort_by_key(|r| r.observed_at);
    let total = rows.len();
    let is_finite = |r: &TrainingExample| {
        r.label.is_finite() && !r.features.is_empty() && r.features.iter().all(|v| v.is_finite())
    };
    let dim = rows.iter().find(|r| is_finite(r)).map(|r| r.features.len());
    let kept: Vec<TrainingExample> = match dim {
        Some(dim) => rows
            .into_iter()
            .filter(|r| r.features.len() == dim && is_finite(r))
            .collect(),
        None => Vec::new(),
    };
    let dropped = total - kept.len();
    (kept, dropped)
}

/// Number of leading (oldest) rows that form the training split.
/// Equal to `n` when the set is too small for a hold-out.
pub(crate) fn train_len(n: usize, config: &TrainerConfig) -> usize {
    if n < config.min_rows_for_holdout || n < 2 {
        return n;
    }
    let test = ((n as f64) * config.test_fraction).round() as usize;
    n - test.clamp(1, n - 1)
}

fn prepare(rows: &[TrainingExample], config: &TrainerConfig) -> Result<PreparedData> {
    let n = rows.len();
    let cut = train_len(n, config);
    let (train_rows, test_rows) = if cut == n {
        (rows, rows)
    } else {
        rows.split_at(cut)
    };

    let raw_train: Vec<Vec<f64>> = train_rows.iter().map(|r| r.features.clone()).collect();
    let raw_test: Vec<Vec<f64>> = test_rows.iter().map(|r| r.features.clone()).collect();
    let scaler = StandardScaler::fit(&raw_train)?;

    Ok(PreparedData {
        train_x: scaler.transform(&raw_train)?,
        train_y: train_rows.iter().map(|r| r.label).collect(),
        test_x: scaler.transform(&raw_test)?,
        test_y: test_rows.iter().map(|r| r.label).collect(),
        scaler,
    })
}

fn fit_candidate(
    spec: &CandidateSpec,
    seed: u64,
    data: &PreparedData,
) -> std::result::Result<FittedCandidate, ModelError> {
    let mut model = Model::from_spec(spec, seed)?;
    model.fit(&data.train_x, &data.train_y)?;

    let train_score = r2_score(&data.train_y, &model.predict(&data.train_x));
    let test_score = r2_score(&data.test_y, &model.predict(&data.test_x));
    if !train_score.is_finite() || !test_score.is_finite() {
        return Err(ModelError::NonFinite("fit score"));
    }
    Ok(FittedCandidate {
        model,
        train_score,
        test_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::Algorithm;
    use chrono::Duration;

    fn rows(n: usize) -> Vec<TrainingExample> {
        let start = Utc::now() - Duration::days(30);
        (0..n)
            .map(|i| {
                let x = (i % 10) as f64 / 10.0;
                TrainingExample {
                    signal_id: format!("sig-{}", i),
                    features: vec![x, (i % 3) as f64],
                    label: (x > 0.45) as u8 as f64,
                    observed_at: start + Duration::minutes(i as i64),
                }
            })
            .collect()
    }

    fn trainer(dir: &std::path::Path, config: TrainerConfig) -> (CandidateTrainer, ShadowRegistry) {
        let registry = ShadowRegistry::in_memory().unwrap();
        let artifacts = Arc::new(ArtifactStore::open(dir).unwrap());
        let trainer = CandidateTrainer::new(
            config,
            registry.clone(),
            artifacts,
            Arc::new(EvolutionMetrics::new()),
        );
        (trainer, registry)
    }

    #[test]
    fn test_sanitize_drops_malformed_rows() {
        let mut data = rows(5);
        data[1].features.push(9.0);
        data[3].label = f64::NAN;
        data[4].features[0] = f64::INFINITY;
        let (kept, dropped) = sanitize_rows(data);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 3);
    }

    #[test]
    fn test_chronological_split_sizes() {
        let config = TrainerConfig::default();
        assert_eq!(train_len(200, &config), 160);
        assert_eq!(train_len(100, &config), 80);
        assert_eq!(train_len(99, &config), 99);
        assert_eq!(train_len(60, &config), 60);
    }

    #[tokio::test]
    async fn test_too_few_rows_is_a_skip() {
        let dir = tempfile::tempdir().unwrap();
        let (trainer, registry) = trainer(dir.path(), TrainerConfig::default());

        let report = trainer.train(rows(49), Utc::now()).await.unwrap();
        assert_eq!(report.skipped_reason, Some(SkipReason::InsufficientData));
        assert!(report.trained.is_empty() && report.failed.is_empty());
        assert!(registry.list(None).unwrap().is_empty());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_bad_candidate_does_not_abort_batch() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainerConfig {
            candidates: vec![
                CandidateSpec::new(Algorithm::GradientBoosting).with("learning_rate", 7.0),
                CandidateSpec::new(Algorithm::RandomForest)
                    .with("n_estimators", 10.0)
                    .with("max_depth", 3.0),
            ],
            ..Default::default()
        };
        let (trainer, registry) = trainer(dir.path(), config);

        let report = trainer.train(rows(120), Utc::now()).await.unwrap();
        assert_eq!(report.rows, 120);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].algorithm, Algorithm::GradientBoosting);
        assert_eq!(report.trained.len(), 1);

        let validating = registry.list_validating().unwrap();
        assert_eq!(validating.len(), 1);
        assert_eq!(validating[0].algorithm, Algorithm::RandomForest);
        assert!(dir.path().join(&validating[0].model_path).exists());
        // Only the survivor's two blobs were written.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }

    #[tokio::test]
    async fn test_retraining_never_reuses_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainerConfig {
            candidates: vec![CandidateSpec::new(Algorithm::RandomForest).with("n_estimators", 5.0)],
            ..Default::default()
        };
        let (trainer, registry) = trainer(dir.path(), config);
        let now = Utc::now();

        trainer.train(rows(80), now).await.unwrap();
        trainer.train(rows(80), now).await.unwrap();

        let models = registry.list(None).unwrap();
        assert_eq!(models.len(), 2);
        assert_ne!(models[0].model_path, models[1].model_path);
        assert_ne!(models[0].scaler_path, models[1].scaler_path);
    }
}
