//! Shared fixtures for the evolution companion tests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tempfile::TempDir;

use crate::evolution::artifacts::ArtifactStore;
use crate::evolution::promotion::PromotionExecutor;
use crate::evolution::recorder::{ShadowModelCache, ShadowRecorder};
use crate::evolution::registry::ShadowRegistry;
use crate::metrics::EvolutionMetrics;
use crate::ml::{Algorithm, CandidateSpec, Model, StandardScaler, Trainable};
use crate::models::{NewShadowModel, NewShadowPrediction, ShadowModel};

/// Small boosted model on one feature: predicts a win for `x >= cut`.
pub(crate) fn fitted_pair(cut: usize) -> (Model, StandardScaler) {
    let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
    let y: Vec<f64> = (0..20).map(|i| (i >= cut) as u8 as f64).collect();
    let scaler = StandardScaler::fit(&x).unwrap();
    let spec = CandidateSpec::new(Algorithm::GradientBoosting)
        .with("n_estimators", 30.0)
        .with("learning_rate", 0.3);
    let mut model = Model::from_spec(&spec, 7).unwrap();
    model.fit(&scaler.transform(&x).unwrap(), &y).unwrap();
    (model, scaler)
}

pub(crate) struct Harness {
    _dir: TempDir,
    pub registry: ShadowRegistry,
    pub artifacts: Arc<ArtifactStore>,
    pub cache: Arc<ShadowModelCache>,
    pub metrics: Arc<EvolutionMetrics>,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(ArtifactStore::open(dir.path().join("models")).unwrap());
        Self {
            _dir: dir,
            registry: ShadowRegistry::in_memory().unwrap(),
            artifacts,
            cache: Arc::new(ShadowModelCache::new()),
            metrics: Arc::new(EvolutionMetrics::new()),
        }
    }

    pub fn executor(&self) -> Arc<PromotionExecutor> {
        Arc::new(PromotionExecutor::new(
            self.registry.clone(),
            self.artifacts.clone(),
            self.cache.clone(),
            self.metrics.clone(),
        ))
    }

    pub fn recorder(&self) -> ShadowRecorder {
        ShadowRecorder::new(
            self.registry.clone(),
            self.artifacts.clone(),
            self.cache.clone(),
            self.metrics.clone(),
        )
    }

    /// Persist real artifacts for `id` and register it as VALIDATING.
    pub fn shadow(&self, id: &str, cut: usize, validation_start: DateTime<Utc>) -> ShadowModel {
        let (model, scaler) = fitted_pair(cut);
        let paths = self
            .artifacts
            .persist_candidate(Algorithm::GradientBoosting, &model, &scaler, validation_start)
            .unwrap();
        let candidate = NewShadowModel {
            id: id.to_string(),
            algorithm: Algorithm::GradientBoosting,
            hyperparameters: Default::default(),
            model_path: paths.model_path,
            scaler_path: paths.scaler_path,
            artifact_digest: paths.digest,
            train_score: 0.8,
            test_score: 0.7,
            created_at: validation_start,
        };
        self.registry
            .register_candidate(&candidate, validation_start)
            .unwrap()
    }

    pub fn install_incumbent(&self, cut: usize) {
        let (model, scaler) = fitted_pair(cut);
        self.artifacts.install_incumbent(&model, &scaler).unwrap();
    }

    /// Insert one ledger row with fixed scores.
    pub fn prediction(&self, shadow_id: &str, signal_id: &str, shadow_score: f64, incumbent_score: f64) {
        let inserted = self
            .registry
            .insert_prediction(&NewShadowPrediction {
                shadow_model_id: shadow_id.to_string(),
                signal_id: signal_id.to_string(),
                shadow_score,
                incumbent_score,
                created_at: Utc::now(),
            })
            .unwrap();
        assert!(inserted);
    }
}
