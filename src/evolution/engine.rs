//! Shadow Evolution Engine
//!
//! Owns one registry, one artifact store and one metrics set, and wires the
//! trainer, recorder, evaluator, promotion executor and janitor around them.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::artifacts::ArtifactStore;
use super::evaluator::Evaluator;
use super::janitor::RetentionJanitor;
use super::promotion::PromotionExecutor;
use super::recorder::{ShadowModelCache, ShadowRecorder, ShadowRecorderHandle};
use super::registry::ShadowRegistry;
use super::trainer::CandidateTrainer;
use crate::config::EvolutionConfig;
use crate::metrics::EvolutionMetrics;
use crate::models::{
    CleanupReport, EvaluationResult, IncumbentState, ShadowModel, ShadowStatus, TrainingReport,
};
use crate::providers::{GroundTruthProvider, IncumbentReloader, TrainingDataProvider};

/// Operator summary returned by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub counts: BTreeMap<String, usize>,
    pub incumbent: IncumbentState,
    pub incumbent_present: bool,
    pub backup_present: bool,
    pub shadows: Vec<ShadowModel>,
}

pub struct ShadowEvolutionEngine {
    config: EvolutionConfig,
    registry: ShadowRegistry,
    artifacts: Arc<ArtifactStore>,
    metrics: Arc<EvolutionMetrics>,
    training_data: Arc<dyn TrainingDataProvider>,
    trainer: CandidateTrainer,
    recorder: ShadowRecorder,
    evaluator: Evaluator,
    executor: Arc<PromotionExecutor>,
    janitor: RetentionJanitor,
}

impl ShadowEvolutionEngine {
    /// Open the registry and artifact store named in `config.storage`.
    pub fn open(
        config: EvolutionConfig,
        training_data: Arc<dyn TrainingDataProvider>,
        ground_truth: Arc<dyn GroundTruthProvider>,
    ) -> Result<Self> {
        if let Some(parent) = config.storage.database_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let registry = ShadowRegistry::open(&config.storage.database_path).with_context(|| {
            format!(
                "Failed to open shadow registry at {}",
                config.storage.database_path.display()
            )
        })?;
        let artifacts = ArtifactStore::open(&config.storage.artifact_dir).with_context(|| {
            format!(
                "Failed to open artifact store at {}",
                config.storage.artifact_dir.display()
            )
        })?;
        Self::from_parts(config, registry, Arc::new(artifacts), training_data, ground_truth)
    }

    pub fn from_parts(
        config: EvolutionConfig,
        registry: ShadowRegistry,
        artifacts: Arc<ArtifactStore>,
        training_data: Arc<dyn TrainingDataProvider>,
        ground_truth: Arc<dyn GroundTruthProvider>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = Arc::new(EvolutionMetrics::new());
        let cache = Arc::new(ShadowModelCache::new());

        let generation = registry.incumbent_state()?.generation;
        metrics.set_generation(generation);

        let trainer = CandidateTrainer::new(
            config.trainer.clone(),
            registry.clone(),
            artifacts.clone(),
            metrics.clone(),
        );
        let recorder = ShadowRecorder::new(
            registry.clone(),
            artifacts.clone(),
            cache.clone(),
            metrics.clone(),
        );
        let executor = Arc::new(PromotionExecutor::new(
            registry.clone(),
            artifacts.clone(),
            cache,
            metrics.clone(),
        ));
        let evaluator = Evaluator::new(
            config.evaluator.clone(),
            registry.clone(),
            ground_truth,
            executor.clone(),
            metrics.clone(),
        );
        let janitor = RetentionJanitor::new(registry.clone(), artifacts.clone(), metrics.clone());

        info!(
            artifact_dir = %artifacts.root().display(),
            generation,
            candidates = config.trainer.candidates.len(),
            "🧬 Shadow evolution engine ready"
        );

        Ok(Self {
            config,
            registry,
            artifacts,
            metrics,
            training_data,
            trainer,
            recorder,
            evaluator,
            executor,
            janitor,
        })
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ShadowRegistry {
        &self.registry
    }

    pub fn artifacts(&self) -> &Arc<ArtifactStore> {
        &self.artifacts
    }

    pub fn metrics(&self) -> &Arc<EvolutionMetrics> {
        &self.metrics
    }

    pub fn executor(&self) -> &Arc<PromotionExecutor> {
        &self.executor
    }

    pub fn register_reloader(&self, reloader: Arc<dyn IncumbentReloader>) {
        self.executor.register_reloader(reloader);
    }

    pub async fn train_candidates(&self) -> Result<TrainingReport> {
        self.train_candidates_at(Utc::now()).await
    }

    /// Fetch the lookback window from the training data provider and train.
    pub async fn train_candidates_at(&self, now: DateTime<Utc>) -> Result<TrainingReport> {
        let rows = self
            .training_data
            .fetch_training_set(self.config.trainer.lookback_days)
            .await
            .context("Training data provider failed")?;
        self.trainer.train(rows, now).await
    }

    /// Synchronous recorder, for callers already off the hot path.
    pub fn recorder(&self) -> &ShadowRecorder {
        &self.recorder
    }

    /// Start the queued recorder sized from `config.recorder`.
    pub fn spawn_recorder(&self) -> ShadowRecorderHandle {
        self.recorder
            .clone()
            .spawn(self.config.recorder.queue_capacity, self.config.recorder.workers)
    }

    pub async fn evaluate_candidates(&self) -> Result<Vec<EvaluationResult>> {
        self.evaluator.evaluate().await
    }

    pub async fn evaluate_candidates_at(&self, now: DateTime<Utc>) -> Result<Vec<EvaluationResult>> {
        self.evaluator.evaluate_at(now).await
    }

    pub fn cleanup(&self, max_age_days: u32) -> Result<CleanupReport> {
        self.janitor.cleanup(max_age_days)
    }

    pub fn cleanup_at(&self, max_age_days: u32, now: DateTime<Utc>) -> Result<CleanupReport> {
        self.janitor.cleanup_at(max_age_days, now)
    }

    /// Restore the pre-promotion backup. Returns the new generation.
    pub async fn rollback(&self) -> Result<u64> {
        Ok(self.executor.rollback().await?)
    }

    pub fn status(&self, filter: Option<ShadowStatus>) -> Result<EngineStatus> {
        Ok(EngineStatus {
            counts: self.registry.count_by_status()?,
            incumbent: self.registry.incumbent_state()?,
            incumbent_present: self.artifacts.incumbent_exists(),
            backup_present: self.artifacts.backup_exists(),
            shadows: self.registry.list(filter)?,
        })
    }
}
