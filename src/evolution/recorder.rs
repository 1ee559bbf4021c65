//! Shadow Recorder
//!
//! For every live scoring event, computes what each VALIDATING shadow would
//! have scored on the same feature vector and appends the comparison to the
//! prediction ledger. Best-effort telemetry: errors are counted and swallowed,
//! and the async entry point never blocks the caller.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::artifacts::{ArtifactError, ArtifactStore};
use super::registry::ShadowRegistry;
use crate::metrics::EvolutionMetrics;
use crate::ml::{ScoringArtifact, SCORE_MAX, SCORE_MIN};
use crate::models::{NewShadowPrediction, ShadowModel};

/// Decoded shadow artifacts keyed by shadow id.
#[derive(Default)]
pub struct ShadowModelCache {
    entries: RwLock<HashMap<String, Arc<ScoringArtifact>>>,
}

impl ShadowModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached artifact for `shadow`, loading it on a miss.
    pub fn get_or_load(
        &self,
        shadow: &ShadowModel,
        artifacts: &ArtifactStore,
    ) -> Result<Arc<ScoringArtifact>, ArtifactError> {
        if let Some(hit) = self.entries.read().get(&shadow.id) {
            return Ok(hit.clone());
        }
        let loaded = Arc::new(artifacts.load_scoring_artifact(&shadow.model_path, &shadow.scaler_path)?);
        let mut entries = self.entries.write();
        Ok(entries
            .entry(shadow.id.clone())
            .or_insert(loaded)
            .clone())
    }

    pub fn invalidate(&self) {
        self.entries.write().clear();
    }

    pub fn invalidate_one(&self, shadow_id: &str) {
        self.entries.write().remove(shadow_id);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// One live scoring event.
#[derive(Debug, Clone)]
pub struct ScoringEvent {
    pub signal_id: String,
    pub features: Vec<f64>,
    pub incumbent_score: f64,
}

#[derive(Clone)]
pub struct ShadowRecorder {
    registry: ShadowRegistry,
    artifacts: Arc<ArtifactStore>,
    cache: Arc<ShadowModelCache>,
    metrics: Arc<EvolutionMetrics>,
}

impl ShadowRecorder {
    pub fn new(
        registry: ShadowRegistry,
        artifacts: Arc<ArtifactStore>,
        cache: Arc<ShadowModelCache>,
        metrics: Arc<EvolutionMetrics>,
    ) -> Self {
        Self {
            registry,
            artifacts,
            cache,
            metrics,
        }
    }

    pub fn cache(&self) -> &Arc<ShadowModelCache> {
        &self.cache
    }

    /// Record every VALIDATING shadow's prediction for one signal.
    /// Returns the number of rows written; never fails.
    pub fn record(&self, signal_id: &str, features: &[f64], incumbent_score: f64) -> usize {
        let shadows = match self.registry.list_validating() {
            Ok(s) => s,
            Err(e) => {
                warn!(signal_id, error = %e, "Shadow recorder could not list validating shadows");
                return 0;
            }
        };
        if shadows.is_empty() {
            return 0;
        }
        if !incumbent_score.is_finite() {
            EvolutionMetrics::add(&self.metrics.predictions_skipped, shadows.len() as u64);
            debug!(signal_id, "Non-finite incumbent score, nothing recorded");
            return 0;
        }

        let incumbent_score = incumbent_score.clamp(SCORE_MIN, SCORE_MAX);
        let mut written = 0;
        for shadow in &shadows {
            let score = match self
                .cache
                .get_or_load(shadow, &self.artifacts)
                .map_err(|e| e.to_string())
                .and_then(|artifact| artifact.score(features).map_err(|e| e.to_string()))
            {
                Ok(score) => score,
                Err(e) => {
                    EvolutionMetrics::inc(&self.metrics.predictions_skipped);
                    debug!(shadow_id = %shadow.id, signal_id, error = %e, "Shadow prediction skipped");
                    continue;
                }
            };

            let row = NewShadowPrediction {
                shadow_model_id: shadow.id.clone(),
                signal_id: signal_id.to_string(),
                shadow_score: score,
                incumbent_score,
                created_at: Utc::now(),
            };
            match self.registry.insert_prediction(&row) {
                Ok(true) => {
                    written += 1;
                    EvolutionMetrics::inc(&self.metrics.predictions_recorded);
                }
                Ok(false) => {}
                Err(e) => {
                    EvolutionMetrics::inc(&self.metrics.predictions_skipped);
                    // The shadow may have been reclaimed between list and insert.
                    debug!(shadow_id = %shadow.id, signal_id, error = %e, "Shadow prediction not stored");
                }
            }
        }
        written
    }

    /// Start `workers` tasks draining a bounded queue of scoring events.
    pub fn spawn(self, capacity: usize, workers: usize) -> ShadowRecorderHandle {
        let (tx, rx) = mpsc::channel::<ScoringEvent>(capacity.max(1));
        let shared_rx = Arc::new(Mutex::new(rx));
        let metrics = self.metrics.clone();

        for i in 0..workers.max(1) {
            let recorder = self.clone();
            let rx = shared_rx.clone();
            tokio::spawn(async move {
                loop {
                    let event_opt = { rx.lock().await.recv().await };
                    let Some(event) = event_opt else {
                        break;
                    };
                    let recorder = recorder.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        recorder.record(&event.signal_id, &event.features, event.incumbent_score)
                    })
                    .await;
                    if let Err(e) = result {
                        warn!(worker = i, error = %e, "Shadow recorder task panicked");
                    }
                }
                debug!(worker = i, "Shadow recorder worker stopped");
            });
        }

        ShadowRecorderHandle { tx, metrics }
    }
}

/// Fire-and-forget entry point for the scoring hot path.
#[derive(Clone)]
pub struct ShadowRecorderHandle {
    tx: mpsc::Sender<ScoringEvent>,
    metrics: Arc<EvolutionMetrics>,
}

impl ShadowRecorderHandle {
    /// Enqueue an event without waiting. Returns false if it was dropped.
    pub fn submit(&self, signal_id: impl Into<String>, features: Vec<f64>, incumbent_score: f64) -> bool {
        let event = ScoringEvent {
            signal_id: signal_id.into(),
            features,
            incumbent_score,
        };
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(_) => {
                EvolutionMetrics::inc(&self.metrics.recorder_events_dropped);
                false
            }
        }
    }
}
