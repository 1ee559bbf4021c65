//! In-process providers for embedding the engine next to an existing
//! pipeline, and for tests.

use anyhow::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::{GroundTruthProvider, OutcomeHorizon, TrainingDataProvider};
use crate::models::TrainingExample;

/// Outcomes pushed by the caller, keyed by (signal, horizon).
#[derive(Default)]
pub struct InMemoryGroundTruth {
    outcomes: RwLock<HashMap<(String, OutcomeHorizon), f64>>,
    lookups: AtomicU64,
}

impl InMemoryGroundTruth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, signal_id: impl Into<String>, horizon: OutcomeHorizon, outcome: f64) {
        self.outcomes.write().insert((signal_id.into(), horizon), outcome);
    }

    /// Number of lookups served so far.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl GroundTruthProvider for InMemoryGroundTruth {
    async fn realized_outcome(
        &self,
        signal_id: &str,
        horizon: OutcomeHorizon,
    ) -> Result<Option<f64>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .outcomes
            .read()
            .get(&(signal_id.to_string(), horizon))
            .copied())
    }
}

/// A fixed training set, returned regardless of lookback.
pub struct StaticTrainingData {
    rows: Vec<TrainingExample>,
}

impl StaticTrainingData {
    pub fn new(mut rows: Vec<TrainingExample>) -> Self {
        rows.sort_by_key(|r| r.observed_at);
        Self { rows }
    }
}

#[async_trait::async_trait]
impl TrainingDataProvider for StaticTrainingData {
    async fn fetch_training_set(&self, _lookback_days: u32) -> Result<Vec<TrainingExample>> {
        Ok(self.rows.clone())
    }
}
