//! In-memory incumbent reference for a production scorer.
//!
//! Readers take a lock-free snapshot via `ArcSwapOption`; a reload swaps in a
//! freshly decoded canonical pair. Registered with the promotion executor as an
//! [`IncumbentReloader`], so every promotion and rollback refreshes it.

use anyhow::Result;
use arc_swap::ArcSwapOption;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use super::artifacts::{ArtifactError, ArtifactStore};
use crate::ml::{ModelError, ScoringArtifact};
use crate::providers::IncumbentReloader;

pub struct IncumbentHandle {
    artifacts: Arc<ArtifactStore>,
    current: ArcSwapOption<ScoringArtifact>,
    reloads: AtomicU64,
}

impl IncumbentHandle {
    /// Empty handle; scores fail with `NotFitted` until the first reload.
    pub fn new(artifacts: Arc<ArtifactStore>) -> Self {
        Self {
            artifacts,
            current: ArcSwapOption::empty(),
            reloads: AtomicU64::new(0),
        }
    }

    /// Handle primed from the canonical pair on disk.
    pub fn load(artifacts: Arc<ArtifactStore>) -> Result<Self, ArtifactError> {
        let handle = Self::new(artifacts);
        handle.refresh()?;
        Ok(handle)
    }

    fn refresh(&self) -> Result<(), ArtifactError> {
        let artifact = self.artifacts.load_incumbent()?;
        self.current.store(Some(Arc::new(artifact)));
        let n = self.reloads.fetch_add(1, Ordering::Relaxed) + 1;
        info!(reloads = n, "🔄 Incumbent reloaded from canonical artifacts");
        Ok(())
    }

    pub fn current(&self) -> Option<Arc<ScoringArtifact>> {
        self.current.load_full()
    }

    /// Score with the current incumbent on the 0-10 scale.
    pub fn score(&self, features: &[f64]) -> Result<f64, ModelError> {
        let guard = self.current.load();
        match &*guard {
            Some(artifact) => artifact.score(features),
            None => Err(ModelError::NotFitted),
        }
    }

    pub fn reloads(&self) -> u64 {
        self.reloads.load(Ordering::Relaxed)
    }
}

impl IncumbentReloader for IncumbentHandle {
    fn reload(&self) -> Result<()> {
        self.refresh()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::{Algorithm, CandidateSpec, Model, StandardScaler, Trainable};

    #[test]
    fn test_empty_handle_refuses_to_score() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());
        let handle = IncumbentHandle::new(store.clone());

        assert_eq!(handle.score(&[1.0]), Err(ModelError::NotFitted));
        assert!(handle.reload().is_err());
        assert!(IncumbentHandle::load(store).is_err());
    }

    #[test]
    fn test_reload_picks_up_canonical_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ArtifactStore::open(dir.path()).unwrap());

        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..20).map(|i| (i >= 10) as u8 as f64).collect();
        let scaler = StandardScaler::fit(&x).unwrap();
        let mut model = Model::from_spec(
            &CandidateSpec::new(Algorithm::GradientBoosting).with("n_estimators", 20.0),
            1,
        )
        .unwrap();
        model.fit(&scaler.transform(&x).unwrap(), &y).unwrap();
        store.install_incumbent(&model, &scaler).unwrap();

        let handle = IncumbentHandle::load(store).unwrap();
        assert_eq!(handle.reloads(), 1);
        let expected = ScoringArtifact::new(model, scaler).score(&[15.0]).unwrap();
        assert!((handle.score(&[15.0]).unwrap() - expected).abs() < 1e-12);
    }
}
