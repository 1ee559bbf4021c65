//! Promotion Executor
//!
//! Replaces the canonical incumbent pair with a winning shadow's artifacts.
//! Single flight in-process (`try_lock`) and across processes (lock file).
//! A promotion that fails part-way is reported, never retried.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::artifacts::{ArtifactError, ArtifactStore};
use super::recorder::ShadowModelCache;
use super::registry::{RegistryError, ShadowRegistry};
use crate::metrics::EvolutionMetrics;
use crate::models::ShadowStatus;
use crate::providers::IncumbentReloader;

#[derive(Debug, Clone, Serialize)]
pub struct PromotionOutcome {
    pub shadow_id: String,
    pub generation: u64,
    /// Whether a previous incumbent was saved to the backup paths.
    pub backed_up: bool,
    pub reloaders_failed: usize,
}

pub struct PromotionExecutor {
    registry: ShadowRegistry,
    artifacts: Arc<ArtifactStore>,
    cache: Arc<ShadowModelCache>,
    reloaders: RwLock<Vec<Arc<dyn IncumbentReloader>>>,
    in_flight: Mutex<()>,
    metrics: Arc<EvolutionMetrics>,
}

impl PromotionExecutor {
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
            reloaders: RwLock::new(Vec::new()),
            in_flight: Mutex::new(()),
            metrics,
        }
    }

    /// Register a hook fired after every promotion and rollback.
    pub fn register_reloader(&self, reloader: Arc<dyn IncumbentReloader>) {
        self.reloaders.write().push(reloader);
    }

    pub async fn promote(&self, shadow_id: &str) -> Result<PromotionOutcome, PromotionError> {
        self.promote_at(shadow_id, Utc::now()).await
    }

    pub async fn promote_at(
        &self,
        shadow_id: &str,
        now: DateTime<Utc>,
    ) -> Result<PromotionOutcome, PromotionError> {
        let _single = self.in_flight.try_lock().map_err(|_| PromotionError::InFlight)?;
        let _lock = self.artifacts.acquire_promotion_lock().map_err(lock_error)?;

        let shadow = self
            .registry
            .get(shadow_id)?
            .ok_or_else(|| PromotionError::NotFound(shadow_id.to_string()))?;
        if shadow.status != ShadowStatus::Validating {
            return Err(PromotionError::NotValidating {
                id: shadow.id,
                status: shadow.status,
            });
        }

        let artifacts = self.artifacts.clone();
        let (model_path, scaler_path, digest) = (
            shadow.model_path.clone(),
            shadow.scaler_path.clone(),
            shadow.artifact_digest.clone(),
        );
        let swap = tokio::task::spawn_blocking(move || {
            artifacts.swap_incumbent(&model_path, &scaler_path, &digest)
        })
        .await
        .map_err(|e| PromotionError::Task(e.to_string()))??;

        let generation = match self.registry.mark_promoted(shadow_id, now) {
            Ok(g) => g,
            Err(e) => {
                error!(
                    shadow_id,
                    error = %e,
                    backed_up = swap.backed_up,
                    "🚨 Registry update failed after incumbent swap"
                );
                self.restore_after_failed_commit(swap.backed_up).await;
                return Err(PromotionError::Registry(e));
            }
        };

        self.metrics.set_generation(generation);
        EvolutionMetrics::inc(&self.metrics.promotions);
        self.cache.invalidate();
        let reloaders_failed = self.notify_reloaders();

        info!(
            shadow_id,
            algorithm = %shadow.algorithm,
            generation,
            backed_up = swap.backed_up,
            "🏆 Shadow promoted to incumbent"
        );

        Ok(PromotionOutcome {
            shadow_id: shadow_id.to_string(),
            generation,
            backed_up: swap.backed_up,
            reloaders_failed,
        })
    }

    /// Put the single-generation backup back into canonical position.
    pub async fn rollback(&self) -> Result<u64, PromotionError> {
        let _single = self.in_flight.try_lock().map_err(|_| PromotionError::InFlight)?;
        let _lock = self.artifacts.acquire_promotion_lock().map_err(lock_error)?;

        let artifacts = self.artifacts.clone();
        tokio::task::spawn_blocking(move || artifacts.restore_backup())
            .await
            .map_err(|e| PromotionError::Task(e.to_string()))??;

        let generation = self.registry.bump_generation(None, Utc::now())?;
        self.metrics.set_generation(generation);
        EvolutionMetrics::inc(&self.metrics.rollbacks);
        self.cache.invalidate();
        self.notify_reloaders();

        warn!(generation, "⏪ Incumbent rolled back to pre-promotion backup");
        Ok(generation)
    }

    /// Put the last-known-good incumbent back after the registry refused the
    /// promotion. With no backup (first promotion) that means no incumbent.
    async fn restore_after_failed_commit(&self, backed_up: bool) {
        let artifacts = self.artifacts.clone();
        let restored = tokio::task::spawn_blocking(move || {
            if backed_up {
                artifacts.restore_backup()
            } else {
                artifacts.clear_incumbent()
            }
        })
        .await;
        match restored {
            Ok(Ok(())) => {
                warn!(backed_up, "Canonical incumbent restored after failed promotion commit")
            }
            Ok(Err(e)) => error!(
                error = %e,
                "🚨 Could not restore incumbent; canonical pair holds unregistered shadow"
            ),
            Err(e) => error!(error = %e, "🚨 Incumbent restore task panicked"),
        }
    }

    /// Fire every reload hook; failures are logged and counted.
    fn notify_reloaders(&self) -> usize {
        let reloaders = self.reloaders.read().clone();
        let mut failed = 0;
        for reloader in reloaders {
            if let Err(e) = reloader.reload() {
                failed += 1;
                EvolutionMetrics::inc(&self.metrics.reloader_failures);
                error!(error = %e, "🚨 Incumbent reload hook failed");
            }
        }
        failed
    }
}

fn lock_error(e: ArtifactError) -> PromotionError {
    match e {
        ArtifactError::LockHeld(path) => {
            warn!(path = %path, "Promotion lock held by another process");
            PromotionError::InFlight
        }
        other => PromotionError::Artifact(other),
    }
}

/// Errors from the promotion executor.
#[derive(Debug)]
pub enum PromotionError {
    /// Another promotion or rollback is running.
    InFlight,
    NotFound(String),
    NotValidating { id: String, status: ShadowStatus },
    Artifact(ArtifactError),
    Registry(RegistryError),
    Task(String),
}

impl std::fmt::Display for PromotionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InFlight => write!(f, "Another promotion is in flight"),
            Self::NotFound(id) => write!(f, "Shadow model not found: {}", id),
            Self::NotValidating { id, status } => {
                write!(f, "Shadow {} is {}, not VALIDATING", id, status)
            }
            Self::Artifact(e) => write!(f, "Promotion artifact error: {}", e),
            Self::Registry(e) => write!(f, "Promotion registry error: {}", e),
            Self::Task(e) => write!(f, "Promotion task failed: {}", e),
        }
    }
}

impl std::error::Error for PromotionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Artifact(e) => Some(e),
            Self::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ArtifactError> for PromotionError {
    fn from(e: ArtifactError) -> Self {
        Self::Artifact(e)
    }
}

impl From<RegistryError> for PromotionError {
    fn from(e: RegistryError) -> Self {
        Self::Registry(e)
    }
}
