//! Retention Janitor: reclaims EXPIRED/FAILED shadows past retention.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use super::artifacts::ArtifactStore;
use super::registry::ShadowRegistry;
use crate::metrics::EvolutionMetrics;
use crate::models::CleanupReport;

pub struct RetentionJanitor {
    registry: ShadowRegistry,
    artifacts: Arc<ArtifactStore>,
    metrics: Arc<EvolutionMetrics>,
}

impl RetentionJanitor {
    pub fn new(
        registry: ShadowRegistry,
        artifacts: Arc<ArtifactStore>,
        metrics: Arc<EvolutionMetrics>,
    ) -> Self {
        Self {
            registry,
            artifacts,
            metrics,
        }
    }

    pub fn cleanup(&self, max_age_days: u32) -> Result<CleanupReport> {
        self.cleanup_at(max_age_days, Utc::now())
    }

    /// Remove terminal non-promoted shadows created more than `max_age_days`
    /// before `now`, plus overfit rejections older than the same cutoff.
    pub fn cleanup_at(&self, max_age_days: u32, now: DateTime<Utc>) -> Result<CleanupReport> {
        let cutoff = now - Duration::days(max_age_days as i64);
        let mut report = CleanupReport::default();

        let reclaimable = self
            .registry
            .reclaimable(cutoff)
            .context("Failed to list reclaimable shadows")?;

        for shadow in reclaimable {
            for path in [&shadow.model_path, &shadow.scaler_path] {
                match self.artifacts.remove(path) {
                    Ok(true) => report.files_removed += 1,
                    Ok(false) => {}
                    Err(e) => {
                        warn!(shadow_id = %shadow.id, path = %path, error = %e, "Artifact delete failed");
                    }
                }
            }

            match self.registry.delete_model(&shadow.id) {
                Ok(predictions) => {
                    report.models_removed += 1;
                    report.predictions_removed += predictions;
                }
                Err(e) => {
                    warn!(shadow_id = %shadow.id, error = %e, "Shadow row delete failed");
                }
            }
        }

        report.rejections_removed = self
            .registry
            .prune_rejections(cutoff)
            .context("Failed to prune overfit rejections")?;

        EvolutionMetrics::add(&self.metrics.models_reclaimed, report.models_removed as u64);
        EvolutionMetrics::add(&self.metrics.files_reclaimed, report.files_removed as u64);

        if report.models_removed > 0 || report.rejections_removed > 0 {
            info!(
                models = report.models_removed,
                predictions = report.predictions_removed,
                files = report.files_removed,
                rejections = report.rejections_removed,
                max_age_days,
                "🧹 Retention cleanup complete"
            );
        }
        Ok(report)
    }
}
