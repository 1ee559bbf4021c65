//! Evaluator / Promoter
//!
//! Periodic pass over VALIDATING shadows:
//! 1. ground-truth join for every shadow whose window has elapsed,
//! 2. orphan watchdog (past twice the window and still nothing joinable),
//! 3. paired accuracy comparison on the joined sample,
//! 4. promote or expire.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use statrs::distribution::{Binomial, DiscreteCDF};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::promotion::{PromotionError, PromotionExecutor};
use super::registry::ShadowRegistry;
use crate::config::EvaluatorConfig;
use crate::metrics::EvolutionMetrics;
use crate::ml::DECISION_THRESHOLD;
use crate::models::{EvaluationRecord, EvaluationResult, ExpiryReason, ShadowModel, ShadowPrediction};
use crate::providers::GroundTruthProvider;

/// Accuracy comparison over one joined sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairedComparison {
    pub joined: usize,
    pub shadow_accuracy: f64,
    pub incumbent_accuracy: f64,
    /// Shadow right, incumbent wrong.
    pub shadow_only: u64,
    /// Incumbent right, shadow wrong.
    pub incumbent_only: u64,
}

impl PairedComparison {
    /// Compare both scores against realized outcomes on the same rows.
    /// Rows without an outcome are ignored.
    pub fn from_predictions(predictions: &[ShadowPrediction]) -> Self {
        let mut joined = 0usize;
        let mut shadow_hits = 0usize;
        let mut incumbent_hits = 0usize;
        let mut shadow_only = 0u64;
        let mut incumbent_only = 0u64;

        for p in predictions {
            let Some(outcome) = p.actual_outcome else {
                continue;
            };
            joined += 1;
            let realized = outcome > 0.0;
            let shadow_ok = (p.shadow_score >= DECISION_THRESHOLD) == realized;
            let incumbent_ok = (p.incumbent_score >= DECISION_THRESHOLD) == realized;
            shadow_hits += shadow_ok as usize;
            incumbent_hits += incumbent_ok as usize;
            match (shadow_ok, incumbent_ok) {
                (true, false) => shadow_only += 1,
                (false, true) => incumbent_only += 1,
                _ => {}
            }
        }

        let accuracy = |hits: usize| {
            if joined == 0 {
                0.0
            } else {
                hits as f64 / joined as f64
            }
        };
        Self {
            joined,
            shadow_accuracy: accuracy(shadow_hits),
            incumbent_accuracy: accuracy(incumbent_hits),
            shadow_only,
            incumbent_only,
        }
    }

    /// Whether the shadow's accuracy exceeds the incumbent's by strictly more
    /// than `margin`. Compared on hit counts: the accuracy difference is
    /// `(shadow_only - incumbent_only) / joined`.
    pub fn beats_by(&self, margin: f64) -> bool {
        if self.joined == 0 {
            return false;
        }
        let lead = self.shadow_only as f64 - self.incumbent_only as f64;
        lead > margin * self.joined as f64 + MARGIN_EPSILON
    }

    /// Exact two-sided McNemar p-value over the discordant pairs.
    pub fn mcnemar_p_value(&self) -> f64 {
        mcnemar_exact(self.shadow_only, self.incumbent_only)
    }
}

/// Exact McNemar test: `2 * P(X <= min(b, c))` with `X ~ Binomial(b + c, 0.5)`.
pub fn mcnemar_exact(b: u64, c: u64) -> f64 {
    let n = b + c;
    if n == 0 {
        return 1.0;
    }
    match Binomial::new(0.5, n) {
        Ok(dist) => (2.0 * dist.cdf(b.min(c))).min(1.0),
        Err(_) => 1.0,
    }
}

/// Absorbs float error in `margin * joined` so an improvement of exactly the
/// margin never counts as clearing it.
const MARGIN_EPSILON: f64 = 1e-9;

pub struct Evaluator {
    config: EvaluatorConfig,
    registry: ShadowRegistry,
    ground_truth: Arc<dyn GroundTruthProvider>,
    executor: Arc<PromotionExecutor>,
    metrics: Arc<EvolutionMetrics>,
}

impl Evaluator {
    pub fn new(
        config: EvaluatorConfig,
        registry: ShadowRegistry,
        ground_truth: Arc<dyn GroundTruthProvider>,
        executor: Arc<PromotionExecutor>,
        metrics: Arc<EvolutionMetrics>,
    ) -> Self {
        Self {
            config,
            registry,
            ground_truth,
            executor,
            metrics,
        }
    }

    pub async fn evaluate(&self) -> Result<Vec<EvaluationResult>> {
        self.evaluate_at(Utc::now()).await
    }

    /// One full pass as of `now`. A failure on one shadow is logged and
    /// does not stop the others.
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> Result<Vec<EvaluationResult>> {
        let window = self.config.validation_window();
        let stale_before = now - window * 2;

        let due = self
            .registry
            .due_for_evaluation(now - window)
            .context("Failed to list shadows due for evaluation")?;
        if due.is_empty() {
            debug!("No shadows due for evaluation");
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(due.len());
        for shadow in due {
            let stale = shadow.validation_start.is_some_and(|s| s <= stale_before);
            match self.evaluate_one(&shadow, stale, now).await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(shadow_id = %shadow.id, error = %e, "❌ Shadow evaluation failed");
                }
            }
        }

        let promoted = results.iter().filter(|r| r.promoted).count();
        info!(evaluated = results.len(), promoted, "✅ Evaluation pass complete");
        Ok(results)
    }

    async fn evaluate_one(
        &self,
        shadow: &ShadowModel,
        stale: bool,
        now: DateTime<Utc>,
    ) -> Result<EvaluationResult> {
        let predictions = self.join_outcomes(shadow).await?;
        let cmp = PairedComparison::from_predictions(&predictions);

        // Orphan watchdog: past twice the window and still nothing joinable.
        if stale && cmp.joined == 0 {
            return self.expire_stale(shadow, now);
        }
        EvolutionMetrics::inc(&self.metrics.evaluations);

        let mut result = EvaluationResult {
            id: shadow.id.clone(),
            algorithm: shadow.algorithm,
            shadow_accuracy: None,
            incumbent_accuracy: None,
            joined: cmp.joined,
            p_value: None,
            promoted: false,
            reason: None,
        };

        if cmp.joined < self.config.min_predictions_for_eval {
            self.registry.record_evaluation(
                &shadow.id,
                &EvaluationRecord {
                    validation_accuracy: None,
                    incumbent_accuracy: None,
                    joined_predictions: cmp.joined,
                    p_value: None,
                    validation_end: now,
                },
            )?;
            self.expire(shadow, ExpiryReason::InsufficientSample, now)?;
            info!(
                shadow_id = %shadow.id,
                joined = cmp.joined,
                required = self.config.min_predictions_for_eval,
                "Shadow expired: insufficient sample"
            );
            result.reason = Some(ExpiryReason::InsufficientSample);
            return Ok(result);
        }

        let p_value = cmp.mcnemar_p_value();
        result.shadow_accuracy = Some(cmp.shadow_accuracy);
        result.incumbent_accuracy = Some(cmp.incumbent_accuracy);
        result.p_value = Some(p_value);
        self.registry.record_evaluation(
            &shadow.id,
            &EvaluationRecord {
                validation_accuracy: Some(cmp.shadow_accuracy),
                incumbent_accuracy: Some(cmp.incumbent_accuracy),
                joined_predictions: cmp.joined,
                p_value: Some(p_value),
                validation_end: now,
            },
        )?;

        info!(
            shadow_id = %shadow.id,
            algorithm = %shadow.algorithm,
            joined = cmp.joined,
            shadow_accuracy = cmp.shadow_accuracy,
            incumbent_accuracy = cmp.incumbent_accuracy,
            p_value,
            "📊 Shadow evaluated"
        );

        if !cmp.beats_by(self.config.promotion_margin) {
            self.expire(shadow, ExpiryReason::BelowMargin, now)?;
            result.reason = Some(ExpiryReason::BelowMargin);
            return Ok(result);
        }
        if let Some(max_p) = self.config.max_p_value {
            if p_value > max_p {
                self.expire(shadow, ExpiryReason::NotSignificant, now)?;
                result.reason = Some(ExpiryReason::NotSignificant);
                return Ok(result);
            }
        }

        match self.executor.promote_at(&shadow.id, now).await {
            Ok(_) => result.promoted = true,
            Err(PromotionError::InFlight) => {
                EvolutionMetrics::inc(&self.metrics.promotions_deferred);
                warn!(shadow_id = %shadow.id, "Promotion deferred: another promotion in flight");
            }
            Err(PromotionError::NotValidating { id, status }) => {
                warn!(shadow_id = %id, status = %status, "Shadow left VALIDATING before promotion");
            }
            Err(e) => {
                EvolutionMetrics::inc(&self.metrics.promotion_failures);
                error!(
                    shadow_id = %shadow.id,
                    error = %e,
                    "🚨 Promotion failed; operator attention required"
                );
                self.expire(shadow, ExpiryReason::PromotionFailed, now)?;
                result.reason = Some(ExpiryReason::PromotionFailed);
            }
        }
        Ok(result)
    }

    fn expire_stale(&self, shadow: &ShadowModel, now: DateTime<Utc>) -> Result<EvaluationResult> {
        self.registry.record_evaluation(
            &shadow.id,
            &EvaluationRecord {
                validation_accuracy: None,
                incumbent_accuracy: None,
                joined_predictions: 0,
                p_value: None,
                validation_end: now,
            },
        )?;
        self.expire(shadow, ExpiryReason::StaleValidation, now)?;
        warn!(
            shadow_id = %shadow.id,
            algorithm = %shadow.algorithm,
            "🕰️ Stale shadow expired by watchdog"
        );
        Ok(EvaluationResult {
            id: shadow.id.clone(),
            algorithm: shadow.algorithm,
            shadow_accuracy: None,
            incumbent_accuracy: None,
            joined: 0,
            p_value: None,
            promoted: false,
            reason: Some(ExpiryReason::StaleValidation),
        })
    }

    /// Fill outcomes for rows still missing one and return the full ledger.
    /// Ledger reads and writes run on the blocking pool.
    async fn join_outcomes(&self, shadow: &ShadowModel) -> Result<Vec<ShadowPrediction>> {
        let registry = self.registry.clone();
        let shadow_id = shadow.id.clone();
        let mut predictions =
            tokio::task::spawn_blocking(move || registry.predictions_for(&shadow_id))
                .await
                .context("Ledger read task failed")??;
        let horizon = self.config.outcome_horizon;

        let mut fills = Vec::new();
        for p in predictions.iter_mut().filter(|p| p.actual_outcome.is_none()) {
            let outcome = match self.ground_truth.realized_outcome(&p.signal_id, horizon).await {
                Ok(Some(v)) if v.is_finite() => v,
                Ok(_) => continue,
                Err(e) => {
                    EvolutionMetrics::inc(&self.metrics.ground_truth_errors);
                    warn!(signal_id = %p.signal_id, error = %e, "Ground-truth lookup failed");
                    continue;
                }
            };
            fills.push((p.id, outcome));
            p.actual_outcome = Some(outcome);
        }

        if !fills.is_empty() {
            let registry = self.registry.clone();
            let filled = tokio::task::spawn_blocking(move || registry.fill_outcomes(&fills))
                .await
                .context("Ledger write task failed")??;
            EvolutionMetrics::add(&self.metrics.outcomes_joined, filled as u64);
        }
        Ok(predictions)
    }

    fn expire(&self, shadow: &ShadowModel, reason: ExpiryReason, now: DateTime<Utc>) -> Result<()> {
        self.registry
            .expire(&shadow.id, reason, now)
            .with_context(|| format!("Failed to expire shadow {}", shadow.id))?;
        self.metrics.record_expiry(reason);
        Ok(())
    }
}
