//! Prometheus Metrics for the Shadow Evolution Engine
//!
//! Plain atomics, rendered to the Prometheus text format on demand. Operator
//! alerts (promotion failures, reloader failures, partial swaps) are exported
//! as counters so they can be alerted on directly.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::models::ExpiryReason;

#[derive(Debug, Default)]
pub struct EvolutionMetrics {
    pub training_runs: AtomicU64,
    pub training_runs_skipped: AtomicU64,
    pub candidates_trained: AtomicU64,
    pub candidates_rejected: AtomicU64,
    pub candidates_failed: AtomicU64,

    pub predictions_recorded: AtomicU64,
    pub predictions_skipped: AtomicU64,
    pub recorder_events_dropped: AtomicU64,

    pub evaluations: AtomicU64,
    pub outcomes_joined: AtomicU64,
    pub ground_truth_errors: AtomicU64,
    pub promotions: AtomicU64,
    pub promotion_failures: AtomicU64,
    pub promotions_deferred: AtomicU64,
    pub rollbacks: AtomicU64,
    pub reloader_failures: AtomicU64,

    pub models_reclaimed: AtomicU64,
    pub files_reclaimed: AtomicU64,

    pub incumbent_generation: AtomicU64,

    /// Expiries by reason.
    expiries: RwLock<BTreeMap<&'static str, u64>>,
}

impl EvolutionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_expiry(&self, reason: ExpiryReason) {
        *self.expiries.write().entry(reason.as_str()).or_insert(0) += 1;
    }

    pub fn expiries(&self, reason: ExpiryReason) -> u64 {
        self.expiries.read().get(reason.as_str()).copied().unwrap_or(0)
    }

    pub fn set_generation(&self, generation: u64) {
        self.incumbent_generation.store(generation, Ordering::Relaxed);
    }

    /// Export all metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        let counters: [(&str, &str, &AtomicU64); 18] = [
            ("shadow_training_runs_total", "Training runs started", &self.training_runs),
            (
                "shadow_training_runs_skipped_total",
                "Training runs skipped for insufficient data",
                &self.training_runs_skipped,
            ),
            (
                "shadow_candidates_trained_total",
                "Candidates registered as VALIDATING",
                &self.candidates_trained,
            ),
            (
                "shadow_candidates_rejected_total",
                "Candidates dropped by the overfit guard",
                &self.candidates_rejected,
            ),
            (
                "shadow_candidates_failed_total",
                "Candidates that failed to train or persist",
                &self.candidates_failed,
            ),
            (
                "shadow_predictions_recorded_total",
                "Shadow predictions written",
                &self.predictions_recorded,
            ),
            (
                "shadow_predictions_skipped_total",
                "Shadow predictions skipped after a load or scoring error",
                &self.predictions_skipped,
            ),
            (
                "shadow_recorder_events_dropped_total",
                "Scoring events dropped because the recorder queue was full",
                &self.recorder_events_dropped,
            ),
            ("shadow_evaluations_total", "Shadows evaluated", &self.evaluations),
            (
                "shadow_outcomes_joined_total",
                "Predictions joined with ground truth",
                &self.outcomes_joined,
            ),
            (
                "shadow_ground_truth_errors_total",
                "Ground-truth lookups that failed",
                &self.ground_truth_errors,
            ),
            ("shadow_promotions_total", "Successful promotions", &self.promotions),
            (
                "shadow_promotion_failures_total",
                "Promotions that failed and need operator attention",
                &self.promotion_failures,
            ),
            (
                "shadow_promotions_deferred_total",
                "Promotions deferred because another swap was in flight",
                &self.promotions_deferred,
            ),
            ("shadow_rollbacks_total", "Operator rollbacks", &self.rollbacks),
            (
                "shadow_reloader_failures_total",
                "Incumbent reload hooks that failed after a swap",
                &self.reloader_failures,
            ),
            (
                "shadow_models_reclaimed_total",
                "Terminal shadows removed by the janitor",
                &self.models_reclaimed,
            ),
            (
                "shadow_files_reclaimed_total",
                "Artifact files removed by the janitor",
                &self.files_reclaimed,
            ),
        ];

        for (name, help, value) in counters {
            let _ = writeln!(output, "# HELP {} {}", name, help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, value.load(Ordering::Relaxed));
        }

        output.push_str("# HELP shadow_expiries_total Shadows expired, by reason\n");
        output.push_str("# TYPE shadow_expiries_total counter\n");
        for (reason, count) in self.expiries.read().iter() {
            let _ = writeln!(output, "shadow_expiries_total{{reason=\"{}\"}} {}", reason, count);
        }

        output.push_str("# HELP shadow_incumbent_generation Generation of the canonical incumbent\n");
        output.push_str("# TYPE shadow_incumbent_generation gauge\n");
        let _ = writeln!(
            output,
            "shadow_incumbent_generation {}",
            self.incumbent_generation.load(Ordering::Relaxed)
        );

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_export() {
        let metrics = EvolutionMetrics::new();
        EvolutionMetrics::inc(&metrics.promotions);
        EvolutionMetrics::add(&metrics.predictions_recorded, 5);
        metrics.record_expiry(ExpiryReason::InsufficientSample);
        metrics.record_expiry(ExpiryReason::InsufficientSample);
        metrics.set_generation(3);

        let text = metrics.to_prometheus();
        assert!(text.contains("shadow_promotions_total 1\n"));
        assert!(text.contains("shadow_predictions_recorded_total 5\n"));
        assert!(text.contains("shadow_expiries_total{reason=\"insufficient_sample\"} 2\n"));
        assert!(text.contains("shadow_incumbent_generation 3\n"));
        assert!(text.contains("# TYPE shadow_rollbacks_total counter"));
        assert_eq!(metrics.expiries(ExpiryReason::InsufficientSample), 2);
        assert_eq!(metrics.expiries(ExpiryReason::BelowMargin), 0);
    }
}
