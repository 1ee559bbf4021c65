//! Shadow registry tests: lifecycle guards, ledger uniqueness, reclamation.

use chrono::{Duration, TimeZone, Utc};

use crate::evolution::registry::{RegistryError, ShadowRegistry};
use crate::ml::{Algorithm, Hyperparameters};
use crate::models::{
    EvaluationRecord, ExpiryReason, NewShadowModel, NewShadowPrediction, RejectedCandidate,
    ShadowStatus,
};

fn candidate(id: &str, created_at: chrono::DateTime<Utc>) -> NewShadowModel {
    let mut hyperparameters = Hyperparameters::new();
    hyperparameters.insert("max_depth".into(), 3.0);
    NewShadowModel {
        id: id.to_string(),
        algorithm: Algorithm::RandomForest,
        hyperparameters,
        model_path: format!("shadow_{}_model.json", id),
        scaler_path: format!("shadow_{}_scaler.json", id),
        artifact_digest: "abc123".to_string(),
        train_score: 0.7,
        test_score: 0.6,
        created_at,
    }
}

fn prediction(shadow: &str, signal: &str) -> NewShadowPrediction {
    NewShadowPrediction {
        shadow_model_id: shadow.to_string(),
        signal_id: signal.to_string(),
        shadow_score: 6.5,
        incumbent_score: 4.0,
        created_at: Utc::now(),
    }
}

#[test]
fn test_register_inserts_validating_row() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let model = registry.register_candidate(&candidate("a", now), now).unwrap();

    assert_eq!(model.status, ShadowStatus::Validating);
    assert_eq!(model.validation_start, Some(now));
    assert_eq!(model.hyperparameters.get("max_depth"), Some(&3.0));
    assert_eq!(model.train_score, Some(0.7));
    assert!(model.validation_accuracy.is_none());
    assert_eq!(registry.list_validating().unwrap().len(), 1);
}

#[test]
fn test_duplicate_artifact_path_rejected() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    registry.register_candidate(&candidate("a", now), now).unwrap();

    let mut dup = candidate("b", now);
    dup.model_path = "shadow_a_model.json".into();
    assert!(matches!(
        registry.register_candidate(&dup, now),
        Err(RegistryError::Sqlite(_))
    ));
}

#[test]
fn test_prediction_unique_per_shadow_and_signal() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    registry.register_candidate(&candidate("a", now), now).unwrap();

    assert!(registry.insert_prediction(&prediction("a", "sig-1")).unwrap());
    assert!(!registry.insert_prediction(&prediction("a", "sig-1")).unwrap());
    assert!(registry.insert_prediction(&prediction("a", "sig-2")).unwrap());
    assert_eq!(registry.predictions_for("a").unwrap().len(), 2);
}

#[test]
fn test_fill_outcome_only_once() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    registry.register_candidate(&candidate("a", now), now).unwrap();
    registry.insert_prediction(&prediction("a", "sig-1")).unwrap();

    let row = registry.predictions_for("a").unwrap().remove(0);
    assert!(row.actual_outcome.is_none());
    assert!(registry.fill_outcome(row.id, 0.12).unwrap());
    assert!(!registry.fill_outcome(row.id, -0.5).unwrap());

    let row = registry.predictions_for("a").unwrap().remove(0);
    assert_eq!(row.actual_outcome, Some(0.12));
    assert_eq!(registry.joined_count("a").unwrap(), 1);
}

#[test]
fn test_fill_outcomes_batch_skips_filled_rows() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    registry.register_candidate(&candidate("a", now), now).unwrap();
    for signal in ["sig-1", "sig-2", "sig-3"] {
        registry.insert_prediction(&prediction("a", signal)).unwrap();
    }
    let ids: Vec<i64> = registry.predictions_for("a").unwrap().iter().map(|p| p.id).collect();
    registry.fill_outcome(ids[0], 1.0).unwrap();

    let changed = registry
        .fill_outcomes(&[(ids[0], -1.0), (ids[1], 0.5), (ids[2], -0.25)])
        .unwrap();
    assert_eq!(changed, 2);

    let outcomes: Vec<Option<f64>> = registry
        .predictions_for("a")
        .unwrap()
        .iter()
        .map(|p| p.actual_outcome)
        .collect();
    assert_eq!(outcomes, vec![Some(1.0), Some(0.5), Some(-0.25)]);
}

#[test]
fn test_expired_row_cannot_be_promoted() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    registry.register_candidate(&candidate("a", now), now).unwrap();
    registry.expire("a", ExpiryReason::BelowMargin, now).unwrap();

    let err = registry.mark_promoted("a", now).unwrap_err();
    assert!(matches!(
        err,
        RegistryError::InvalidTransition {
            from: Some(ShadowStatus::Expired),
            to: ShadowStatus::Promoted,
            ..
        }
    ));
    assert!(matches!(
        registry.expire("a", ExpiryReason::StaleValidation, now),
        Err(RegistryError::InvalidTransition { .. })
    ));

    let row = registry.get("a").unwrap().unwrap();
    assert_eq!(row.status, ShadowStatus::Expired);
    assert_eq!(row.status_reason.as_deref(), Some("below_margin"));
    // Generation untouched by the failed promotion.
    assert_eq!(registry.incumbent_state().unwrap().generation, 0);
}

#[test]
fn test_promotion_bumps_generation() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    registry.register_candidate(&candidate("a", now), now).unwrap();
    registry.register_candidate(&candidate("b", now), now).unwrap();

    assert_eq!(registry.mark_promoted("a", now).unwrap(), 1);
    assert_eq!(registry.mark_promoted("b", now).unwrap(), 2);

    let state = registry.incumbent_state().unwrap();
    assert_eq!(state.generation, 2);
    assert_eq!(state.shadow_model_id.as_deref(), Some("b"));

    assert_eq!(registry.bump_generation(None, now).unwrap(), 3);
    assert!(registry.incumbent_state().unwrap().shadow_model_id.is_none());

    let a = registry.get("a").unwrap().unwrap();
    assert_eq!(a.status, ShadowStatus::Promoted);
    assert!(a.promoted_at.is_some());
}

#[test]
fn test_missing_row_is_not_found() {
    let registry = ShadowRegistry::in_memory().unwrap();
    assert!(matches!(
        registry.expire("ghost", ExpiryReason::BelowMargin, Utc::now()),
        Err(RegistryError::NotFound(_))
    ));
    assert!(registry.get("ghost").unwrap().is_none());
}

#[test]
fn test_record_evaluation_persists_scores() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc.with_ymd_and_hms(2026, 3, 4, 12, 0, 0).unwrap();
    registry.register_candidate(&candidate("a", now), now).unwrap();

    registry
        .record_evaluation(
            "a",
            &EvaluationRecord {
                validation_accuracy: Some(0.62),
                incumbent_accuracy: Some(0.55),
                joined_predictions: 25,
                p_value: Some(0.3),
                validation_end: now,
            },
        )
        .unwrap();

    let row = registry.get("a").unwrap().unwrap();
    assert_eq!(row.validation_accuracy, Some(0.62));
    assert_eq!(row.incumbent_accuracy, Some(0.55));
    assert_eq!(row.joined_predictions, Some(25));
    assert_eq!(row.validation_end, Some(now));
    assert_eq!(row.status, ShadowStatus::Validating);
}

#[test]
fn test_due_for_evaluation_respects_window_start() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    registry
        .register_candidate(&candidate("old", now), now - Duration::hours(80))
        .unwrap();
    registry
        .register_candidate(&candidate("new", now), now - Duration::hours(10))
        .unwrap();

    let due = registry.due_for_evaluation(now - Duration::hours(72)).unwrap();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].id, "old");
}

#[test]
fn test_reclaim_only_terminal_non_promoted() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    let old = now - Duration::days(20);
    for id in ["expired", "promoted", "validating", "failed"] {
        registry.register_candidate(&candidate(id, old), old).unwrap();
    }
    registry.expire("expired", ExpiryReason::BelowMargin, now).unwrap();
    registry.mark_promoted("promoted", now).unwrap();
    registry
        .execute_raw("UPDATE shadow_models SET status = 'FAILED' WHERE id = 'failed'")
        .unwrap();
    registry.insert_prediction(&prediction("expired", "s1")).unwrap();
    registry.insert_prediction(&prediction("expired", "s2")).unwrap();

    let reclaimable: Vec<String> = registry
        .reclaimable(now - Duration::days(14))
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(reclaimable.len(), 2);
    assert!(reclaimable.contains(&"expired".to_string()));
    assert!(reclaimable.contains(&"failed".to_string()));

    assert_eq!(registry.delete_model("expired").unwrap(), 2);
    assert!(registry.get("expired").unwrap().is_none());
    assert!(registry.predictions_for("expired").unwrap().is_empty());

    assert!(matches!(
        registry.delete_model("promoted"),
        Err(RegistryError::NotFound(_))
    ));
    assert!(registry.get("promoted").unwrap().is_some());
}

#[test]
fn test_rejections_audit_trail() {
    let registry = ShadowRegistry::in_memory().unwrap();
    let now = Utc::now();
    for (id, at) in [("r-old", now - Duration::days(30)), ("r-new", now)] {
        registry
            .record_rejection(&RejectedCandidate {
                id: id.to_string(),
                algorithm: Algorithm::GradientBoosting,
                hyperparameters: Hyperparameters::new(),
                train_score: 0.95,
                test_score: 0.60,
                overfit_gap: 0.35,
                rejected_at: at,
            })
            .unwrap();
    }
    assert_eq!(registry.list_rejections().unwrap().len(), 2);
    assert_eq!(registry.prune_rejections(now - Duration::days(14)).unwrap(), 1);

    let left = registry.list_rejections().unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].id, "r-new");
    assert!((left[0].overfit_gap - 0.35).abs() < 1e-12);
}

#[test]
fn test_file_backed_registry_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shadow.db");
    let now = Utc::now();
    {
        let registry = ShadowRegistry::open(&path).unwrap();
        registry.register_candidate(&candidate("a", now), now).unwrap();
        registry.mark_promoted("a", now).unwrap();
    }
    let registry = ShadowRegistry::open(&path).unwrap();
    assert_eq!(registry.incumbent_state().unwrap().generation, 1);
    assert_eq!(registry.count_by_status().unwrap().get("PROMOTED"), Some(&1));
}
