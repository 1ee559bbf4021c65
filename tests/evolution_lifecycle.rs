//! End-to-end lifecycle tests: train -> shadow -> evaluate -> promote/expire
//! -> reclaim, driven through the engine's public API.

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tempfile::TempDir;

use shadow_evolution::config::EvolutionConfig;
use shadow_evolution::evolution::artifacts::{ArtifactStore, INCUMBENT_MODEL};
use shadow_evolution::evolution::{IncumbentHandle, ShadowEvolutionEngine, ShadowRegistry};
use shadow_evolution::ml::{Algorithm, CandidateSpec, Model, StandardScaler, Trainable};
use shadow_evolution::models::{
    ExpiryReason, NewShadowModel, NewShadowPrediction, ShadowModel, ShadowStatus, TrainingExample,
};
use shadow_evolution::providers::{InMemoryGroundTruth, OutcomeHorizon, StaticTrainingData};

struct Fixture {
    _dir: TempDir,
    engine: ShadowEvolutionEngine,
    truth: Arc<InMemoryGroundTruth>,
}

fn fixture(config: EvolutionConfig, rows: Vec<TrainingExample>) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let registry = ShadowRegistry::open(dir.path().join("registry.db")).unwrap();
    let artifacts = Arc::new(ArtifactStore::open(dir.path().join("models")).unwrap());
    let truth = Arc::new(InMemoryGroundTruth::new());
    let engine = ShadowEvolutionEngine::from_parts(
        config,
        registry,
        artifacts,
        Arc::new(StaticTrainingData::new(rows)),
        truth.clone(),
    )
    .unwrap();
    Fixture {
        _dir: dir,
        engine,
        truth,
    }
}

/// 200 chronological rows. x0 carries the signal, three noise columns do not,
/// and every 10th label is flipped.
fn labelled_history(start: DateTime<Utc>) -> Vec<TrainingExample> {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    (0..200)
        .map(|i| {
            let positive = i % 2 == 0;
            let magnitude = 1.0 + 0.5 * rng.gen::<f64>();
            let x0 = if positive { magnitude } else { -magnitude };
            let mut label = positive as u8 as f64;
            if i % 10 == 0 {
                label = 1.0 - label;
            }
            let features = vec![
                x0,
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            ];
            TrainingExample {
                signal_id: format!("hist-{}", i),
                features,
                label,
                observed_at: start + Duration::minutes(i as i64),
            }
        })
        .collect()
}

fn fitted(cut: usize) -> (Model, StandardScaler) {
    let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
    let y: Vec<f64> = (0..20).map(|i| (i >= cut) as u8 as f64).collect();
    let scaler = StandardScaler::fit(&x).unwrap();
    let spec = CandidateSpec::new(Algorithm::GradientBoosting)
        .with("n_estimators", 30.0)
        .with("learning_rate", 0.3);
    let mut model = Model::from_spec(&spec, 3).unwrap();
    model.fit(&scaler.transform(&x).unwrap(), &y).unwrap();
    (model, scaler)
}

fn register_shadow(engine: &ShadowEvolutionEngine, id: &str, cut: usize, at: DateTime<Utc>) -> ShadowModel {
    let (model, scaler) = fitted(cut);
    let paths = engine
        .artifacts()
        .persist_candidate(Algorithm::GradientBoosting, &model, &scaler, at)
        .unwrap();
    let candidate = NewShadowModel {
        id: id.to_string(),
        algorithm: Algorithm::GradientBoosting,
        hyperparameters: Default::default(),
        model_path: paths.model_path,
        scaler_path: paths.scaler_path,
        artifact_digest: paths.digest,
        train_score: 0.8,
        test_score: 0.75,
        created_at: at,
    };
    engine.registry().register_candidate(&candidate, at).unwrap()
}

/// `n` predictions with realized outcomes; the shadow is right on the first
/// `shadow_right`, the incumbent on the first `incumbent_right`.
fn seed_ledger(f: &Fixture, shadow_id: &str, n: usize, shadow_right: usize, incumbent_right: usize) {
    for i in 0..n {
        let win = i % 3 != 0;
        let signal_id = format!("{}-live-{}", shadow_id, i);
        let pick = |right: bool| if right == win { 7.5 } else { 2.5 };
        f.engine
            .registry()
            .insert_prediction(&NewShadowPrediction {
                shadow_model_id: shadow_id.to_string(),
                signal_id: signal_id.clone(),
                shadow_score: pick(i < shadow_right),
                incumbent_score: pick(i < incumbent_right),
                created_at: Utc::now(),
            })
            .unwrap();
        f.truth
            .insert(signal_id, OutcomeHorizon::EndOfDay, if win { 0.8 } else { -0.3 });
    }
}

#[tokio::test]
async fn test_training_keeps_generalizers_and_rejects_memorizer() {
    let mut config = EvolutionConfig::default();
    config.trainer.candidates = vec![
        CandidateSpec::new(Algorithm::GradientBoosting)
            .with("n_estimators", 300.0)
            .with("learning_rate", 0.5)
            .with("max_depth", 8.0)
            .with("min_samples_leaf", 1.0),
        CandidateSpec::new(Algorithm::RandomForest)
            .with("n_estimators", 30.0)
            .with("max_depth", 2.0)
            .with("min_samples_leaf", 10.0)
            .with("max_features", 1.0),
        CandidateSpec::new(Algorithm::NeuralNet)
            .with("hidden_units", 4.0)
            .with("epochs", 100.0),
    ];
    let now = Utc::now();
    let f = fixture(config, labelled_history(now - Duration::days(3)));

    let report = f.engine.train_candidates_at(now).await.unwrap();

    assert_eq!(report.rows, 200);
    assert!(report.failed.is_empty(), "{:?}", report.failed);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].algorithm, Algorithm::GradientBoosting);
    assert!(report.rejected[0].overfit_gap > 0.25);
    assert_eq!(report.trained.len(), 2);

    let validating = f.engine.registry().list_validating().unwrap();
    assert_eq!(validating.len(), 2);
    for shadow in &validating {
        assert!(shadow.train_score.unwrap() - shadow.test_score.unwrap() <= 0.25);
        assert!(f.engine.artifacts().resolve(&shadow.model_path).exists());
        assert!(f.engine.artifacts().resolve(&shadow.scaler_path).exists());
        assert_eq!(shadow.validation_start, Some(shadow.created_at));
    }
    assert_eq!(f.engine.registry().list_rejections().unwrap().len(), 1);

    // Live traffic reaches every VALIDATING shadow.
    let handle = f.engine.spawn_recorder();
    for i in 0..30 {
        let x0 = if i % 2 == 0 { 1.2 } else { -1.2 };
        handle.submit(format!("live-{}", i), vec![x0, 0.1, -0.2, 0.3], 6.0);
    }
    let mut done = false;
    for _ in 0..300 {
        done = validating
            .iter()
            .all(|s| f.engine.registry().predictions_for(&s.id).unwrap().len() == 30);
        if done {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert!(done);
}

#[tokio::test]
async fn test_winner_is_promoted_and_scorer_reloads_it() {
    let f = fixture(EvolutionConfig::default(), Vec::new());
    let (old_model, old_scaler) = fitted(12);
    f.engine
        .artifacts()
        .install_incumbent(&old_model, &old_scaler)
        .unwrap();
    let scorer = Arc::new(IncumbentHandle::load(f.engine.artifacts().clone()).unwrap());
    f.engine.register_reloader(scorer.clone());

    let start = Utc::now();
    let shadow = register_shadow(&f.engine, "winner", 6, start);
    seed_ledger(&f, "winner", 100, 62, 55);

    let results = f
        .engine
        .evaluate_candidates_at(start + Duration::hours(73))
        .await
        .unwrap();

    assert_eq!(results.len(), 1);
    assert!(results[0].promoted);
    assert!(f.engine.artifacts().backup_exists());

    let status = f.engine.status(None).unwrap();
    assert_eq!(status.incumbent.generation, 1);
    assert_eq!(status.incumbent.shadow_model_id.as_deref(), Some("winner"));
    assert_eq!(status.shadows[0].status, ShadowStatus::Promoted);

    // The reloaded scorer now scores exactly like the promoted shadow.
    let promoted = f
        .engine
        .artifacts()
        .load_scoring_artifact(&shadow.model_path, &shadow.scaler_path)
        .unwrap();
    for x in [0.0, 5.5, 9.0, 17.0] {
        assert_eq!(scorer.score(&[x]).unwrap(), promoted.score(&[x]).unwrap());
    }
    assert_eq!(scorer.reloads(), 2);

    // Rollback puts the previous incumbent back in front of the scorer.
    let generation = f.engine.rollback().await.unwrap();
    assert_eq!(generation, 2);
    let (old_model, old_scaler) = fitted(12);
    let old = shadow_evolution::ml::ScoringArtifact::new(old_model, old_scaler);
    assert_eq!(scorer.score(&[9.0]).unwrap(), old.score(&[9.0]).unwrap());
}

#[tokio::test]
async fn test_marginal_shadow_expires_and_incumbent_is_untouched() {
    let f = fixture(EvolutionConfig::default(), Vec::new());
    let (model, scaler) = fitted(12);
    f.engine.artifacts().install_incumbent(&model, &scaler).unwrap();
    let before = std::fs::read(f.engine.artifacts().resolve(INCUMBENT_MODEL)).unwrap();

    let start = Utc::now();
    register_shadow(&f.engine, "marginal", 6, start);
    seed_ledger(&f, "marginal", 100, 56, 55);

    let results = f
        .engine
        .evaluate_candidates_at(start + Duration::hours(73))
        .await
        .unwrap();

    assert_eq!(results[0].reason, Some(ExpiryReason::BelowMargin));
    let row = f.engine.registry().get("marginal").unwrap().unwrap();
    assert_eq!(row.status, ShadowStatus::Expired);
    assert!((row.validation_accuracy.unwrap() - 0.56).abs() < 1e-12);
    assert!((row.incumbent_accuracy.unwrap() - 0.55).abs() < 1e-12);
    assert_eq!(
        std::fs::read(f.engine.artifacts().resolve(INCUMBENT_MODEL)).unwrap(),
        before
    );
    assert!(!f.engine.artifacts().backup_exists());
    assert_eq!(f.engine.status(None).unwrap().incumbent.generation, 0);
}

#[tokio::test]
async fn test_thin_ledger_expires_for_insufficient_sample() {
    let f = fixture(EvolutionConfig::default(), Vec::new());
    let start = Utc::now();
    register_shadow(&f.engine, "thin", 6, start);
    seed_ledger(&f, "thin", 8, 8, 0);

    let results = f
        .engine
        .evaluate_candidates_at(start + Duration::hours(73))
        .await
        .unwrap();

    assert_eq!(results[0].reason, Some(ExpiryReason::InsufficientSample));
    assert!(!results[0].promoted);
    assert_eq!(
        f.engine.registry().get("thin").unwrap().unwrap().status_reason.as_deref(),
        Some("insufficient_sample")
    );
}

#[tokio::test]
async fn test_cleanup_reclaims_only_past_retention() {
    let f = fixture(EvolutionConfig::default(), Vec::new());
    let now = Utc::now();
    let old = register_shadow(&f.engine, "old", 6, now - Duration::days(20));
    let recent = register_shadow(&f.engine, "recent", 8, now - Duration::days(5));
    seed_ledger(&f, "old", 5, 5, 5);
    for id in ["old", "recent"] {
        f.engine
            .registry()
            .expire(id, ExpiryReason::BelowMargin, now - Duration::days(1))
            .unwrap();
    }

    let report = f.engine.cleanup_at(14, now).unwrap();

    assert_eq!(report.models_removed, 1);
    assert_eq!(report.files_removed, 2);
    assert_eq!(report.predictions_removed, 5);
    assert!(f.engine.registry().get("old").unwrap().is_none());
    assert!(f.engine.registry().predictions_for("old").unwrap().is_empty());
    assert!(!f.engine.artifacts().resolve(&old.model_path).exists());

    assert!(f.engine.registry().get("recent").unwrap().is_some());
    assert!(f.engine.artifacts().resolve(&recent.model_path).exists());

    // Already-missing files are not an error on a second pass.
    let again = f.engine.cleanup_at(14, now).unwrap();
    assert_eq!(again.models_removed, 0);
}
