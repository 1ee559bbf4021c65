//! Background job loop for the `run` daemon.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use super::engine::ShadowEvolutionEngine;
use crate::config::ScheduleConfig;

pub struct Scheduler {
    engine: Arc<ShadowEvolutionEngine>,
    schedule: ScheduleConfig,
    retention_days: u32,
}

impl Scheduler {
    pub fn new(engine: Arc<ShadowEvolutionEngine>) -> Self {
        let schedule = engine.config().schedule.clone();
        let retention_days = engine.config().janitor.retention_days;
        Self {
            engine,
            schedule,
            retention_days,
        }
    }

    /// Drive training, evaluation and cleanup until `shutdown` resolves.
    /// Each job fires once immediately, then on its interval.
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut train = interval(hours(self.schedule.train_interval_hours));
        let mut evaluate = interval(Duration::from_secs(
            self.schedule.evaluate_interval_minutes.max(1) * 60,
        ));
        let mut cleanup = interval(hours(self.schedule.cleanup_interval_hours));
        for ticker in [&mut train, &mut evaluate, &mut cleanup] {
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        }

        info!(
            train_hours = self.schedule.train_interval_hours,
            evaluate_minutes = self.schedule.evaluate_interval_minutes,
            cleanup_hours = self.schedule.cleanup_interval_hours,
            "⏱️ Scheduler started"
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = train.tick() => {
                    match self.engine.train_candidates().await {
                        Ok(report) => info!(
                            trained = report.trained.len(),
                            rejected = report.rejected.len(),
                            failed = report.failed.len(),
                            "Scheduled training finished"
                        ),
                        Err(e) => error!(error = %e, "❌ Scheduled training failed"),
                    }
                }
                _ = evaluate.tick() => {
                    if let Err(e) = self.engine.evaluate_candidates().await {
                        error!(error = %e, "❌ Scheduled evaluation failed");
                    }
                }
                _ = cleanup.tick() => {
                    // Registry and file deletes are blocking I/O.
                    let engine = self.engine.clone();
                    let days = self.retention_days;
                    match tokio::task::spawn_blocking(move || engine.cleanup(days)).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!(error = %e, "❌ Scheduled cleanup failed"),
                        Err(e) => error!(error = %e, "❌ Scheduled cleanup task panicked"),
                    }
                }
            }
        }
    }
}

fn hours(h: u64) -> Duration {
    Duration::from_secs(h.max(1) * 3600)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvolutionConfig;
    use crate::evolution::artifacts::ArtifactStore;
    use crate::evolution::registry::ShadowRegistry;
    use crate::providers::{InMemoryGroundTruth, StaticTrainingData};

    #[tokio::test]
    async fn test_runs_each_job_once_then_stops() {
        let dir = tempfile::tempdir().unwrap();
        let engine = ShadowEvolutionEngine::from_parts(
            EvolutionConfig::default(),
            ShadowRegistry::in_memory().unwrap(),
            Arc::new(ArtifactStore::open(dir.path()).unwrap()),
            Arc::new(StaticTrainingData::new(Vec::new())),
            Arc::new(InMemoryGroundTruth::new()),
        )
        .unwrap();
        let engine = Arc::new(engine);

        let scheduler = Scheduler::new(engine.clone());
        let shutdown = tokio::time::sleep(Duration::from_millis(200));
        tokio::time::timeout(Duration::from_secs(10), scheduler.run(shutdown))
            .await
            .unwrap();

        let m = engine.metrics();
        assert_eq!(m.training_runs.load(std::sync::atomic::Ordering::Relaxed), 1);
        assert_eq!(m.training_runs_skipped.load(std::sync::atomic::Ordering::Relaxed), 1);
    }
}
