//! SQLite-backed signal store
//!
//! Read side of the labelling pipeline's output: `labeled_signals` holds the
//! feature vector and cost-adjusted success label per signal, `signal_outcomes`
//! holds realized returns per (signal, horizon) as they become known.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use super::{GroundTruthProvider, OutcomeHorizon, TrainingDataProvider};
use crate::models::{from_millis, to_millis, TrainingExample};

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS labeled_signals (
    signal_id TEXT PRIMARY KEY,
    features_json TEXT NOT NULL,
    label REAL NOT NULL,
    observed_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_labeled_signals_observed
    ON labeled_signals(observed_at);

CREATE TABLE IF NOT EXISTS signal_outcomes (
    signal_id TEXT NOT NULL,
    horizon TEXT NOT NULL,
    outcome REAL NOT NULL,
    recorded_at INTEGER NOT NULL,
    PRIMARY KEY (signal_id, horizon)
) WITHOUT ROWID;
"#;

#[derive(Clone)]
pub struct SignalStore {
    conn: Arc<Mutex<Connection>>,
}

impl SignalStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path, flags)
            .with_context(|| format!("Failed to open signal store at {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize signal store schema")?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM labeled_signals", [], |row| row.get(0))
            .unwrap_or(0);
        info!(path = %path.display(), labeled = count, "Signal store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert or replace one labelled row.
    pub fn upsert_labeled(&self, row: &TrainingExample) -> Result<()> {
        let features_json = serde_json::to_string(&row.features)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO labeled_signals (signal_id, features_json, label, observed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![&row.signal_id, &features_json, row.label, to_millis(row.observed_at)],
        )?;
        Ok(())
    }

    /// Batch insert in a single transaction.
    pub fn upsert_labeled_batch(&self, rows: &[TrainingExample]) -> Result<usize> {
        let encoded: Vec<(String, &TrainingExample)> = rows
            .iter()
            .map(|r| -> Result<(String, &TrainingExample)> {
                Ok((serde_json::to_string(&r.features)?, r))
            })
            .collect::<Result<_>>()?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO labeled_signals
                 (signal_id, features_json, label, observed_at) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (features_json, row) in &encoded {
                stmt.execute(params![
                    &row.signal_id,
                    features_json,
                    row.label,
                    to_millis(row.observed_at)
                ])?;
            }
        }
        tx.commit()?;
        Ok(encoded.len())
    }

    pub fn record_outcome(
        &self,
        signal_id: &str,
        horizon: OutcomeHorizon,
        outcome: f64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO signal_outcomes (signal_id, horizon, outcome, recorded_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![signal_id, horizon.as_str(), outcome, to_millis(at)],
        )?;
        Ok(())
    }

    /// Labelled rows observed at or after `since`, oldest first.
    /// Rows whose feature JSON does not decode are skipped.
    pub fn labeled_since(&self, since: DateTime<Utc>) -> Result<Vec<TrainingExample>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT signal_id, features_json, label, observed_at FROM labeled_signals
             WHERE observed_at >= ?1 ORDER BY observed_at, signal_id",
        )?;
        let rows = stmt.query_map(params![to_millis(since)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (signal_id, features_json, label, observed_at) = row?;
            match serde_json::from_str::<Vec<f64>>(&features_json) {
                Ok(features) => out.push(TrainingExample {
                    signal_id,
                    features,
                    label,
                    observed_at: from_millis(observed_at),
                }),
                Err(e) => warn!(signal_id = %signal_id, error = %e, "Skipping undecodable feature row"),
            }
        }
        Ok(out)
    }

    pub fn outcome(&self, signal_id: &str, horizon: OutcomeHorizon) -> Result<Option<f64>> {
        let conn = self.conn.lock();
        Ok(conn
            .query_row(
                "SELECT outcome FROM signal_outcomes WHERE signal_id = ?1 AND horizon = ?2",
                params![signal_id, horizon.as_str()],
                |row| row.get(0),
            )
            .optional()?)
    }
}

#[async_trait::async_trait]
impl TrainingDataProvider for SignalStore {
    async fn fetch_training_set(&self, lookback_days: u32) -> Result<Vec<TrainingExample>> {
        let store = self.clone();
        let since = Utc::now() - Duration::days(i64::from(lookback_days));
        tokio::task::spawn_blocking(move || store.labeled_since(since))
            .await
            .context("training set query panicked")?
    }
}

#[async_trait::async_trait]
impl GroundTruthProvider for SignalStore {
    async fn realized_outcome(
        &self,
        signal_id: &str,
        horizon: OutcomeHorizon,
    ) -> Result<Option<f64>> {
        self.outcome(signal_id, horizon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: &str, days_ago: i64, label: f64) -> TrainingExample {
        TrainingExample {
            signal_id: id.to_string(),
            features: vec![1.0, 2.0, label],
            label,
            observed_at: Utc::now() - Duration::days(days_ago),
        }
    }

    #[tokio::test]
    async fn test_training_set_respects_lookback_and_order() {
        let store = SignalStore::in_memory().unwrap();
        store
            .upsert_labeled_batch(&[row("b", 5, 1.0), row("a", 10, 0.0), row("old", 200, 1.0)])
            .unwrap();

        let rows = store.fetch_training_set(90).await.unwrap();
        let ids: Vec<&str> = rows.iter().map(|r| r.signal_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(rows[1].features, vec![1.0, 2.0, 1.0]);
    }

    #[tokio::test]
    async fn test_outcome_lookup_by_horizon() {
        let store = SignalStore::in_memory().unwrap();
        store
            .record_outcome("sig", OutcomeHorizon::EndOfDay, 0.04, Utc::now())
            .unwrap();

        assert_eq!(
            store.realized_outcome("sig", OutcomeHorizon::EndOfDay).await.unwrap(),
            Some(0.04)
        );
        assert_eq!(
            store.realized_outcome("sig", OutcomeHorizon::OneHour).await.unwrap(),
            None
        );
        assert_eq!(
            store.realized_outcome("missing", OutcomeHorizon::EndOfDay).await.unwrap(),
            None
        );
    }

    #[test]
    fn test_undecodable_rows_skipped() {
        let store = SignalStore::in_memory().unwrap();
        store.upsert_labeled(&row("good", 1, 1.0)).unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO labeled_signals VALUES ('bad', 'not json', 1.0, ?1)",
                params![to_millis(Utc::now())],
            )
            .unwrap();

        let rows = store.labeled_since(Utc::now() - Duration::days(7)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].signal_id, "good");
    }
}
