//! Shadow Registry and Prediction Ledger
//!
//! SQLite-backed store that exclusively owns shadow model rows and their
//! parallel predictions. Timestamps are stored as Unix milliseconds.
//!
//! Every status change is a guarded update (`WHERE status = 'VALIDATING'`), so
//! a row can never regress to an earlier lifecycle state: an update that
//! matches zero rows surfaces as [`RegistryError::InvalidTransition`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::models::{
    from_millis, to_millis, EvaluationRecord, ExpiryReason, IncumbentState, NewShadowModel,
    NewShadowPrediction, RejectedCandidate, ShadowModel, ShadowPrediction, ShadowStatus,
};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA temp_store = MEMORY;

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS shadow_models (
    id TEXT PRIMARY KEY,
    algorithm TEXT NOT NULL,
    hyperparameters_json TEXT NOT NULL,
    model_path TEXT NOT NULL UNIQUE,
    scaler_path TEXT NOT NULL UNIQUE,
    artifact_digest TEXT NOT NULL,
    status TEXT NOT NULL,
    status_reason TEXT,
    train_score REAL,
    test_score REAL,
    validation_accuracy REAL,
    incumbent_accuracy REAL,
    joined_predictions INTEGER,
    p_value REAL,
    created_at INTEGER NOT NULL,
    validation_start INTEGER,
    validation_end INTEGER,
    promoted_at INTEGER
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_shadow_models_status
    ON shadow_models(status, validation_start);

CREATE INDEX IF NOT EXISTS idx_shadow_models_created
    ON shadow_models(created_at);

CREATE TABLE IF NOT EXISTS shadow_predictions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    shadow_model_id TEXT NOT NULL REFERENCES shadow_models(id) ON DELETE CASCADE,
    signal_id TEXT NOT NULL,
    shadow_score REAL NOT NULL,
    incumbent_score REAL NOT NULL,
    actual_outcome REAL,
    created_at INTEGER NOT NULL,
    UNIQUE(shadow_model_id, signal_id)
);

CREATE INDEX IF NOT EXISTS idx_shadow_predictions_model
    ON shadow_predictions(shadow_model_id, created_at);

CREATE TABLE IF NOT EXISTS rejected_candidates (
    id TEXT PRIMARY KEY,
    algorithm TEXT NOT NULL,
    hyperparameters_json TEXT NOT NULL,
    train_score REAL NOT NULL,
    test_score REAL NOT NULL,
    overfit_gap REAL NOT NULL,
    rejected_at INTEGER NOT NULL
) WITHOUT ROWID;

CREATE TABLE IF NOT EXISTS incumbent_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    generation INTEGER NOT NULL,
    shadow_model_id TEXT,
    updated_at INTEGER NOT NULL
);

INSERT OR IGNORE INTO incumbent_state (id, generation, shadow_model_id, updated_at)
    VALUES (1, 0, NULL, 0);
"#;

const MODEL_COLUMNS: &str = "id, algorithm, hyperparameters_json, model_path, scaler_path, \
     artifact_digest, status, status_reason, train_score, test_score, validation_accuracy, \
     incumbent_accuracy, joined_predictions, p_value, created_at, validation_start, \
     validation_end, promoted_at";

const PREDICTION_COLUMNS: &str =
    "id, shadow_model_id, signal_id, shadow_score, incumbent_score, actual_outcome, created_at";

/// Shadow model registry and prediction ledger.
#[derive(Clone)]
pub struct ShadowRegistry {
    conn: Arc<Mutex<Connection>>,
}

impl ShadowRegistry {
    /// Open (creating if needed) the registry database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let conn = Connection::open_with_flags(path.as_ref(), flags)?;
        let registry = Self::init(conn)?;
        info!(path = %path.as_ref().display(), "📒 Shadow registry opened");
        Ok(registry)
    }

    pub fn in_memory() -> Result<Self, RegistryError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, RegistryError> {
        conn.execute_batch(SCHEMA_SQL)?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap_or_default();
        if journal_mode.to_lowercase() != "wal" && journal_mode.to_lowercase() != "memory" {
            warn!("WAL mode not active, journal_mode = {}", journal_mode);
        }

        let found: Option<i64> = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .optional()?
            .flatten();
        match found {
            None => {
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    params![SCHEMA_VERSION],
                )?;
            }
            Some(v) if v > SCHEMA_VERSION => {
                return Err(RegistryError::SchemaVersion {
                    found: v,
                    supported: SCHEMA_VERSION,
                })
            }
            Some(_) => {}
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    // =========================================================================
    // Shadow models
    // =========================================================================

    /// Insert a fully trained candidate directly as VALIDATING.
    pub fn register_candidate(
        &self,
        candidate: &NewShadowModel,
        validation_start: DateTime<Utc>,
    ) -> Result<ShadowModel, RegistryError> {
        let hyperparameters_json = serde_json::to_string(&candidate.hyperparameters)?;
        {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO shadow_models
                 (id, algorithm, hyperparameters_json, model_path, scaler_path, artifact_digest,
                  status, train_score, test_score, created_at, validation_start)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    &candidate.id,
                    candidate.algorithm.as_str(),
                    &hyperparameters_json,
                    &candidate.model_path,
                    &candidate.scaler_path,
                    &candidate.artifact_digest,
                    ShadowStatus::Validating.as_str(),
                    candidate.train_score,
                    candidate.test_score,
                    to_millis(candidate.created_at),
                    to_millis(validation_start),
                ],
            )?;
        }
        debug!(shadow_id = %candidate.id, algorithm = %candidate.algorithm, "Registered shadow");
        self.get(&candidate.id)?
            .ok_or_else(|| RegistryError::NotFound(candidate.id.clone()))
    }

    pub fn get(&self, id: &str) -> Result<Option<ShadowModel>, RegistryError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {} FROM shadow_models WHERE id = ?1", MODEL_COLUMNS);
        Ok(conn.query_row(&sql, params![id], map_model).optional()?)
    }

    /// All shadows, optionally filtered by status, oldest first.
    pub fn list(&self, status: Option<ShadowStatus>) -> Result<Vec<ShadowModel>, RegistryError> {
        let conn = self.conn.lock();
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM shadow_models WHERE status = ?1 ORDER BY created_at, id",
                    MODEL_COLUMNS
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map(params![status.as_str()], map_model)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM shadow_models ORDER BY created_at, id",
                    MODEL_COLUMNS
                );
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt.query_map([], map_model)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        Ok(rows)
    }

    pub fn list_validating(&self) -> Result<Vec<ShadowModel>, RegistryError> {
        self.list(Some(ShadowStatus::Validating))
    }

    /// VALIDATING shadows whose window started at or before `started_before`.
    pub fn due_for_evaluation(
        &self,
        started_before: DateTime<Utc>,
    ) -> Result<Vec<ShadowModel>, RegistryError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM shadow_models
             WHERE status = ?1 AND validation_start <= ?2
             ORDER BY validation_start, id",
            MODEL_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![ShadowStatus::Validating.as_str(), to_millis(started_before)],
            map_model,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Status -> row count, for operator summaries.
    pub fn count_by_status(&self) -> Result<BTreeMap<String, usize>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare_cached("SELECT status, COUNT(*) FROM shadow_models GROUP BY status")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut out = BTreeMap::new();
        for row in rows {
            let (status, count) = row?;
            out.insert(status, count.max(0) as usize);
        }
        Ok(out)
    }

    /// Persist evaluation scores. Written whatever the outcome.
    pub fn record_evaluation(
        &self,
        id: &str,
        record: &EvaluationRecord,
    ) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE shadow_models
             SET validation_accuracy = ?2, incumbent_accuracy = ?3, joined_predictions = ?4,
                 p_value = ?5, validation_end = ?6
             WHERE id = ?1",
            params![
                id,
                record.validation_accuracy,
                record.incumbent_accuracy,
                record.joined_predictions as i64,
                record.p_value,
                to_millis(record.validation_end),
            ],
        )?;
        if changed == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    /// VALIDATING -> EXPIRED.
    pub fn expire(
        &self,
        id: &str,
        reason: ExpiryReason,
        at: DateTime<Utc>,
    ) -> Result<(), RegistryError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE shadow_models
             SET status = ?2, status_reason = ?3, validation_end = COALESCE(validation_end, ?4)
             WHERE id = ?1 AND status = ?5",
            params![
                id,
                ShadowStatus::Expired.as_str(),
                reason.as_str(),
                to_millis(at),
                ShadowStatus::Validating.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(invalid_transition(&conn, id, ShadowStatus::Expired));
        }
        Ok(())
    }

    /// VALIDATING -> PROMOTED, bumping the incumbent generation in the same
    /// transaction. Returns the new generation.
    pub fn mark_promoted(&self, id: &str, at: DateTime<Utc>) -> Result<u64, RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE shadow_models SET status = ?2, promoted_at = ?3
             WHERE id = ?1 AND status = ?4",
            params![
                id,
                ShadowStatus::Promoted.as_str(),
                to_millis(at),
                ShadowStatus::Validating.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(invalid_transition(&tx, id, ShadowStatus::Promoted));
        }
        let generation = bump_generation_in(&tx, Some(id), at)?;
        tx.commit()?;
        Ok(generation)
    }

    /// Bump the generation without a promotion (operator rollback).
    pub fn bump_generation(
        &self,
        shadow_model_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<u64, RegistryError> {
        let conn = self.conn.lock();
        bump_generation_in(&conn, shadow_model_id, at)
    }

    pub fn incumbent_state(&self) -> Result<IncumbentState, RegistryError> {
        let conn = self.conn.lock();
        let state = conn.query_row(
            "SELECT generation, shadow_model_id, updated_at FROM incumbent_state WHERE id = 1",
            [],
            |row| {
                Ok(IncumbentState {
                    generation: row.get::<_, i64>(0)?.max(0) as u64,
                    shadow_model_id: row.get(1)?,
                    updated_at: from_millis(row.get(2)?),
                })
            },
        )?;
        Ok(state)
    }

    /// EXPIRED or FAILED shadows created before `created_before`.
    pub fn reclaimable(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<ShadowModel>, RegistryError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM shadow_models
             WHERE status IN (?1, ?2) AND created_at < ?3
             ORDER BY created_at, id",
            MODEL_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(
            params![
                ShadowStatus::Expired.as_str(),
                ShadowStatus::Failed.as_str(),
                to_millis(created_before)
            ],
            map_model,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Delete a terminal, non-promoted shadow and its predictions.
    /// Returns the number of predictions removed.
    pub fn delete_model(&self, id: &str) -> Result<usize, RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let predictions = tx.execute(
            "DELETE FROM shadow_predictions WHERE shadow_model_id = ?1",
            params![id],
        )?;
        let removed = tx.execute(
            "DELETE FROM shadow_models WHERE id = ?1 AND status IN (?2, ?3)",
            params![
                id,
                ShadowStatus::Expired.as_str(),
                ShadowStatus::Failed.as_str()
            ],
        )?;
        if removed == 0 {
            // Rolls back the prediction delete as well.
            return Err(RegistryError::NotFound(id.to_string()));
        }
        tx.commit()?;
        Ok(predictions)
    }

    // =========================================================================
    // Prediction ledger
    // =========================================================================

    /// Append one prediction. Returns false when the (shadow, signal) pair
    /// was already recorded.
    pub fn insert_prediction(&self, p: &NewShadowPrediction) -> Result<bool, RegistryError> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO shadow_predictions
             (shadow_model_id, signal_id, shadow_score, incumbent_score, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                &p.shadow_model_id,
                &p.signal_id,
                p.shadow_score,
                p.incumbent_score,
                to_millis(p.created_at),
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn predictions_for(&self, shadow_id: &str) -> Result<Vec<ShadowPrediction>, RegistryError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM shadow_predictions WHERE shadow_model_id = ?1 ORDER BY created_at, id",
            PREDICTION_COLUMNS
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![shadow_id], map_prediction)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Fill a still-null outcome. Returns false if it was already set.
    pub fn fill_outcome(&self, prediction_id: i64, outcome: f64) -> Result<bool, RegistryError> {
        Ok(self.fill_outcomes(&[(prediction_id, outcome)])? > 0)
    }

    /// Fill a batch of still-null outcomes in one transaction. Returns how
    /// many rows changed.
    pub fn fill_outcomes(&self, outcomes: &[(i64, f64)]) -> Result<usize, RegistryError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut changed = 0;
        {
            let mut stmt = tx.prepare_cached(
                "UPDATE shadow_predictions SET actual_outcome = ?2
                 WHERE id = ?1 AND actual_outcome IS NULL",
            )?;
            for (prediction_id, outcome) in outcomes {
                changed += stmt.execute(params![prediction_id, outcome])?;
            }
        }
        tx.commit()?;
        Ok(changed)
    }

    pub fn joined_count(&self, shadow_id: &str) -> Result<usize, RegistryError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM shadow_predictions
             WHERE shadow_model_id = ?1 AND actual_outcome IS NOT NULL",
            params![shadow_id],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    // =========================================================================
    // Overfit rejections
    // =========================================================================

    pub fn record_rejection(&self, r: &RejectedCandidate) -> Result<(), RegistryError> {
        let hyperparameters_json = serde_json::to_string(&r.hyperparameters)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO rejected_candidates
             (id, algorithm, hyperparameters_json, train_score, test_score, overfit_gap, rejected_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                &r.id,
                r.algorithm.as_str(),
                &hyperparameters_json,
                r.train_score,
                r.test_score,
                r.overfit_gap,
                to_millis(r.rejected_at),
            ],
        )?;
        Ok(())
    }

    pub fn list_rejections(&self) -> Result<Vec<RejectedCandidate>, RegistryError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT id, algorithm, hyperparameters_json, train_score, test_score, overfit_gap,
                    rejected_at
             FROM rejected_candidates ORDER BY rejected_at, id",
        )?;
        let rows = stmt.query_map([], |row| {
            let algorithm: String = row.get(1)?;
            let hyperparameters: String = row.get(2)?;
            Ok(RejectedCandidate {
                id: row.get(0)?,
                algorithm: parse_text(1, &algorithm)?,
                hyperparameters: serde_json::from_str(&hyperparameters)
                    .map_err(|e| conversion_err(2, e))?,
                train_score: row.get(3)?,
                test_score: row.get(4)?,
                overfit_gap: row.get(5)?,
                rejected_at: from_millis(row.get(6)?),
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn prune_rejections(&self, rejected_before: DateTime<Utc>) -> Result<usize, RegistryError> {
        let conn = self.conn.lock();
        Ok(conn.execute(
            "DELETE FROM rejected_candidates WHERE rejected_at < ?1",
            params![to_millis(rejected_before)],
        )?)
    }

    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> Result<usize, RegistryError> {
        Ok(self.conn.lock().execute(sql, [])?)
    }
}

fn bump_generation_in(
    conn: &Connection,
    shadow_model_id: Option<&str>,
    at: DateTime<Utc>,
) -> Result<u64, RegistryError> {
    conn.execute(
        "UPDATE incumbent_state
         SET generation = generation + 1, shadow_model_id = ?1, updated_at = ?2
         WHERE id = 1",
        params![shadow_model_id, to_millis(at)],
    )?;
    let generation: i64 =
        conn.query_row("SELECT generation FROM incumbent_state WHERE id = 1", [], |row| {
            row.get(0)
        })?;
    Ok(generation.max(0) as u64)
}

fn invalid_transition(conn: &Connection, id: &str, to: ShadowStatus) -> RegistryError {
    let current: Option<String> = conn
        .query_row(
            "SELECT status FROM shadow_models WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()
        .ok()
        .flatten();
    match current {
        None => RegistryError::NotFound(id.to_string()),
        Some(status) => RegistryError::InvalidTransition {
            id: id.to_string(),
            from: status.parse().ok(),
            to,
        },
    }
}

fn map_model(row: &Row<'_>) -> rusqlite::Result<ShadowModel> {
    let algorithm: String = row.get(1)?;
    let hyperparameters: String = row.get(2)?;
    let status: String = row.get(6)?;
    Ok(ShadowModel {
        id: row.get(0)?,
        algorithm: parse_text(1, &algorithm)?,
        hyperparameters: serde_json::from_str(&hyperparameters)
            .map_err(|e| conversion_err(2, e))?,
        model_path: row.get(3)?,
        scaler_path: row.get(4)?,
        artifact_digest: row.get(5)?,
        status: parse_text(6, &status)?,
        status_reason: row.get(7)?,
        train_score: row.get(8)?,
        test_score: row.get(9)?,
        validation_accuracy: row.get(10)?,
        incumbent_accuracy: row.get(11)?,
        joined_predictions: row.get(12)?,
        p_value: row.get(13)?,
        created_at: from_millis(row.get(14)?),
        validation_start: row.get::<_, Option<i64>>(15)?.map(from_millis),
        validation_end: row.get::<_, Option<i64>>(16)?.map(from_millis),
        promoted_at: row.get::<_, Option<i64>>(17)?.map(from_millis),
    })
}

fn map_prediction(row: &Row<'_>) -> rusqlite::Result<ShadowPrediction> {
    Ok(ShadowPrediction {
        id: row.get(0)?,
        shadow_model_id: row.get(1)?,
        signal_id: row.get(2)?,
        shadow_score: row.get(3)?,
        incumbent_score: row.get(4)?,
        actual_outcome: row.get(5)?,
        created_at: from_millis(row.get(6)?),
    })
}

fn parse_text<T: FromStr<Err = String>>(idx: usize, s: &str) -> rusqlite::Result<T> {
    s.parse()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// Errors from the shadow registry.
#[derive(Debug)]
pub enum RegistryError {
    Sqlite(rusqlite::Error),
    Serialization(serde_json::Error),
    NotFound(String),
    InvalidTransition {
        id: String,
        from: Option<ShadowStatus>,
        to: ShadowStatus,
    },
    SchemaVersion {
        found: i64,
        supported: i64,
    },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "Registry database error: {}", e),
            Self::Serialization(e) => write!(f, "Registry serialization error: {}", e),
            Self::NotFound(id) => write!(f, "Shadow model not found: {}", id),
            Self::InvalidTransition { id, from, to } => match from {
                Some(from) => write!(f, "Invalid transition for {}: {} -> {}", id, from, to),
                None => write!(f, "Invalid transition for {}: unknown -> {}", id, to),
            },
            Self::SchemaVersion { found, supported } => write!(
                f,
                "Registry schema version {} is newer than supported version {}",
                found, supported
            ),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Sqlite(e) => Some(e),
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for RegistryError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

impl From<serde_json::Error> for RegistryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

