//! Model Artifact Store
//!
//! Flat directory of JSON blobs addressed by stable file names.
//!
//! ```text
//! artifact_dir/
//! ├── shadow_{algorithm}_{timestamp}_model.json      (candidate blobs, never overwritten)
//! ├── shadow_{algorithm}_{timestamp}_scaler.json
//! ├── incumbent_model.json                            (canonical pair read by the scorer)
//! ├── incumbent_scaler.json
//! ├── incumbent_model.json.pre_shadow_backup          (single-generation backup)
//! ├── incumbent_scaler.json.pre_shadow_backup
//! └── promotion.lock                                  (present while a swap is in flight)
//! ```
//!
//! The canonical pair is only ever replaced through [`ArtifactStore::swap_incumbent`]:
//! both new files are staged and verified first, the current pair is staged and
//! renamed onto the backup paths, then each staged file is renamed over its
//! canonical path.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use crate::ml::{Algorithm, Model, ModelError, ScoringArtifact, StandardScaler, Trainable};

pub const INCUMBENT_MODEL: &str = "incumbent_model.json";
pub const INCUMBENT_SCALER: &str = "incumbent_scaler.json";
pub const BACKUP_SUFFIX: &str = ".pre_shadow_backup";
const STAGING_SUFFIX: &str = ".staging";
const LOCK_FILE: &str = "promotion.lock";
const MAX_NAME_ATTEMPTS: usize = 1_000;

/// File names (relative to the store root) of a persisted candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub model_path: String,
    pub scaler_path: String,
    pub digest: String,
}

/// Result of a canonical swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    /// Whether a previous incumbent existed and was copied to the backup paths.
    pub backed_up: bool,
}

pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, ArtifactError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn backup_name(canonical: &str) -> String {
        format!("{}{}", canonical, BACKUP_SUFFIX)
    }

    fn staging_name(canonical: &str) -> String {
        format!("{}{}", canonical, STAGING_SUFFIX)
    }

    /// Persist a freshly trained candidate under a new, unique timestamped name.
    pub fn persist_candidate(
        &self,
        algorithm: Algorithm,
        model: &Model,
        scaler: &StandardScaler,
        at: DateTime<Utc>,
    ) -> Result<ArtifactPaths, ArtifactError> {
        let model_bytes = serde_json::to_vec(model)?;
        let scaler_bytes = serde_json::to_vec(scaler)?;
        let digest = artifact_digest(&model_bytes, &scaler_bytes);
        let base = format!("shadow_{}_{}", algorithm, at.format("%Y%m%d_%H%M%S_%6f"));

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let stem = if attempt == 0 {
                base.clone()
            } else {
                format!("{}_{}", base, attempt)
            };
            let model_path = format!("{}_model.json", stem);
            let scaler_path = format!("{}_scaler.json", stem);

            let Some(mut model_file) = self.create_new(&model_path)? else {
                continue;
            };
            let Some(mut scaler_file) = self.create_new(&scaler_path)? else {
                drop(model_file);
                let _ = fs::remove_file(self.resolve(&model_path));
                continue;
            };

            let written = write_all_synced(&mut model_file, &model_bytes)
                .and_then(|_| write_all_synced(&mut scaler_file, &scaler_bytes));
            if let Err(e) = written {
                let _ = fs::remove_file(self.resolve(&model_path));
                let _ = fs::remove_file(self.resolve(&scaler_path));
                return Err(io_err(&self.resolve(&model_path))(e));
            }

            debug!(model = %model_path, scaler = %scaler_path, "Persisted candidate artifacts");
            return Ok(ArtifactPaths {
                model_path,
                scaler_path,
                digest,
            });
        }

        Err(ArtifactError::Io {
            path: self.resolve(&base).display().to_string(),
            source: io::Error::new(
                io::ErrorKind::AlreadyExists,
                "no free artifact name after repeated attempts",
            ),
        })
    }

    /// Create `name` only if it does not exist yet; `Ok(None)` on collision.
    fn create_new(&self, name: &str) -> Result<Option<File>, ArtifactError> {
        let path = self.resolve(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => Ok(Some(f)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Load and decode a model/scaler pair.
    pub fn load_scoring_artifact(
        &self,
        model_path: &str,
        scaler_path: &str,
    ) -> Result<ScoringArtifact, ArtifactError> {
        let model_bytes = self.read(model_path)?;
        let scaler_bytes = self.read(scaler_path)?;
        decode_pair(&model_bytes, &scaler_bytes)
    }

    pub fn load_incumbent(&self) -> Result<ScoringArtifact, ArtifactError> {
        self.load_scoring_artifact(INCUMBENT_MODEL, INCUMBENT_SCALER)
    }

    pub fn incumbent_exists(&self) -> bool {
        self.resolve(INCUMBENT_MODEL).exists() && self.resolve(INCUMBENT_SCALER).exists()
    }

    pub fn backup_exists(&self) -> bool {
        self.resolve(&Self::backup_name(INCUMBENT_MODEL)).exists()
            && self.resolve(&Self::backup_name(INCUMBENT_SCALER)).exists()
    }

    fn read(&self, name: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.resolve(name);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(ArtifactError::NotFound(path.display().to_string()))
            }
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Digest of a stored pair, as recorded at persist time.
    pub fn digest_of(&self, model_path: &str, scaler_path: &str) -> Result<String, ArtifactError> {
        Ok(artifact_digest(&self.read(model_path)?, &self.read(scaler_path)?))
    }

    /// Install a pair as the canonical incumbent without taking a backup.
    /// Used to seed the very first incumbent.
    pub fn install_incumbent(
        &self,
        model: &Model,
        scaler: &StandardScaler,
    ) -> Result<(), ArtifactError> {
        let model_bytes = serde_json::to_vec(model)?;
        let scaler_bytes = serde_json::to_vec(scaler)?;
        decode_pair(&model_bytes, &scaler_bytes)?;
        self.install_pair(&model_bytes, &scaler_bytes, false)?;
        info!(algorithm = %model.algorithm(), "Seeded canonical incumbent");
        Ok(())
    }

    /// Replace the canonical incumbent with a candidate pair.
    ///
    /// The candidate must still match `expected_digest`. On any error before the
    /// first rename the canonical pair is untouched; a failure between the two
    /// renames restores the model file from backup and reports `PartialSwap`.
    pub fn swap_incumbent(
        &self,
        model_path: &str,
        scaler_path: &str,
        expected_digest: &str,
    ) -> Result<SwapOutcome, ArtifactError> {
        let model_bytes = self.read(model_path)?;
        let scaler_bytes = self.read(scaler_path)?;
        let actual = artifact_digest(&model_bytes, &scaler_bytes);
        if actual != expected_digest {
            return Err(ArtifactError::DigestMismatch {
                expected: expected_digest.to_string(),
                actual,
            });
        }
        decode_pair(&model_bytes, &scaler_bytes)?;

        let backed_up = self.install_pair(&model_bytes, &scaler_bytes, true)?;
        Ok(SwapOutcome { backed_up })
    }

    /// Put the backup pair back into canonical position.
    pub fn restore_backup(&self) -> Result<(), ArtifactError> {
        let model_bytes = self.read(&Self::backup_name(INCUMBENT_MODEL))?;
        let scaler_bytes = self.read(&Self::backup_name(INCUMBENT_SCALER))?;
        decode_pair(&model_bytes, &scaler_bytes)?;
        self.install_pair(&model_bytes, &scaler_bytes, false)?;
        warn!("Canonical incumbent restored from backup");
        Ok(())
    }

    fn install_pair(
        &self,
        model_bytes: &[u8],
        scaler_bytes: &[u8],
        take_backup: bool,
    ) -> Result<bool, ArtifactError> {
        let canonical_model = self.resolve(INCUMBENT_MODEL);
        let canonical_scaler = self.resolve(INCUMBENT_SCALER);
        let staged_model = self.resolve(&Self::staging_name(INCUMBENT_MODEL));
        let staged_scaler = self.resolve(&Self::staging_name(INCUMBENT_SCALER));

        let staged = write_file_synced(&staged_model, model_bytes)
            .and_then(|_| write_file_synced(&staged_scaler, scaler_bytes))
            .and_then(|_| {
                let m = fs::read(&staged_model).map_err(io_err(&staged_model))?;
                let s = fs::read(&staged_scaler).map_err(io_err(&staged_scaler))?;
                decode_pair(&m, &s).map(|_| ())
            });
        if let Err(e) = staged {
            let _ = fs::remove_file(&staged_model);
            let _ = fs::remove_file(&staged_scaler);
            return Err(e);
        }

        let backed_up = if take_backup && self.incumbent_exists() {
            if let Err(e) = self.backup_canonical_pair() {
                let _ = fs::remove_file(&staged_model);
                let _ = fs::remove_file(&staged_scaler);
                return Err(e);
            }
            true
        } else {
            false
        };

        if let Err(e) = fs::rename(&staged_model, &canonical_model) {
            let _ = fs::remove_file(&staged_model);
            let _ = fs::remove_file(&staged_scaler);
            return Err(io_err(&canonical_model)(e));
        }

        if let Err(e) = fs::rename(&staged_scaler, &canonical_scaler) {
            let restored = backed_up
                && self
                    .copy_file(
                        &self.resolve(&Self::backup_name(INCUMBENT_MODEL)),
                        &canonical_model,
                    )
                    .is_ok();
            let _ = fs::remove_file(&staged_scaler);
            error!(
                restored,
                error = %e,
                "🚨 Incumbent swap failed between model and scaler rename"
            );
            return Err(ArtifactError::PartialSwap {
                restored,
                detail: e.to_string(),
            });
        }

        sync_dir(&self.root);
        Ok(backed_up)
    }

    /// Copy the canonical pair to the backup paths as one generation.
    ///
    /// Both copies are staged before either is renamed. If the scaler rename
    /// fails the model backup is removed again, so a mixed pair is never left
    /// for `restore_backup` to install.
    fn backup_canonical_pair(&self) -> Result<(), ArtifactError> {
        let entries = [INCUMBENT_MODEL, INCUMBENT_SCALER].map(|name| {
            let backup = Self::backup_name(name);
            (
                self.resolve(name),
                self.resolve(&Self::staging_name(&backup)),
                self.resolve(&backup),
            )
        });
        let discard_staging = || {
            for (_, staging, _) in &entries {
                let _ = fs::remove_file(staging);
            }
        };

        for (canonical, staging, _) in &entries {
            let staged = fs::read(canonical)
                .map_err(io_err(canonical))
                .and_then(|bytes| write_file_synced(staging, &bytes));
            if let Err(e) = staged {
                discard_staging();
                return Err(e);
            }
        }

        let [(_, model_staging, model_backup), (_, scaler_staging, scaler_backup)] = &entries;
        if let Err(e) = fs::rename(model_staging, model_backup) {
            discard_staging();
            return Err(io_err(model_backup)(e));
        }
        if let Err(e) = fs::rename(scaler_staging, scaler_backup) {
            let _ = fs::remove_file(model_backup);
            discard_staging();
            error!(error = %e, "🚨 Backup pair incomplete; model backup discarded");
            return Err(io_err(scaler_backup)(e));
        }
        Ok(())
    }

    /// Copy via a staging file so `dst` is never observed half-written.
    fn copy_file(&self, src: &Path, dst: &Path) -> Result<(), ArtifactError> {
        let bytes = fs::read(src).map_err(io_err(src))?;
        let mut staging = dst.as_os_str().to_owned();
        staging.push(STAGING_SUFFIX);
        let staging = PathBuf::from(staging);
        write_file_synced(&staging, &bytes)?;
        fs::rename(&staging, dst).map_err(io_err(dst))
    }

    /// Remove the canonical pair, leaving no incumbent. Used when a first
    /// promotion cannot be committed and there is no backup to fall back to.
    pub fn clear_incumbent(&self) -> Result<(), ArtifactError> {
        self.remove(INCUMBENT_MODEL)?;
        self.remove(INCUMBENT_SCALER)?;
        sync_dir(&self.root);
        warn!("Canonical incumbent cleared");
        Ok(())
    }

    /// Delete a blob. A missing file is not an error.
    pub fn remove(&self, name: &str) -> Result<bool, ArtifactError> {
        let path = self.resolve(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_err(&path)(e)),
        }
    }

    /// Take the cross-process promotion lock.
    ///
    /// A leftover lock (e.g. after a crash mid-swap) is never broken
    /// automatically; an operator has to inspect the canonical pair and remove it.
    pub fn acquire_promotion_lock(&self) -> Result<PromotionLockGuard, ArtifactError> {
        let path = self.resolve(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(ArtifactError::LockHeld(path.display().to_string()))
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        let stamp = format!(
            "pid={} acquired_at={}\n",
            std::process::id(),
            Utc::now().to_rfc3339()
        );
        if let Err(e) = write_all_synced(&mut file, stamp.as_bytes()) {
            let _ = fs::remove_file(&path);
            return Err(io_err(&path)(e));
        }
        Ok(PromotionLockGuard { path })
    }
}

/// Removes the promotion lock file when dropped.
#[derive(Debug)]
pub struct PromotionLockGuard {
    path: PathBuf,
}

impl Drop for PromotionLockGuard {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release promotion lock");
        }
    }
}

/// SHA-256 over the model bytes followed by the scaler bytes, hex encoded.
pub fn artifact_digest(model_bytes: &[u8], scaler_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_bytes);
    hasher.update(scaler_bytes);
    hex::encode(hasher.finalize())
}

fn decode_pair(model_bytes: &[u8], scaler_bytes: &[u8]) -> Result<ScoringArtifact, ArtifactError> {
    let model: Model = serde_json::from_slice(model_bytes)?;
    let scaler: StandardScaler = serde_json::from_slice(scaler_bytes)?;
    if model.input_dim() != scaler.dim() {
        return Err(ArtifactError::Model(ModelError::DimensionMismatch {
            expected: scaler.dim(),
            got: model.input_dim(),
        }));
    }
    Ok(ScoringArtifact::new(model, scaler))
}

fn write_all_synced(file: &mut File, bytes: &[u8]) -> io::Result<()> {
    file.write_all(bytes)?;
    file.sync_all()
}

fn write_file_synced(path: &Path, bytes: &[u8]) -> Result<(), ArtifactError> {
    let mut file = File::create(path).map_err(io_err(path))?;
    write_all_synced(&mut file, bytes).map_err(io_err(path))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArtifactError + '_ {
    move |source| ArtifactError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Errors from the artifact store.
#[derive(Debug)]
pub enum ArtifactError {
    Io { path: String, source: io::Error },
    Serialization(serde_json::Error),
    Model(ModelError),
    NotFound(String),
    DigestMismatch { expected: String, actual: String },
    PartialSwap { restored: bool, detail: String },
    LockHeld(String),
}

impl std::fmt::Display for ArtifactError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "Artifact I/O error at {}: {}", path, source),
            Self::Serialization(e) => write!(f, "Artifact serialization error: {}", e),
            Self::Model(e) => write!(f, "Artifact model error: {}", e),
            Self::NotFound(path) => write!(f, "Artifact not found: {}", path),
            Self::DigestMismatch { expected, actual } => write!(
                f,
                "Artifact digest mismatch: expected {}, got {}",
                expected, actual
            ),
            Self::PartialSwap { restored, detail } => write!(
                f,
                "Incumbent swap failed part-way (model restored from backup: {}): {}",
                restored, detail
            ),
            Self::LockHeld(path) => write!(f, "Promotion lock already held: {}", path),
        }
    }
}

impl std::error::Error for ArtifactError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Serialization(e) => Some(e),
            Self::Model(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ArtifactError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<ModelError> for ArtifactError {
    fn from(e: ModelError) -> Self {
        Self::Model(e)
    }
}
