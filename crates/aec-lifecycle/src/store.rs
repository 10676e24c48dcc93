// store.rs — RecordStore trait and its JSON file implementation.
//
// The store is the persistence handle passed explicitly to every component.
// It is opened by the process entry point and shared as `Arc<dyn RecordStore>`.
//
// Layout under the store directory:
//   errors/<error_id>.json
//   diagnostics/<error_id>.json     (one-to-one with the error)
//   patches/<patch_id>.json
//
// `compare_and_transition` is the mutual-exclusion primitive for pipelines:
// the check and the write happen under one lock, so two triggers racing on
// the same error cannot both observe `detected`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::detected_error::{DetectedError, ErrorId, ErrorStatus};
use crate::diagnostic::DiagnosticRecord;
use crate::error::LifecycleError;
use crate::patch::PatchRecord;

/// Persistence for errors, diagnostics, and patches.
pub trait RecordStore: Send + Sync {
    fn get_error(&self, error_id: ErrorId) -> Result<Option<DetectedError>, LifecycleError>;

    /// Create or overwrite an error record.
    fn save_error(&self, error: &DetectedError) -> Result<(), LifecycleError>;

    /// All errors, most recently updated first.
    fn list_errors(&self) -> Result<Vec<DetectedError>, LifecycleError>;

    /// Atomically move an error from `expected` to `next`.
    ///
    /// Returns `Ok(None)` without writing if the error is not currently in
    /// `expected`; that is the "someone else already owns this" signal.
    fn compare_and_transition(
        &self,
        error_id: ErrorId,
        expected: ErrorStatus,
        next: ErrorStatus,
    ) -> Result<Option<DetectedError>, LifecycleError>;

    /// Move an error to `next` from whatever status it is in, subject to the
    /// transition table.
    fn transition(&self, error_id: ErrorId, next: ErrorStatus)
        -> Result<DetectedError, LifecycleError>;

    fn get_diagnostic(&self, error_id: ErrorId)
        -> Result<Option<DiagnosticRecord>, LifecycleError>;

    fn save_diagnostic(&self, diagnostic: &DiagnosticRecord) -> Result<(), LifecycleError>;

    fn get_patch(&self, patch_id: Uuid) -> Result<Option<PatchRecord>, LifecycleError>;

    fn save_patch(&self, patch: &PatchRecord) -> Result<(), LifecycleError>;

    /// Patches generated for an error, oldest first.
    fn list_patches(&self, error_id: ErrorId) -> Result<Vec<PatchRecord>, LifecycleError>;

    fn list_errors_by_status(
        &self,
        status: ErrorStatus,
    ) -> Result<Vec<DetectedError>, LifecycleError> {
        Ok(self
            .list_errors()?
            .into_iter()
            .filter(|e| e.status == status)
            .collect())
    }

    /// The most recently generated patch for an error.
    fn latest_patch(&self, error_id: ErrorId) -> Result<Option<PatchRecord>, LifecycleError> {
        Ok(self.list_patches(error_id)?.pop())
    }
}

/// One JSON file per record, writes serialized behind a mutex.
pub struct JsonRecordStore {
    errors_dir: PathBuf,
    diagnostics_dir: PathBuf,
    patches_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonRecordStore {
    /// Open a store rooted at `store_dir`, creating the layout if needed.
    pub fn new(store_dir: impl AsRef<Path>) -> Result<Self, LifecycleError> {
        let root = store_dir.as_ref();
        let store = Self {
            errors_dir: root.join("errors"),
            diagnostics_dir: root.join("diagnostics"),
            patches_dir: root.join("patches"),
            write_lock: Mutex::new(()),
        };
        for dir in [&store.errors_dir, &store.diagnostics_dir, &store.patches_dir] {
            fs::create_dir_all(dir).map_err(|source| LifecycleError::IoError {
                path: dir.display().to_string(),
                source,
            })?;
        }
        Ok(store)
    }

    fn error_file(&self, error_id: ErrorId) -> PathBuf {
        self.errors_dir.join(format!("{}.json", error_id))
    }

    fn diagnostic_file(&self, error_id: ErrorId) -> PathBuf {
        self.diagnostics_dir.join(format!("{}.json", error_id))
    }

    fn patch_file(&self, patch_id: Uuid) -> PathBuf {
        self.patches_dir.join(format!("{}.json", patch_id))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, LifecycleError> {
        self.write_lock
            .lock()
            .map_err(|_| LifecycleError::LockPoisoned)
    }

    /// Load an error and apply a transition. Caller must hold the write lock.
    fn transition_locked(
        &self,
        error_id: ErrorId,
        expected: Option<ErrorStatus>,
        next: ErrorStatus,
    ) -> Result<Option<DetectedError>, LifecycleError> {
        let mut error = read_json::<DetectedError>(&self.error_file(error_id))?
            .ok_or(LifecycleError::ErrorNotFound(error_id))?;
        if let Some(expected) = expected {
            if error.status != expected {
                return Ok(None);
            }
        }
        let from = error.status;
        error.transition(next)?;
        write_json(&self.error_file(error_id), &error)?;
        tracing::debug!(error_id, %from, to = %next, "error status persisted");
        Ok(Some(error))
    }
}

impl RecordStore for JsonRecordStore {
    fn get_error(&self, error_id: ErrorId) -> Result<Option<DetectedError>, LifecycleError> {
        read_json(&self.error_file(error_id))
    }

    fn save_error(&self, error: &DetectedError) -> Result<(), LifecycleError> {
        let _guard = self.lock()?;
        write_json(&self.error_file(error.id), error)
    }

    fn list_errors(&self) -> Result<Vec<DetectedError>, LifecycleError> {
        let mut errors: Vec<DetectedError> = read_all(&self.errors_dir)?;
        errors.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(errors)
    }

    fn compare_and_transition(
        &self,
        error_id: ErrorId,
        expected: ErrorStatus,
        next: ErrorStatus,
    ) -> Result<Option<DetectedError>, LifecycleError> {
        let _guard = self.lock()?;
        self.transition_locked(error_id, Some(expected), next)
    }

    fn transition(
        &self,
        error_id: ErrorId,
        next: ErrorStatus,
    ) -> Result<DetectedError, LifecycleError> {
        let _guard = self.lock()?;
        self.transition_locked(error_id, None, next)?
            .ok_or(LifecycleError::ErrorNotFound(error_id))
    }

    fn get_diagnostic(
        &self,
        error_id: ErrorId,
    ) -> Result<Option<DiagnosticRecord>, LifecycleError> {
        read_json(&self.diagnostic_file(error_id))
    }

    fn save_diagnostic(&self, diagnostic: &DiagnosticRecord) -> Result<(), LifecycleError> {
        let _guard = self.lock()?;
        write_json(&self.diagnostic_file(diagnostic.error_id), diagnostic)
    }

    fn get_patch(&self, patch_id: Uuid) -> Result<Option<PatchRecord>, LifecycleError> {
        read_json(&self.patch_file(patch_id))
    }

    fn save_patch(&self, patch: &PatchRecord) -> Result<(), LifecycleError> {
        let _guard = self.lock()?;
        write_json(&self.patch_file(patch.patch_id()), patch)
    }

    fn list_patches(&self, error_id: ErrorId) -> Result<Vec<PatchRecord>, LifecycleError> {
        let mut patches: Vec<PatchRecord> = read_all::<PatchRecord>(&self.patches_dir)?
            .into_iter()
            .filter(|p| p.error_id() == error_id)
            .collect();
        patches.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(patches)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, LifecycleError> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path).map_err(|source| LifecycleError::IoError {
        path: path.display().to_string(),
        source,
    })?;
    Ok(Some(serde_json::from_str(&json)?))
}

/// Write via a temp file + rename so readers never see a half-written record.
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), LifecycleError> {
    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).map_err(|source| LifecycleError::IoError {
        path: tmp.display().to_string(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| LifecycleError::IoError {
        path: path.display().to_string(),
        source,
    })
}

/// Read every `*.json` record in a directory, skipping unparseable files.
fn read_all<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, LifecycleError> {
    let entries = fs::read_dir(dir).map_err(|source| LifecycleError::IoError {
        path: dir.display().to_string(),
        source,
    })?;

    let mut records = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LifecycleError::IoError {
            path: dir.display().to_string(),
            source,
        })?;
        let path = entry.path();
        if path.extension().is_some_and(|ext| ext == "json") {
            match read_json::<T>(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("skipping unreadable record {}: {}", path.display(), e),
            }
        }
    }
    Ok(records)
}
