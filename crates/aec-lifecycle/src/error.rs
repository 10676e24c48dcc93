// error.rs — Error types for the lifecycle subsystem.

use thiserror::Error;
use uuid::Uuid;

use crate::detected_error::ErrorId;

/// Errors that can occur during lifecycle and persistence operations.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: String,
        source: std::io::Error,
    },

    /// Failed to serialize/deserialize a record.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The requested error record was not found.
    #[error("error record not found: {0}")]
    ErrorNotFound(ErrorId),

    /// The requested patch record was not found.
    #[error("patch record not found: {0}")]
    PatchNotFound(Uuid),

    /// No diagnostic has been persisted for the error.
    #[error("no diagnostic record for error {0}")]
    DiagnosticNotFound(ErrorId),

    /// Error status transition not in the transition table.
    #[error("invalid transition from {from} to {to} for error {error_id}")]
    InvalidTransition {
        error_id: ErrorId,
        from: String,
        to: String,
    },

    /// Patch status change rejected by the patch record's guards.
    #[error("invalid {field} change from {from} to {to} for patch {patch_id}")]
    InvalidPatchStatus {
        patch_id: Uuid,
        field: &'static str,
        from: String,
        to: String,
    },

    /// The store lock was poisoned by a panicking writer.
    #[error("record store lock poisoned")]
    LockPoisoned,

    /// A notification sink failed (non-fatal).
    #[error("notification error: {0}")]
    NotificationError(String),
}
