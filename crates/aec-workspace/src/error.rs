// error.rs — Error types for the workspace subsystem.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while validating, backing up, or applying patches.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// A file I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A path traversal attempt was detected (security violation).
    #[error("path traversal detected: '{path}' resolves outside the project root")]
    PathTraversal { path: String },

    /// Some target files could not be copied; the partial backup was discarded.
    #[error("backup incomplete: {}", .failures.join("; "))]
    BackupIncomplete { failures: Vec<String> },

    /// The requested backup does not exist.
    #[error("backup not found: {}", .path.display())]
    BackupNotFound { path: PathBuf },

    /// A version-control operation failed.
    #[error("vcs error: {0}")]
    Vcs(#[from] aec_submit::VcsError),

    /// Failed to read or write a backup manifest.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
