// error.rs — Error types for the orchestrator.

use aec_lifecycle::{ErrorId, LifecycleError};
use thiserror::Error;
use uuid::Uuid;

/// A diagnostic or patch oracle could not produce a usable answer.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("oracle returned {status}: {body}")]
    Server { status: u16, body: String },

    /// The response parsed as JSON but does not match the contract.
    #[error("invalid oracle response: {0}")]
    InvalidResponse(String),

    #[error("no oracle endpoint configured")]
    NotConfigured,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Workspace(#[from] aec_workspace::WorkspaceError),

    #[error(transparent)]
    Oracle(#[from] OracleError),

    #[error("error {0} not found")]
    ErrorNotFound(ErrorId),

    #[error("patch {0} not found")]
    PatchNotFound(Uuid),

    #[error("no diagnostic recorded for error {0}")]
    DiagnosticNotFound(ErrorId),

    /// The request does not fit the current state of the error or patch.
    #[error("{0}")]
    InvalidState(String),

    #[error("command failed: {0}")]
    Command(String),

    #[error("background task failed: {0}")]
    Task(String),

    #[error("config error in {path}: {message}")]
    Config { path: String, message: String },
}
