//! Core VcsAdapter trait and result types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur during VCS operations
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("VCS operation failed: {0}")]
    CommandFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Branch not found: {0}")]
    BranchNotFound(String),
}

pub type Result<T> = std::result::Result<T, VcsError>;

/// Result of a commit operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResult {
    /// Commit identifier (hash for git)
    pub commit_id: String,

    /// Human-readable message
    pub message: String,

    /// Adapter-specific metadata
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// One entry of recent history, with the files it touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary {
    pub hash: String,
    pub author: String,
    pub date: String,
    pub message: String,
    #[serde(default)]
    pub files: Vec<String>,
}

/// Working tree state as reported by the VCS
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingTreeStatus {
    /// Paths with uncommitted changes (excluding ignored tool directories)
    pub changed_paths: Vec<String>,
}

impl WorkingTreeStatus {
    pub fn is_clean(&self) -> bool {
        self.changed_paths.is_empty()
    }
}

/// The version-control primitives patch application relies on
///
/// Any VCS that supports these is sufficient. Implementations are
/// synchronous; callers on an async runtime should move them onto a
/// blocking thread.
pub trait VcsAdapter: Send + Sync {
    /// Name of the checked-out branch
    fn current_branch(&self) -> Result<String>;

    fn branch_exists(&self, name: &str) -> Result<bool>;

    /// Create a branch from HEAD and check it out
    fn checkout_new(&self, name: &str) -> Result<()>;

    /// Check out an existing branch
    fn checkout(&self, name: &str) -> Result<()>;

    /// Stage exactly the given project-relative paths
    fn add(&self, paths: &[String]) -> Result<()>;

    /// Commit the given paths only; anything else already staged stays
    /// staged and out of the commit
    fn commit(&self, message: &str, paths: &[String]) -> Result<CommitResult>;

    /// Uncommitted changes in the working tree
    fn status(&self) -> Result<WorkingTreeStatus>;

    /// Delete a branch. `force` discards unmerged work.
    fn delete_branch(&self, name: &str, force: bool) -> Result<()>;

    /// The last `limit` commits, newest first
    fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>>;

    /// Adapter display name (for CLI output)
    fn name(&self) -> &str;
}
