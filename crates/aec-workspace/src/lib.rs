//! # aec-workspace
//!
//! Everything that touches the live source tree when a patch is applied.
//!
//! ## Key components
//!
//! - [`SafetyValidator`] — checks a generated patch before any file I/O.
//!   Path escapes are fatal; critical-file touches, a dirty working tree,
//!   and oversized files are warnings that flag the patch for review.
//! - [`BackupManager`] — timestamped, file-by-file copies under
//!   `<project>/.aec-backups/<timestamp>/`, the only sanctioned undo path.
//! - [`PatchApplicator`] — backup, branch, write, commit; per-file failures
//!   are isolated, and rollback always goes through a backup.

pub mod applicator;
pub mod backup;
pub mod error;
pub mod safety;

pub use applicator::{ApplyOptions, ApplyReport, FileApplyResult, PatchApplicator, RollbackReport};
pub use backup::{Backup, BackupManager, RestoreReport, BACKUP_DIR_NAME};
pub use error::WorkspaceError;
pub use safety::{resolve_project_path, SafetyConfig, SafetyReport, SafetyValidator};
