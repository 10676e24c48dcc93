// applicator.rs — Applies a generated patch to the live working tree.
//
// Sequence: resolve every path (escape aborts before any I/O), back up the
// targets, cut the patch branch, write files one by one, then stage and
// commit only the files that were written. A failing file never stops the
// others. A VCS failure after writes is reported but leaves the written
// files on disk; undoing them is the caller's choice via `rollback`.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use aec_lifecycle::GeneratedPatch;
use aec_submit::{CommitResult, VcsAdapter, VcsConfig};
use serde::{Deserialize, Serialize};

use crate::backup::{Backup, BackupManager, RestoreReport};
use crate::error::WorkspaceError;
use crate::safety::resolve_project_path;

/// Controls what `apply` does besides writing files.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ApplyOptions {
    pub create_branch: bool,
    pub create_backup: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            create_branch: true,
            create_backup: true,
        }
    }
}

/// Per-file outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileApplyResult {
    pub path: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Everything that happened during one apply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    /// True only if every file was written and the VCS steps succeeded.
    pub success: bool,
    pub applied_files: Vec<String>,
    pub files: Vec<FileApplyResult>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub backup: Option<Backup>,
    pub branch: Option<String>,
    pub commit: Option<CommitResult>,
}

impl ApplyReport {
    fn aborted(error: String) -> Self {
        Self {
            errors: vec![error],
            ..Self::default()
        }
    }
}

/// Result of undoing an applied patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RollbackReport {
    pub restore: RestoreReport,
    /// Non-fatal problems returning to the base branch.
    pub warnings: Vec<String>,
}

/// Writes patches into one project's working tree.
///
/// Holds a process-level lock so two applies (or an apply and a rollback)
/// never touch the tree at the same time.
pub struct PatchApplicator {
    project_root: PathBuf,
    vcs: Arc<dyn VcsAdapter>,
    vcs_config: VcsConfig,
    backups: BackupManager,
    tree_lock: Mutex<()>,
}

impl PatchApplicator {
    pub fn new(
        project_root: impl Into<PathBuf>,
        vcs: Arc<dyn VcsAdapter>,
        vcs_config: VcsConfig,
    ) -> Self {
        let project_root = project_root.into();
        let backups = BackupManager::new(project_root.clone());
        Self {
            project_root,
            vcs,
            vcs_config,
            backups,
            tree_lock: Mutex::new(()),
        }
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    pub fn apply(&self, patch: &GeneratedPatch, options: ApplyOptions) -> ApplyReport {
        let _guard = match self.tree_lock.lock() {
            Ok(guard) => guard,
            Err(_) => return ApplyReport::aborted("working tree lock poisoned".to_string()),
        };

        let mut targets = Vec::with_capacity(patch.files.len());
        for file in &patch.files {
            match resolve_project_path(&self.project_root, &file.path) {
                Ok(full) => targets.push(full),
                Err(e) => return ApplyReport::aborted(e.to_string()),
            }
        }

        let mut report = ApplyReport::default();

        if options.create_backup {
            match self.backups.create(&patch.paths()) {
                Ok(backup) => report.backup = Some(backup),
                Err(e) => {
                    report.errors.push(format!("backup failed: {}", e));
                    return report;
                }
            }
        } else {
            report
                .warnings
                .push("no backup taken; this patch cannot be rolled back".to_string());
        }

        if options.create_branch {
            let branch = self.vcs_config.branch_for(&patch.version);
            if let Err(e) = self.vcs.checkout_new(&branch) {
                report
                    .errors
                    .push(format!("could not create branch {}: {}", branch, e));
                return report;
            }
            report.branch = Some(branch);
        }

        for (file, target) in patch.files.iter().zip(&targets) {
            match write_file(target, &file.patched_content) {
                Ok(()) => {
                    tracing::debug!(path = %file.path, "applied file");
                    report.applied_files.push(file.path.clone());
                    report.files.push(FileApplyResult {
                        path: file.path.clone(),
                        success: true,
                        error: None,
                    });
                }
                Err(e) => {
                    tracing::warn!(path = %file.path, error = %e, "failed to apply file");
                    report.errors.push(format!("{}: {}", file.path, e));
                    report.files.push(FileApplyResult {
                        path: file.path.clone(),
                        success: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        if report.branch.is_some() && !report.applied_files.is_empty() {
            let committed = self
                .vcs
                .add(&report.applied_files)
                .and_then(|()| {
                    self.vcs
                        .commit(&commit_message(patch, &report.applied_files), &report.applied_files)
                });
            match committed {
                Ok(commit) => report.commit = Some(commit),
                Err(e) => report.errors.push(format!("commit failed: {}", e)),
            }
        }

        report.success = report.errors.is_empty() && !report.applied_files.is_empty();
        tracing::info!(
            patch_version = %patch.version,
            applied = report.applied_files.len(),
            errors = report.errors.len(),
            branch = ?report.branch,
            "patch apply finished"
        );
        report
    }

    /// Undo an applied patch: leave the patch branch for the base branch,
    /// restore the backup over the tree, then delete the patch branch.
    ///
    /// The patch branch must be left first. Its commit holds the patched
    /// content, so restoring on top of it would leave the tree dirty and
    /// block the checkout. If the base branch cannot be checked out the
    /// files are still restored and the branch is kept.
    pub fn rollback(
        &self,
        backup_path: &std::path::Path,
        branch: Option<&str>,
    ) -> Result<RollbackReport, WorkspaceError> {
        let _guard = self.tree_lock.lock().map_err(|_| WorkspaceError::IoError {
            path: self.project_root.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "working tree lock poisoned"),
        })?;
        if !backup_path.is_dir() {
            return Err(WorkspaceError::BackupNotFound {
                path: backup_path.to_path_buf(),
            });
        }

        let mut warnings = Vec::new();
        let mut left_branch = true;
        if let Some(branch) = branch {
            let base = &self.vcs_config.base_branch;
            match self.vcs.current_branch() {
                Ok(current) if current == branch => {
                    if let Err(e) = self.vcs.checkout(base) {
                        warnings.push(format!("could not return to {}: {}", base, e));
                        left_branch = false;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warnings.push(format!("could not read current branch: {}", e));
                    left_branch = false;
                }
            }
        }

        let restore = self.backups.restore(backup_path)?;

        if let (Some(branch), true) = (branch, left_branch) {
            if let Err(e) = self.vcs.delete_branch(branch, true) {
                warnings.push(format!("could not delete branch {}: {}", branch, e));
            }
        }

        Ok(RollbackReport { restore, warnings })
    }
}

fn write_file(target: &std::path::Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(target, content)
}

fn commit_message(patch: &GeneratedPatch, applied: &[String]) -> String {
    let files: Vec<String> = applied.iter().map(|f| format!("- {}", f)).collect();
    format!(
        "fix(aec): {}\n\n{}\n\nFiles:\n{}\n\nError-Id: {}\nDiagnostic-Id: {}\nPatch-Version: {}\n",
        patch.summary.lines().next().unwrap_or_default(),
        patch.rationale.trim(),
        files.join("\n"),
        patch.error_id,
        patch.diagnostic_id,
        patch.version,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aec_lifecycle::{FilePatchPayload, PatchPayload};
    use aec_submit::{GitAdapter, InMemoryVcs};
    use std::path::Path;
    use std::process::Command;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn patch(files: &[(&str, &str)]) -> GeneratedPatch {
        let payload = PatchPayload {
            summary: "Guard null user".to_string(),
            rationale: "user can be undefined after logout".to_string(),
            files: files
                .iter()
                .map(|(path, content)| FilePatchPayload {
                    path: path.to_string(),
                    original_content: String::new(),
                    patched_content: content.to_string(),
                    change_description: String::new(),
                })
                .collect(),
        };
        GeneratedPatch::from_payload(payload, 42, Uuid::new_v4(), 1)
    }

    #[test]
    fn apply_backs_up_branches_writes_and_commits() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "old\n").unwrap();
        let vcs = Arc::new(InMemoryVcs::new());
        let applicator = PatchApplicator::new(dir.path(), vcs.clone(), VcsConfig::default());

        let report = applicator.apply(
            &patch(&[("a.ts", "new\n"), ("lib/b.ts", "b\n")]),
            ApplyOptions::default(),
        );

        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.applied_files, vec!["a.ts", "lib/b.ts"]);
        assert_eq!(report.branch.as_deref(), Some("aec/patch-42-1"));
        assert!(report.commit.is_some());
        assert_eq!(fs::read_to_string(dir.path().join("a.ts")).unwrap(), "new\n");

        let backup = report.backup.unwrap();
        assert_eq!(fs::read_to_string(backup.path.join("a.ts")).unwrap(), "old\n");

        let commits = vcs.commits();
        assert_eq!(commits[0].files, vec!["a.ts", "lib/b.ts"]);
        assert!(commits[0].message.contains("Error-Id: 42"));
        assert!(commits[0].message.contains("Patch-Version: 42.1"));
    }

    #[test]
    fn failing_file_does_not_stop_others() {
        let dir = tempdir().unwrap();
        // Parent of the second target is a regular file.
        fs::write(dir.path().join("blocker"), "not a dir\n").unwrap();
        let vcs = Arc::new(InMemoryVcs::new());
        let applicator = PatchApplicator::new(dir.path(), vcs.clone(), VcsConfig::default());

        let report = applicator.apply(
            &patch(&[("one.ts", "1\n"), ("blocker/two.ts", "2\n"), ("three.ts", "3\n")]),
            ApplyOptions::default(),
        );

        assert!(!report.success);
        assert_eq!(report.applied_files, vec!["one.ts", "three.ts"]);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].starts_with("blocker/two.ts"));
        assert!(!report.files[1].success);
        assert_eq!(vcs.commits()[0].files, vec!["one.ts", "three.ts"]);
    }

    #[test]
    fn traversal_aborts_before_any_write() {
        let dir = tempdir().unwrap();
        let vcs = Arc::new(InMemoryVcs::new());
        let applicator = PatchApplicator::new(dir.path(), vcs.clone(), VcsConfig::default());

        let report = applicator.apply(
            &patch(&[("ok.ts", "x\n"), ("../escape.ts", "x\n")]),
            ApplyOptions::default(),
        );

        assert!(!report.success);
        assert!(report.applied_files.is_empty());
        assert!(report.backup.is_none());
        assert!(!dir.path().join("ok.ts").exists());
        assert_eq!(vcs.branches(), vec!["main"]);
    }

    #[test]
    fn commit_failure_leaves_files_on_disk() {
        let dir = tempdir().unwrap();
        let vcs = Arc::new(InMemoryVcs::new().fail_on("commit"));
        let applicator = PatchApplicator::new(dir.path(), vcs, VcsConfig::default());

        let report = applicator.apply(&patch(&[("a.ts", "x\n")]), ApplyOptions::default());

        assert!(!report.success);
        assert!(report.errors[0].contains("commit failed"));
        assert_eq!(report.applied_files, vec!["a.ts"]);
        assert!(dir.path().join("a.ts").exists());
    }

    #[test]
    fn branch_failure_aborts_writes() {
        let dir = tempdir().unwrap();
        let vcs = Arc::new(InMemoryVcs::new().fail_on("checkout_new"));
        let applicator = PatchApplicator::new(dir.path(), vcs, VcsConfig::default());

        let report = applicator.apply(&patch(&[("a.ts", "x\n")]), ApplyOptions::default());

        assert!(!report.success);
        assert!(report.branch.is_none());
        assert!(!dir.path().join("a.ts").exists());
    }

    #[test]
    fn no_branch_means_no_commit() {
        let dir = tempdir().unwrap();
        let vcs = Arc::new(InMemoryVcs::new());
        let applicator = PatchApplicator::new(dir.path(), vcs.clone(), VcsConfig::default());

        let report = applicator.apply(
            &patch(&[("a.ts", "x\n")]),
            ApplyOptions {
                create_branch: false,
                create_backup: false,
            },
        );

        assert!(report.success);
        assert!(report.commit.is_none());
        assert!(vcs.commits().is_empty());
        assert!(report.warnings[0].contains("cannot be rolled back"));
    }

    #[test]
    fn rollback_restores_and_drops_branch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "old\n").unwrap();
        let vcs = Arc::new(InMemoryVcs::new());
        let applicator = PatchApplicator::new(dir.path(), vcs.clone(), VcsConfig::default());

        let report = applicator.apply(&patch(&[("a.ts", "new\n")]), ApplyOptions::default());
        let backup = report.backup.unwrap();
        let branch = report.branch.unwrap();

        let rollback = applicator.rollback(&backup.path, Some(&branch)).unwrap();
        assert!(rollback.restore.is_complete());
        assert!(rollback.warnings.is_empty());
        assert_eq!(fs::read_to_string(dir.path().join("a.ts")).unwrap(), "old\n");
        assert_eq!(vcs.current_branch().unwrap(), "main");
        assert_eq!(vcs.branches(), vec!["main"]);
    }

    /// A git repository with `a.ts` committed, and an adapter whose base
    /// branch is whatever `git init` named the first branch.
    fn git_project(dir: &Path) -> (Arc<GitAdapter>, VcsConfig) {
        fs::write(dir.join("a.ts"), "old\n").unwrap();
        for args in [
            vec!["init"],
            vec!["config", "user.name", "Test User"],
            vec!["config", "user.email", "test@example.com"],
            vec!["add", "."],
            vec!["commit", "-m", "Initial commit"],
        ] {
            let out = Command::new("git").args(&args).current_dir(dir).output().unwrap();
            assert!(out.status.success(), "git {:?} failed", args);
        }
        let base = GitAdapter::new(dir, &VcsConfig::default())
            .current_branch()
            .unwrap();
        let config = VcsConfig {
            base_branch: base,
            ..VcsConfig::default()
        };
        (Arc::new(GitAdapter::new(dir, &config)), config)
    }

    #[test]
    fn git_rollback_returns_to_a_clean_base_branch() {
        let dir = tempdir().unwrap();
        let (git, config) = git_project(dir.path());
        let base = config.base_branch.clone();
        let applicator = PatchApplicator::new(dir.path(), git.clone(), config);

        let report = applicator.apply(
            &patch(&[("a.ts", "new\n"), ("lib/b.ts", "b\n")]),
            ApplyOptions::default(),
        );
        assert!(report.success, "{:?}", report.errors);
        let branch = report.branch.unwrap();
        assert_eq!(git.current_branch().unwrap(), branch);

        let rollback = applicator
            .rollback(&report.backup.unwrap().path, Some(&branch))
            .unwrap();

        assert!(rollback.warnings.is_empty(), "{:?}", rollback.warnings);
        assert!(rollback.restore.is_complete());
        assert_eq!(git.current_branch().unwrap(), base);
        assert!(!git.branch_exists(&branch).unwrap());
        assert_eq!(fs::read_to_string(dir.path().join("a.ts")).unwrap(), "old\n");
        assert!(!dir.path().join("lib/b.ts").exists());
        assert!(git.status().unwrap().is_clean());
    }

    #[test]
    fn git_patch_commit_leaves_user_staging_alone() {
        let dir = tempdir().unwrap();
        let (git, config) = git_project(dir.path());
        fs::write(dir.path().join("user.txt"), "mine\n").unwrap();
        git.add(&["user.txt".to_string()]).unwrap();
        let applicator = PatchApplicator::new(dir.path(), git.clone(), config);

        let report = applicator.apply(&patch(&[("a.ts", "new\n")]), ApplyOptions::default());

        assert!(report.success, "{:?}", report.errors);
        assert_eq!(git.recent_commits(1).unwrap()[0].files, vec!["a.ts"]);
        assert_eq!(git.status().unwrap().changed_paths, vec!["user.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn backup_failure_aborts_before_any_write() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let locked = dir.path().join("locked.ts");
        fs::write(&locked, "old\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o200)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running with privileges that ignore file modes.
            return;
        }
        let vcs = Arc::new(InMemoryVcs::new());
        let applicator = PatchApplicator::new(dir.path(), vcs.clone(), VcsConfig::default());

        let report = applicator.apply(
            &patch(&[("fresh.ts", "x\n"), ("locked.ts", "new\n")]),
            ApplyOptions::default(),
        );

        assert!(!report.success);
        assert!(report.errors[0].starts_with("backup failed"));
        assert!(report.backup.is_none());
        assert!(report.applied_files.is_empty());
        assert!(!dir.path().join("fresh.ts").exists());
        assert_eq!(vcs.branches(), vec!["main"]);
    }
}
