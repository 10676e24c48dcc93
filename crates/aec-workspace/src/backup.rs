// backup.rs — Timestamped pre-patch backups of the files a patch touches.
//
// Layout: <project>/.aec-backups/<timestamp>/<relative path>, plus a small
// manifest recording which paths existed and which did not. Restoring puts
// every backed-up file back and removes files the patch created, which
// returns the tree to its pre-patch content.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;
use crate::safety::resolve_project_path;

/// Directory (relative to the project root) holding all backups.
pub const BACKUP_DIR_NAME: &str = ".aec-backups";

const MANIFEST_FILE: &str = ".aec-manifest.json";

/// A completed backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Backup {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Files copied into the backup.
    pub files: Vec<String>,
    /// Target paths that did not exist yet; restore deletes them.
    pub absent: Vec<String>,
}

/// Result of restoring a backup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    pub restored: Vec<String>,
    pub removed: Vec<String>,
    pub errors: Vec<String>,
}

impl RestoreReport {
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Manifest {
    created_at: DateTime<Utc>,
    files: Vec<String>,
    absent: Vec<String>,
}

/// Creates, lists, and restores backups for one project.
pub struct BackupManager {
    project_root: PathBuf,
    backup_root: PathBuf,
}

impl BackupManager {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        let backup_root = project_root.join(BACKUP_DIR_NAME);
        Self {
            project_root,
            backup_root,
        }
    }

    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Copy every existing target file into a fresh timestamped directory.
    ///
    /// Paths that do not exist are recorded as absent rather than failing.
    /// A backup is all or nothing: every file is attempted, and if any copy
    /// fails the partial directory is removed and `BackupIncomplete` lists
    /// each failure.
    pub fn create(&self, paths: &[String]) -> Result<Backup, WorkspaceError> {
        let sources = paths
            .iter()
            .map(|rel| resolve_project_path(&self.project_root, rel))
            .collect::<Result<Vec<_>, _>>()?;

        let created_at = Utc::now();
        let backup_dir = self.fresh_dir(&created_at)?;

        let mut files = Vec::new();
        let mut absent = Vec::new();
        let mut failures = Vec::new();
        for (rel, source) in paths.iter().zip(&sources) {
            if !source.is_file() {
                tracing::debug!(path = %rel, "no existing file to back up");
                absent.push(rel.clone());
                continue;
            }
            match copy_into(source, &backup_dir.join(rel)) {
                Ok(()) => files.push(rel.clone()),
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "could not back up file");
                    failures.push(format!("{}: {}", rel, e));
                }
            }
        }

        if !failures.is_empty() {
            if let Err(e) = fs::remove_dir_all(&backup_dir) {
                tracing::warn!(backup = %backup_dir.display(), error = %e, "could not remove partial backup");
            }
            return Err(WorkspaceError::BackupIncomplete { failures });
        }

        let manifest = Manifest {
            created_at,
            files: files.clone(),
            absent: absent.clone(),
        };
        let manifest_path = backup_dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?).map_err(
            |source| WorkspaceError::IoError {
                path: manifest_path,
                source,
            },
        )?;

        tracing::info!(
            backup = %backup_dir.display(),
            files = files.len(),
            absent = absent.len(),
            "created backup"
        );
        Ok(Backup {
            path: backup_dir,
            created_at,
            files,
            absent,
        })
    }

    /// Copy every backed-up file back over the working tree.
    ///
    /// Per-file failures are collected; the remaining files are still
    /// restored.
    pub fn restore(&self, backup_dir: &Path) -> Result<RestoreReport, WorkspaceError> {
        if !backup_dir.is_dir() {
            return Err(WorkspaceError::BackupNotFound {
                path: backup_dir.to_path_buf(),
            });
        }

        let (files, absent) = match self.read_manifest(backup_dir)? {
            Some(manifest) => (manifest.files, manifest.absent),
            None => {
                let mut files = Vec::new();
                walk_dir_relative(backup_dir, backup_dir, &mut files)?;
                (files, Vec::new())
            }
        };

        let mut report = RestoreReport::default();
        for rel in files {
            let source = backup_dir.join(&rel);
            let dest = match resolve_project_path(&self.project_root, &rel) {
                Ok(dest) => dest,
                Err(e) => {
                    report.errors.push(e.to_string());
                    continue;
                }
            };
            if let Some(parent) = dest.parent() {
                if let Err(e) = fs::create_dir_all(parent) {
                    report.errors.push(format!("{}: {}", rel, e));
                    continue;
                }
            }
            match fs::copy(&source, &dest) {
                Ok(_) => report.restored.push(rel),
                Err(e) => report.errors.push(format!("{}: {}", rel, e)),
            }
        }

        for rel in absent {
            let Ok(dest) = resolve_project_path(&self.project_root, &rel) else {
                continue;
            };
            if dest.is_file() {
                match fs::remove_file(&dest) {
                    Ok(()) => report.removed.push(rel),
                    Err(e) => report.errors.push(format!("{}: {}", rel, e)),
                }
            }
        }

        tracing::info!(
            backup = %backup_dir.display(),
            restored = report.restored.len(),
            removed = report.removed.len(),
            errors = report.errors.len(),
            "restored backup"
        );
        Ok(report)
    }

    /// All backup directories, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, WorkspaceError> {
        if !self.backup_root.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.backup_root).map_err(|source| WorkspaceError::IoError {
            path: self.backup_root.clone(),
            source,
        })?;
        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .collect();
        dirs.sort();
        Ok(dirs)
    }

    fn fresh_dir(&self, created_at: &DateTime<Utc>) -> Result<PathBuf, WorkspaceError> {
        // ':' is not portable in directory names.
        let stamp = created_at.format("%Y-%m-%dT%H-%M-%S%.3fZ").to_string();
        let mut dir = self.backup_root.join(&stamp);
        let mut n = 1;
        while dir.exists() {
            dir = self.backup_root.join(format!("{}-{}", stamp, n));
            n += 1;
        }
        fs::create_dir_all(&dir).map_err(|source| WorkspaceError::IoError {
            path: dir.clone(),
            source,
        })?;
        Ok(dir)
    }

    fn read_manifest(&self, backup_dir: &Path) -> Result<Option<Manifest>, WorkspaceError> {
        let path = backup_dir.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .map_err(|source| WorkspaceError::IoError { path, source })?;
        Ok(Some(serde_json::from_str(&content)?))
    }
}

fn copy_into(source: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest).map(|_| ())
}

/// Walk a directory tree and collect relative file paths.
fn walk_dir_relative(
    dir: &Path,
    root: &Path,
    files: &mut Vec<String>,
) -> Result<(), WorkspaceError> {
    let entries = fs::read_dir(dir).map_err(|source| WorkspaceError::IoError {
        path: dir.to_path_buf(),
        source,
    })?;

    for entry in entries {
        let entry = entry.map_err(|source| WorkspaceError::IoError {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        if path.is_dir() {
            walk_dir_relative(&path, root, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            let rel = rel.to_string_lossy().to_string();
            if rel != MANIFEST_FILE {
                files.push(rel);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn backup_and_restore_round_trip() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.ts"), "original a\n").unwrap();
        fs::write(dir.path().join("b.ts"), "original b\n").unwrap();

        let manager = BackupManager::new(dir.path());
        let backup = manager
            .create(&["src/a.ts".to_string(), "b.ts".to_string()])
            .unwrap();
        assert_eq!(backup.files.len(), 2);
        assert!(backup.path.starts_with(dir.path().join(BACKUP_DIR_NAME)));

        fs::write(dir.path().join("src/a.ts"), "patched a\n").unwrap();
        fs::write(dir.path().join("b.ts"), "patched b\n").unwrap();

        let report = manager.restore(&backup.path).unwrap();
        assert!(report.is_complete());
        assert_eq!(
            fs::read_to_string(dir.path().join("src/a.ts")).unwrap(),
            "original a\n"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("b.ts")).unwrap(),
            "original b\n"
        );
    }

    #[test]
    fn missing_files_are_skipped_and_removed_on_restore() {
        let dir = tempdir().unwrap();
        let manager = BackupManager::new(dir.path());
        let backup = manager.create(&["new.ts".to_string()]).unwrap();
        assert!(backup.files.is_empty());
        assert_eq!(backup.absent, vec!["new.ts"]);

        fs::write(dir.path().join("new.ts"), "created by patch\n").unwrap();
        let report = manager.restore(&backup.path).unwrap();
        assert_eq!(report.removed, vec!["new.ts"]);
        assert!(!dir.path().join("new.ts").exists());
    }

    #[test]
    fn restore_without_manifest_walks_directory() {
        let dir = tempdir().unwrap();
        let backup_dir = dir.path().join(BACKUP_DIR_NAME).join("manual");
        fs::create_dir_all(backup_dir.join("lib")).unwrap();
        fs::write(backup_dir.join("lib/x.ts"), "old\n").unwrap();

        let report = BackupManager::new(dir.path()).restore(&backup_dir).unwrap();
        assert_eq!(report.restored, vec!["lib/x.ts"]);
        assert_eq!(fs::read_to_string(dir.path().join("lib/x.ts")).unwrap(), "old\n");
    }

    #[test]
    fn restore_of_missing_backup_errors() {
        let dir = tempdir().unwrap();
        let result = BackupManager::new(dir.path()).restore(&dir.path().join("nope"));
        assert!(matches!(result, Err(WorkspaceError::BackupNotFound { .. })));
    }

    #[test]
    fn consecutive_backups_get_distinct_directories() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "a\n").unwrap();
        let manager = BackupManager::new(dir.path());
        let first = manager.create(&["a.ts".to_string()]).unwrap();
        let second = manager.create(&["a.ts".to_string()]).unwrap();
        assert_ne!(first.path, second.path);
        assert_eq!(manager.list().unwrap().len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_file_fails_the_whole_backup() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.ts"), "a\n").unwrap();
        fs::write(dir.path().join("locked.ts"), "secret\n").unwrap();
        let locked = dir.path().join("locked.ts");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read(&locked).is_ok() {
            // Running with privileges that ignore file modes.
            return;
        }

        let manager = BackupManager::new(dir.path());
        let result = manager.create(&["a.ts".to_string(), "locked.ts".to_string()]);
        match result {
            Err(WorkspaceError::BackupIncomplete { failures }) => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("locked.ts"));
            }
            other => panic!("expected BackupIncomplete, got {:?}", other),
        }
        assert!(manager.list().unwrap().is_empty());
    }

    #[test]
    fn traversal_is_refused() {
        let dir = tempdir().unwrap();
        let result = BackupManager::new(dir.path()).create(&["../etc/passwd".to_string()]);
        assert!(matches!(result, Err(WorkspaceError::PathTraversal { .. })));
    }
}
