// safety.rs — Pre-apply safety checks for generated patches.
//
// Only a path that escapes the project root is fatal. Everything else is a
// warning: the patch may still be applied, but a non-empty warning list is
// passed to the deployment gate and forces manual review.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use aec_lifecycle::GeneratedPatch;
use aec_submit::VcsAdapter;
use glob::Pattern;
use serde::{Deserialize, Serialize};

use crate::error::WorkspaceError;

/// Safety validator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Glob patterns for files whose modification needs elevated review.
    /// Matched against both the project-relative path and the file name.
    #[serde(default = "default_critical_files")]
    pub critical_files: Vec<String>,

    /// Proposed content larger than this is suspicious.
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            critical_files: default_critical_files(),
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_critical_files() -> Vec<String> {
    [
        "package.json",
        "package-lock.json",
        "Cargo.toml",
        "Cargo.lock",
        "requirements.txt",
        "pyproject.toml",
        "tsconfig.json",
        "vite.config.*",
        "drizzle.config.*",
        "Dockerfile",
        ".env",
        ".env.*",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> usize {
    100 * 1024
}

/// Outcome of validating a patch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyReport {
    /// True when there are no errors and no warnings.
    pub safe: bool,
    /// Fatal findings; the patch must not be applied.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl SafetyReport {
    pub fn is_blocked(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Resolve a patch path against the project root.
///
/// Rejects `..` components, absolute paths outside the root, and paths
/// whose deepest existing ancestor canonicalizes (through symlinks) to a
/// location outside the root.
pub fn resolve_project_path(root: &Path, path: &str) -> Result<PathBuf, WorkspaceError> {
    let traversal = || WorkspaceError::PathTraversal {
        path: path.to_string(),
    };

    let candidate = Path::new(path);
    if path.trim().is_empty() {
        return Err(traversal());
    }
    let relative = if candidate.is_absolute() {
        candidate.strip_prefix(root).map_err(|_| traversal())?
    } else {
        candidate
    };
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(traversal());
    }

    let full = root.join(relative);

    let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let mut ancestor = full.as_path();
    while !ancestor.exists() {
        match ancestor.parent() {
            Some(parent) => ancestor = parent,
            None => break,
        }
    }
    if let Ok(canonical) = ancestor.canonicalize() {
        if !canonical.starts_with(&canonical_root) {
            return Err(traversal());
        }
    }

    Ok(full)
}

/// Checks a generated patch against the live project.
pub struct SafetyValidator {
    project_root: PathBuf,
    config: SafetyConfig,
    critical: Vec<Pattern>,
    vcs: Arc<dyn VcsAdapter>,
}

impl SafetyValidator {
    pub fn new(
        project_root: impl Into<PathBuf>,
        config: SafetyConfig,
        vcs: Arc<dyn VcsAdapter>,
    ) -> Self {
        let critical = config
            .critical_files
            .iter()
            .filter_map(|p| match Pattern::new(p) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    tracing::warn!("ignoring invalid critical-file pattern '{}': {}", p, e);
                    None
                }
            })
            .collect();
        Self {
            project_root: project_root.into(),
            config,
            critical,
            vcs,
        }
    }

    /// Run every check and collect the findings.
    pub fn validate(&self, patch: &GeneratedPatch) -> SafetyReport {
        let mut report = SafetyReport::default();

        for file in &patch.files {
            if let Err(e) = resolve_project_path(&self.project_root, &file.path) {
                report.errors.push(e.to_string());
                continue;
            }

            if self.is_critical(&file.path) {
                report.warnings.push(format!(
                    "'{}' is a critical file; modification requires elevated review",
                    file.path
                ));
            }

            let size = file.patched_content.len();
            if size > self.config.max_file_bytes {
                report.warnings.push(format!(
                    "proposed content for '{}' is {} bytes (limit {}); possible oracle malfunction",
                    file.path, size, self.config.max_file_bytes
                ));
            }
        }

        match self.vcs.status() {
            Ok(status) if !status.is_clean() => {
                let preview: Vec<&str> = status
                    .changed_paths
                    .iter()
                    .take(5)
                    .map(String::as_str)
                    .collect();
                report.warnings.push(format!(
                    "working tree has {} uncommitted change(s) ({}); apply may conflict with unrelated work",
                    status.changed_paths.len(),
                    preview.join(", ")
                ));
            }
            Ok(_) => {}
            Err(e) => report
                .warnings
                .push(format!("could not determine working tree status: {}", e)),
        }

        report.safe = report.errors.is_empty() && report.warnings.is_empty();
        tracing::debug!(
            patch_version = %patch.version,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "safety validation finished"
        );
        report
    }

    fn is_critical(&self, path: &str) -> bool {
        let file_name = Path::new(path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.critical
            .iter()
            .any(|pattern| pattern.matches(path) || pattern.matches(&file_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aec_lifecycle::{FilePatchPayload, PatchPayload};
    use aec_submit::InMemoryVcs;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn patch_for(files: &[(&str, &str)]) -> GeneratedPatch {
        let payload = PatchPayload {
            summary: "s".to_string(),
            rationale: "r".to_string(),
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
        GeneratedPatch::from_payload(payload, 1, Uuid::new_v4(), 1)
    }

    fn validator(root: &Path, vcs: InMemoryVcs) -> SafetyValidator {
        SafetyValidator::new(root, SafetyConfig::default(), Arc::new(vcs))
    }

    #[test]
    fn clean_patch_is_safe() {
        let dir = tempdir().unwrap();
        let report = validator(dir.path(), InMemoryVcs::new())
            .validate(&patch_for(&[("src/app.ts", "ok\n")]));
        assert!(report.safe);
        assert!(!report.is_blocked());
    }

    #[test]
    fn traversal_is_fatal() {
        let dir = tempdir().unwrap();
        let report = validator(dir.path(), InMemoryVcs::new())
            .validate(&patch_for(&[("../outside.ts", "x\n"), ("/etc/passwd", "x\n")]));
        assert!(report.is_blocked());
        assert_eq!(report.errors.len(), 2);
        assert!(!report.safe);
    }

    #[test]
    fn absolute_path_inside_root_is_accepted() {
        let dir = tempdir().unwrap();
        let inside = dir.path().join("src/a.ts");
        let resolved = resolve_project_path(dir.path(), &inside.to_string_lossy()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[cfg(unix)]
    #[test]
    fn symlink_escape_is_rejected() {
        let dir = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();
        assert!(matches!(
            resolve_project_path(dir.path(), "link/evil.ts"),
            Err(WorkspaceError::PathTraversal { .. })
        ));
    }

    #[test]
    fn critical_file_is_a_warning() {
        let dir = tempdir().unwrap();
        let report = validator(dir.path(), InMemoryVcs::new())
            .validate(&patch_for(&[("client/package.json", "{}\n"), (".env.production", "A=1\n")]));
        assert!(!report.is_blocked());
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("critical"));
    }

    #[test]
    fn dirty_tree_is_a_warning() {
        let dir = tempdir().unwrap();
        let vcs = InMemoryVcs::new().with_dirty(&["notes.md"]);
        let report = validator(dir.path(), vcs).validate(&patch_for(&[("a.ts", "x\n")]));
        assert!(!report.safe);
        assert!(report.warnings[0].contains("notes.md"));
    }

    #[test]
    fn oversized_file_is_a_warning() {
        let dir = tempdir().unwrap();
        let big = "x".repeat(SafetyConfig::default().max_file_bytes + 1);
        let report = validator(dir.path(), InMemoryVcs::new()).validate(&patch_for(&[("a.ts", &big)]));
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("possible oracle malfunction"));
    }

    #[test]
    fn status_failure_degrades_to_warning() {
        let dir = tempdir().unwrap();
        let vcs = InMemoryVcs::new().fail_on("status");
        let report = validator(dir.path(), vcs).validate(&patch_for(&[("a.ts", "x\n")]));
        assert!(!report.is_blocked());
        assert!(report.warnings[0].contains("could not determine"));
    }
}
