// patch.rs — GeneratedPatch, FilePatch, and the persisted PatchRecord.
//
// A patch is a set of whole-file replacements, never a textual diff. The
// applicator decides whether and when the proposed content reaches disk but
// never edits it.
//
// PatchRecord carries two independent status fields. Their guarded setters
// hold the invariant that a patch is only ever `deployed` after its
// validation status is `passed`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detected_error::ErrorId;
use crate::error::LifecycleError;

/// One file in the patch oracle's response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePatchPayload {
    pub path: String,
    #[serde(default)]
    pub original_content: String,
    #[serde(default)]
    pub patched_content: String,
    #[serde(default)]
    pub change_description: String,
}

/// Response body of the patch oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchPayload {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub files: Vec<FilePatchPayload>,
}

impl PatchPayload {
    /// Structural check run before anything is persisted or written.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.files.is_empty() {
            problems.push("patch contains no files".to_string());
        }
        for file in &self.files {
            if file.path.trim().is_empty() {
                problems.push("file patch with empty path".to_string());
            }
            if file.patched_content.trim().is_empty() {
                problems.push(format!("empty patched content for '{}'", file.path));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }
}

/// A whole-file replacement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FilePatch {
    /// Project-relative path.
    pub path: String,
    pub original_content: String,
    pub patched_content: String,
    pub lines_added: usize,
    pub lines_removed: usize,
    pub change_description: String,
}

impl FilePatch {
    pub fn new(
        path: impl Into<String>,
        original_content: impl Into<String>,
        patched_content: impl Into<String>,
        change_description: impl Into<String>,
    ) -> Self {
        let original_content = original_content.into();
        let patched_content = patched_content.into();
        let (lines_added, lines_removed) = count_line_changes(&original_content, &patched_content);
        Self {
            path: path.into(),
            original_content,
            patched_content,
            lines_added,
            lines_removed,
            change_description: change_description.into(),
        }
    }

    /// True when the patch creates a file that did not exist before.
    pub fn is_new_file(&self) -> bool {
        self.original_content.is_empty()
    }
}

/// Count added and removed lines by matching lines as a multiset.
///
/// Moved lines count as unchanged. Cheaper than a full LCS diff, which
/// matters for oracle output that replaces large files.
fn count_line_changes(original: &str, patched: &str) -> (usize, usize) {
    let mut remaining: HashMap<&str, usize> = HashMap::new();
    for line in original.lines() {
        *remaining.entry(line).or_insert(0) += 1;
    }
    let mut added = 0;
    for line in patched.lines() {
        match remaining.get_mut(line) {
            Some(count) if *count > 0 => *count -= 1,
            _ => added += 1,
        }
    }
    let removed = remaining.values().sum();
    (added, removed)
}

/// A proposed remediation produced by the patch oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedPatch {
    pub patch_id: Uuid,
    pub error_id: ErrorId,
    pub diagnostic_id: Uuid,
    /// `<error_id>.<n>`, assigned in generation order per error.
    pub version: String,
    pub files: Vec<FilePatch>,
    pub summary: String,
    pub rationale: String,
    pub created_at: DateTime<Utc>,
}

impl GeneratedPatch {
    /// Build a patch from a structurally valid oracle payload.
    pub fn from_payload(
        payload: PatchPayload,
        error_id: ErrorId,
        diagnostic_id: Uuid,
        sequence: usize,
    ) -> Self {
        let files = payload
            .files
            .into_iter()
            .map(|f| FilePatch::new(f.path, f.original_content, f.patched_content, f.change_description))
            .collect();
        Self {
            patch_id: Uuid::new_v4(),
            error_id,
            diagnostic_id,
            version: format!("{}.{}", error_id, sequence),
            files,
            summary: payload.summary,
            rationale: payload.rationale,
            created_at: Utc::now(),
        }
    }

    pub fn lines_added(&self) -> usize {
        self.files.iter().map(|f| f.lines_added).sum()
    }

    pub fn lines_removed(&self) -> usize {
        self.files.iter().map(|f| f.lines_removed).sum()
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.iter().map(|f| f.path.clone()).collect()
    }
}

/// Test validation status of a patch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Testing,
    Passed,
    Failed,
}

impl fmt::Display for ValidationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationStatus::Pending => write!(f, "pending"),
            ValidationStatus::Testing => write!(f, "testing"),
            ValidationStatus::Passed => write!(f, "passed"),
            ValidationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Deployment status of a patch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Pending,
    Deploying,
    Deployed,
    RolledBack,
    Rejected,
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Pending => write!(f, "pending"),
            DeploymentStatus::Deploying => write!(f, "deploying"),
            DeploymentStatus::Deployed => write!(f, "deployed"),
            DeploymentStatus::RolledBack => write!(f, "rolled_back"),
            DeploymentStatus::Rejected => write!(f, "rejected"),
        }
    }
}

impl DeploymentStatus {
    fn can_transition_to(&self, next: DeploymentStatus) -> bool {
        use DeploymentStatus::*;
        matches!(
            (self, next),
            (Pending, Deploying)
                | (Pending, Rejected)
                | (Pending, RolledBack)
                | (Deploying, Deployed)
                | (Deploying, RolledBack)
                | (Deployed, RolledBack)
        )
    }
}

/// Persisted view of a generated patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatchRecord {
    pub patch: GeneratedPatch,
    validation_status: ValidationStatus,
    deployment_status: DeploymentStatus,

    /// Branch created by the applicator, once applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch_name: Option<String>,

    /// Backup directory taken before the files were overwritten.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,

    pub lines_added: usize,
    pub lines_removed: usize,

    /// Safety validator warnings; non-empty means elevated review.
    #[serde(default)]
    pub safety_warnings: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,

    /// Raw output of the last test run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_output: Option<String>,

    /// Set when the deployment gate deferred to the next off-peak window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_deploy_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PatchRecord {
    /// Wrap a freshly generated patch; both statuses start `pending`.
    pub fn new(patch: GeneratedPatch, safety_warnings: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            lines_added: patch.lines_added(),
            lines_removed: patch.lines_removed(),
            patch,
            validation_status: ValidationStatus::Pending,
            deployment_status: DeploymentStatus::Pending,
            branch_name: None,
            backup_path: None,
            commit_id: None,
            safety_warnings,
            applied_at: None,
            approved_by: None,
            test_output: None,
            scheduled_deploy_at: None,
            deployed_at: None,
            rolled_back_at: None,
            rollback_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn patch_id(&self) -> Uuid {
        self.patch.patch_id
    }

    pub fn error_id(&self) -> ErrorId {
        self.patch.error_id
    }

    pub fn validation_status(&self) -> ValidationStatus {
        self.validation_status
    }

    pub fn deployment_status(&self) -> DeploymentStatus {
        self.deployment_status
    }

    /// Whether the applicator has written this patch to the working tree.
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }

    /// Update the validation status.
    ///
    /// Validation cannot change once the patch is deployed or deploying.
    pub fn set_validation_status(&mut self, next: ValidationStatus) -> Result<(), LifecycleError> {
        if matches!(
            self.deployment_status,
            DeploymentStatus::Deploying | DeploymentStatus::Deployed
        ) && next != self.validation_status
        {
            return Err(self.invalid("validation_status", self.validation_status, next));
        }
        self.validation_status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Update the deployment status.
    ///
    /// `deploying` and `deployed` require validation `passed`.
    pub fn set_deployment_status(&mut self, next: DeploymentStatus) -> Result<(), LifecycleError> {
        let needs_pass = matches!(next, DeploymentStatus::Deploying | DeploymentStatus::Deployed);
        if !self.deployment_status.can_transition_to(next)
            || (needs_pass && self.validation_status != ValidationStatus::Passed)
        {
            return Err(self.invalid("deployment_status", self.deployment_status, next));
        }
        let now = Utc::now();
        match next {
            DeploymentStatus::Deployed => self.deployed_at = Some(now),
            DeploymentStatus::RolledBack => self.rolled_back_at = Some(now),
            _ => {}
        }
        self.deployment_status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Record a rollback and its reason.
    pub fn mark_rolled_back(&mut self, reason: impl Into<String>) -> Result<(), LifecycleError> {
        self.set_deployment_status(DeploymentStatus::RolledBack)?;
        self.rollback_reason = Some(reason.into());
        Ok(())
    }

    fn invalid(&self, field: &'static str, from: impl fmt::Display, to: impl fmt::Display) -> LifecycleError {
        LifecycleError::InvalidPatchStatus {
            patch_id: self.patch.patch_id,
            field,
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> PatchPayload {
        PatchPayload {
            summary: "Guard patient lookup".to_string(),
            rationale: "Lookup may return null".to_string(),
            files: vec![FilePatchPayload {
                path: "server/routes.ts".to_string(),
                original_content: "const p = find(id);\nreturn p.name;\n".to_string(),
                patched_content: "const p = find(id);\nif (!p) return null;\nreturn p.name;\n"
                    .to_string(),
                change_description: "add null check".to_string(),
            }],
        }
    }

    fn record() -> PatchRecord {
        let patch = GeneratedPatch::from_payload(payload(), 42, Uuid::new_v4(), 1);
        PatchRecord::new(patch, Vec::new())
    }

    #[test]
    fn line_counts_ignore_unchanged_lines() {
        let fp = FilePatch::new("a.ts", "a\nb\nc\n", "a\nx\nc\ny\n", "");
        assert_eq!(fp.lines_added, 2);
        assert_eq!(fp.lines_removed, 1);
        assert!(!fp.is_new_file());
        assert!(FilePatch::new("b.ts", "", "new\n", "").is_new_file());
    }

    #[test]
    fn version_combines_error_id_and_sequence() {
        let patch = GeneratedPatch::from_payload(payload(), 42, Uuid::new_v4(), 3);
        assert_eq!(patch.version, "42.3");
        assert_eq!(patch.lines_added(), 1);
        assert_eq!(patch.lines_removed(), 0);
    }

    #[test]
    fn payload_without_files_is_rejected() {
        let mut p = payload();
        p.files.clear();
        assert_eq!(p.validate().unwrap_err(), vec!["patch contains no files"]);
    }

    #[test]
    fn payload_with_blank_content_is_rejected() {
        let mut p = payload();
        p.files[0].patched_content = "  \n".to_string();
        let problems = p.validate().unwrap_err();
        assert!(problems[0].contains("server/routes.ts"));
    }

    #[test]
    fn new_record_is_pending_on_both_axes() {
        let rec = record();
        assert_eq!(rec.validation_status(), ValidationStatus::Pending);
        assert_eq!(rec.deployment_status(), DeploymentStatus::Pending);
        assert!(!rec.is_applied());
        assert_eq!(rec.lines_added, 1);
    }

    #[test]
    fn cannot_deploy_before_validation_passes() {
        let mut rec = record();
        assert!(matches!(
            rec.set_deployment_status(DeploymentStatus::Deploying),
            Err(LifecycleError::InvalidPatchStatus { .. })
        ));

        rec.set_validation_status(ValidationStatus::Testing).unwrap();
        rec.set_validation_status(ValidationStatus::Failed).unwrap();
        assert!(rec.set_deployment_status(DeploymentStatus::Deploying).is_err());

        rec.set_validation_status(ValidationStatus::Passed).unwrap();
        rec.set_deployment_status(DeploymentStatus::Deploying).unwrap();
        rec.set_deployment_status(DeploymentStatus::Deployed).unwrap();
        assert!(rec.deployed_at.is_some());
    }

    #[test]
    fn validation_frozen_while_deployed() {
        let mut rec = record();
        rec.set_validation_status(ValidationStatus::Passed).unwrap();
        rec.set_deployment_status(DeploymentStatus::Deploying).unwrap();
        rec.set_deployment_status(DeploymentStatus::Deployed).unwrap();
        assert!(rec.set_validation_status(ValidationStatus::Failed).is_err());
    }

    #[test]
    fn rollback_records_reason_and_time() {
        let mut rec = record();
        rec.mark_rolled_back("health check failed").unwrap();
        assert_eq!(rec.deployment_status(), DeploymentStatus::RolledBack);
        assert_eq!(rec.rollback_reason.as_deref(), Some("health check failed"));
        assert!(rec.rolled_back_at.is_some());
        // Terminal.
        assert!(rec.set_deployment_status(DeploymentStatus::Deploying).is_err());
    }

    #[test]
    fn statuses_survive_serialization() {
        let mut rec = record();
        rec.set_validation_status(ValidationStatus::Passed).unwrap();
        let json = serde_json::to_string(&rec).unwrap();
        assert!(json.contains("\"validation_status\":\"passed\""));
        assert!(json.contains("\"deployment_status\":\"pending\""));
        let restored: PatchRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.validation_status(), ValidationStatus::Passed);
        assert_eq!(restored.patch.version, "42.1");
    }
}
