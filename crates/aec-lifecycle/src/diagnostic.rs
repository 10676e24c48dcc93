// diagnostic.rs — DiagnosticRecord and the diagnostic oracle's response payload.
//
// The oracle answers in camelCase JSON. `DiagnosisPayload` is the wire shape;
// it is checked by `validate()` before it becomes a `DiagnosticRecord`, which
// is what the rest of the pipeline consumes and persists.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detected_error::ErrorId;

/// Impact assessed by the diagnostic oracle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImpactLevel::Low => write!(f, "low"),
            ImpactLevel::Medium => write!(f, "medium"),
            ImpactLevel::High => write!(f, "high"),
            ImpactLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Where the fault originates.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RootCause {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
    /// One-line statement of the defect.
    pub issue: String,
}

/// Invocation metadata for one oracle call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OracleMetadata {
    pub duration_ms: u64,
    /// Resource cost reported by the oracle (tokens, credits, ...).
    pub cost: f64,
    pub oracle_version: String,
}

/// Response body of the diagnostic oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisPayload {
    pub root_cause: RootCause,
    #[serde(default)]
    pub explanation: String,
    pub impact: ImpactLevel,
    pub affected_features: Vec<String>,
    pub fix_steps: Vec<String>,
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub refactoring_suggestions: Vec<String>,
    #[serde(default)]
    pub test_suggestions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_version: Option<String>,
}

impl DiagnosisPayload {
    /// Check the payload is usable. Returns every problem found, not just the first.
    ///
    /// A diagnosis is malformed when the root-cause issue is blank, the
    /// explanation is shorter than `min_explanation_len` characters, or
    /// there are no fix steps.
    pub fn validate(&self, min_explanation_len: usize) -> Result<(), Vec<String>> {
        let mut problems = Vec::new();
        if self.root_cause.issue.trim().is_empty() {
            problems.push("root cause issue is empty".to_string());
        }
        let explanation_len = self.explanation.trim().chars().count();
        if explanation_len < min_explanation_len {
            problems.push(format!(
                "explanation is {} characters, minimum is {}",
                explanation_len, min_explanation_len
            ));
        }
        if self.fix_steps.iter().all(|s| s.trim().is_empty()) {
            problems.push("no fix steps".to_string());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(problems)
        }
    }

    /// Convert a validated payload into a persisted record.
    pub fn into_record(self, error_id: ErrorId, duration_ms: u64) -> DiagnosticRecord {
        DiagnosticRecord {
            diagnostic_id: Uuid::new_v4(),
            error_id,
            root_cause: self.root_cause,
            explanation: self.explanation,
            impact: self.impact,
            affected_features: self.affected_features,
            fix_steps: self.fix_steps,
            files_to_modify: self.files_to_modify,
            refactoring_suggestions: self.refactoring_suggestions,
            test_suggestions: self.test_suggestions,
            oracle: OracleMetadata {
                duration_ms,
                cost: self.cost.unwrap_or_default(),
                oracle_version: self.oracle_version.unwrap_or_else(|| "unknown".to_string()),
            },
            created_at: Utc::now(),
        }
    }
}

/// Root-cause analysis for a detected error. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticRecord {
    pub diagnostic_id: Uuid,
    pub error_id: ErrorId,
    pub root_cause: RootCause,
    pub explanation: String,
    pub impact: ImpactLevel,
    pub affected_features: Vec<String>,
    /// Ordered remediation steps.
    pub fix_steps: Vec<String>,
    /// Project-relative paths the fix will touch.
    pub files_to_modify: Vec<String>,
    #[serde(default)]
    pub refactoring_suggestions: Vec<String>,
    #[serde(default)]
    pub test_suggestions: Vec<String>,
    pub oracle: OracleMetadata,
    pub created_at: DateTime<Utc>,
}
