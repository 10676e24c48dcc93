// detected_error.rs — DetectedError: one production fault and its pipeline stage.
//
// The status field is the only record of where an error sits in the
// remediation pipeline. All status changes go through `transition()`, which
// checks the explicit table below:
//
//   detected → diagnosing → patching → testing → deploying → deployed → resolved
//   patching / testing / deploying → pending_review → resolved
//   diagnosing / patching → detected        (reset on failure)
//   deployed → rolled_back

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;

/// Identifier assigned by the external detection collaborator.
pub type ErrorId = u64;

/// Severity reported by the detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// Pipeline stage of a detected error.
///
/// The serialized names are a wire contract relied on by dashboards and
/// alerting; do not rename variants without a migration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStatus {
    /// Detected and waiting for a pipeline to pick it up.
    Detected,
    /// Evidence is being gathered and the diagnostic oracle consulted.
    Diagnosing,
    /// A patch is being generated and validated.
    Patching,
    /// An applied patch is being tested or waits for its deploy window.
    Testing,
    /// Deployment in progress.
    Deploying,
    /// Deployed; awaiting health confirmation.
    Deployed,
    /// Waiting on a human.
    PendingReview,
    /// Closed.
    Resolved,
    /// A deployed patch was reverted from its backup.
    RolledBack,
}

impl ErrorStatus {
    /// Every status, in pipeline order.
    pub const ALL: [ErrorStatus; 9] = [
        ErrorStatus::Detected,
        ErrorStatus::Diagnosing,
        ErrorStatus::Patching,
        ErrorStatus::Testing,
        ErrorStatus::Deploying,
        ErrorStatus::Deployed,
        ErrorStatus::PendingReview,
        ErrorStatus::Resolved,
        ErrorStatus::RolledBack,
    ];

    /// Whether moving from this status to `next` is in the transition table.
    pub fn can_transition_to(&self, next: ErrorStatus) -> bool {
        use ErrorStatus::*;
        matches!(
            (self, next),
            (Detected, Diagnosing)
                | (Diagnosing, Patching)
                | (Diagnosing, Detected)
                | (Patching, Testing)
                | (Patching, PendingReview)
                | (Patching, Detected)
                | (Testing, Deploying)
                | (Testing, PendingReview)
                | (Deploying, Deployed)
                | (Deploying, PendingReview)
                | (Deployed, Resolved)
                | (Deployed, RolledBack)
                | (PendingReview, Testing)
                | (PendingReview, Resolved)
        )
    }

    /// Stages a pipeline invocation must never leave an error in once it returns.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorStatus::Diagnosing | ErrorStatus::Patching)
    }

    /// No further automatic progress is possible from these stages.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ErrorStatus::PendingReview | ErrorStatus::Resolved | ErrorStatus::RolledBack
        )
    }
}

impl fmt::Display for ErrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorStatus::Detected => "detected",
            ErrorStatus::Diagnosing => "diagnosing",
            ErrorStatus::Patching => "patching",
            ErrorStatus::Testing => "testing",
            ErrorStatus::Deploying => "deploying",
            ErrorStatus::Deployed => "deployed",
            ErrorStatus::PendingReview => "pending_review",
            ErrorStatus::Resolved => "resolved",
            ErrorStatus::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

impl FromStr for ErrorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ErrorStatus::ALL
            .iter()
            .copied()
            .find(|status| status.to_string() == s)
            .ok_or_else(|| format!("unknown error status '{}'", s))
    }
}

/// Immutable facts about a production fault plus its pipeline status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedError {
    pub id: ErrorId,

    /// Error class reported by the runtime (e.g., "TypeError").
    pub kind: String,

    pub severity: Severity,

    /// Human-readable message.
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    /// Endpoint or route where the fault surfaced (e.g., "POST /api/triage").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    pub detected_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,

    /// How many times the detector has seen this fault.
    pub frequency: u32,

    pub status: ErrorStatus,

    /// Runtime log lines attached by the detector, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub runtime_logs: Vec<String>,

    /// When the status last changed.
    pub updated_at: DateTime<Utc>,
}

impl DetectedError {
    /// Create a new error in the `detected` status.
    pub fn new(
        id: ErrorId,
        kind: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind: kind.into(),
            severity,
            message: message.into(),
            stack_trace: None,
            endpoint: None,
            detected_at: now,
            last_seen_at: now,
            frequency: 1,
            status: ErrorStatus::Detected,
            runtime_logs: Vec::new(),
            updated_at: now,
        }
    }

    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Move to a new status. Returns an error if the transition is not in the table.
    pub fn transition(&mut self, next: ErrorStatus) -> Result<(), LifecycleError> {
        if !self.status.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                error_id: self.id,
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DetectedError {
        DetectedError::new(42, "TypeError", Severity::High, "x is undefined")
    }

    #[test]
    fn new_error_starts_detected() {
        let err = sample();
        assert_eq!(err.status, ErrorStatus::Detected);
        assert_eq!(err.frequency, 1);
        assert!(err.stack_trace.is_none());
    }

    #[test]
    fn happy_path_to_resolved() {
        let mut err = sample();
        for next in [
            ErrorStatus::Diagnosing,
            ErrorStatus::Patching,
            ErrorStatus::Testing,
            ErrorStatus::Deploying,
            ErrorStatus::Deployed,
            ErrorStatus::Resolved,
        ] {
            err.transition(next).unwrap();
        }
        assert_eq!(err.status, ErrorStatus::Resolved);
    }

    #[test]
    fn reset_edges_only_from_diagnosing_and_patching() {
        let mut err = sample();
        err.transition(ErrorStatus::Diagnosing).unwrap();
        err.transition(ErrorStatus::Detected).unwrap();

        err.transition(ErrorStatus::Diagnosing).unwrap();
        err.transition(ErrorStatus::Patching).unwrap();
        err.transition(ErrorStatus::Detected).unwrap();

        err.transition(ErrorStatus::Diagnosing).unwrap();
        err.transition(ErrorStatus::Patching).unwrap();
        err.transition(ErrorStatus::Testing).unwrap();
        let result = err.transition(ErrorStatus::Detected);
        assert!(matches!(
            result,
            Err(LifecycleError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn rolled_back_only_from_deployed() {
        assert!(ErrorStatus::Deployed.can_transition_to(ErrorStatus::RolledBack));
        assert!(!ErrorStatus::Deploying.can_transition_to(ErrorStatus::RolledBack));
        assert!(!ErrorStatus::PendingReview.can_transition_to(ErrorStatus::RolledBack));
    }

    #[test]
    fn approved_review_reenters_testing() {
        assert!(ErrorStatus::PendingReview.can_transition_to(ErrorStatus::Testing));
        assert!(!ErrorStatus::PendingReview.can_transition_to(ErrorStatus::Deploying));
    }

    #[test]
    fn cannot_skip_diagnosis() {
        let mut err = sample();
        assert!(err.transition(ErrorStatus::Patching).is_err());
        assert_eq!(err.status, ErrorStatus::Detected);
    }

    #[test]
    fn status_wire_names_are_stable() {
        let json = serde_json::to_string(&ErrorStatus::PendingReview).unwrap();
        assert_eq!(json, "\"pending_review\"");
        for status in ErrorStatus::ALL {
            let wire = serde_json::to_string(&status).unwrap();
            assert_eq!(wire.trim_matches('"'), status.to_string());
            assert_eq!(status.to_string().parse::<ErrorStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ErrorStatus>().is_err());
    }

    #[test]
    fn transient_and_terminal_classification() {
        assert!(ErrorStatus::Diagnosing.is_transient());
        assert!(ErrorStatus::Patching.is_transient());
        assert!(!ErrorStatus::Testing.is_transient());
        assert!(ErrorStatus::PendingReview.is_terminal());
        assert!(!ErrorStatus::Deployed.is_terminal());
    }

    #[test]
    fn optional_fields_omitted_from_json() {
        let err = sample();
        let json = serde_json::to_string_pretty(&err).unwrap();
        assert!(!json.contains("stack_trace"));
        assert!(!json.contains("runtime_logs"));
        let restored: DetectedError = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id, 42);
        assert_eq!(restored.severity, Severity::High);
    }
}
