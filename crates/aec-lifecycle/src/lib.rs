//! # aec-lifecycle
//!
//! Error lifecycle state machine and remediation records for autonomous
//! error correction.
//!
//! A [`DetectedError`] is the unit of work. Its [`ErrorStatus`] is the single
//! source of truth for which pipeline stage the error is in, and every
//! status change is checked against an explicit transition table.
//!
//! ## Key components
//!
//! - [`DetectedError`] / [`ErrorStatus`] — the lifecycle state machine
//!   (detected → diagnosing → patching → testing → deploying → deployed
//!   → resolved, with reset and rollback edges)
//! - [`DiagnosticRecord`] — root-cause analysis, one per diagnosed error
//! - [`GeneratedPatch`] / [`PatchRecord`] — proposed whole-file replacements
//!   and their validation/deployment status
//! - [`RecordStore`] — persistence handle injected into every component;
//!   [`JsonRecordStore`] is the file-backed implementation
//! - [`AecEvent`] / [`EventDispatcher`] — lifecycle events fanned out to
//!   notification sinks

pub mod detected_error;
pub mod diagnostic;
pub mod error;
pub mod events;
pub mod patch;
pub mod store;

pub use detected_error::{DetectedError, ErrorId, ErrorStatus, Severity};
pub use diagnostic::{
    DiagnosisPayload, DiagnosticRecord, ImpactLevel, OracleMetadata, RootCause,
};
pub use error::LifecycleError;
pub use events::{AecEvent, EventDispatcher, LogSink, NotificationSink};
pub use patch::{
    DeploymentStatus, FilePatch, FilePatchPayload, GeneratedPatch, PatchPayload, PatchRecord,
    ValidationStatus,
};
pub use store::{JsonRecordStore, RecordStore};
