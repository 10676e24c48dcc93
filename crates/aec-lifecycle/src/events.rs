// events.rs — Lifecycle events and notification dispatch.
//
// The orchestrator emits an event at every status change and at each
// pipeline milestone. Sinks (JSONL log, dashboards, alerting bridges)
// subscribe through `NotificationSink`. A failing sink never affects the
// pipeline: dispatch logs the error and moves on.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detected_error::{ErrorId, ErrorStatus};
use crate::error::LifecycleError;

/// Events emitted at key lifecycle points.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum AecEvent {
    StatusChanged {
        error_id: ErrorId,
        from_status: ErrorStatus,
        to_status: ErrorStatus,
        timestamp: DateTime<Utc>,
    },

    DiagnosisCompleted {
        error_id: ErrorId,
        diagnostic_id: Uuid,
        impact: String,
        timestamp: DateTime<Utc>,
    },

    PatchGenerated {
        error_id: ErrorId,
        patch_id: Uuid,
        version: String,
        warnings: usize,
        timestamp: DateTime<Utc>,
    },

    PatchApplied {
        error_id: ErrorId,
        patch_id: Uuid,
        files: Vec<String>,
        branch: Option<String>,
        timestamp: DateTime<Utc>,
    },

    /// The deployment gate decided on a patch.
    GateDecided {
        error_id: ErrorId,
        patch_id: Uuid,
        decision: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    Deployed {
        error_id: ErrorId,
        patch_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    RolledBack {
        error_id: ErrorId,
        patch_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl AecEvent {
    pub fn event_type(&self) -> &str {
        match self {
            AecEvent::StatusChanged { .. } => "status_changed",
            AecEvent::DiagnosisCompleted { .. } => "diagnosis_completed",
            AecEvent::PatchGenerated { .. } => "patch_generated",
            AecEvent::PatchApplied { .. } => "patch_applied",
            AecEvent::GateDecided { .. } => "gate_decided",
            AecEvent::Deployed { .. } => "deployed",
            AecEvent::RolledBack { .. } => "rolled_back",
        }
    }

    pub fn error_id(&self) -> ErrorId {
        match self {
            AecEvent::StatusChanged { error_id, .. }
            | AecEvent::DiagnosisCompleted { error_id, .. }
            | AecEvent::PatchGenerated { error_id, .. }
            | AecEvent::PatchApplied { error_id, .. }
            | AecEvent::GateDecided { error_id, .. }
            | AecEvent::Deployed { error_id, .. }
            | AecEvent::RolledBack { error_id, .. } => *error_id,
        }
    }

    pub fn status_changed(error_id: ErrorId, from: ErrorStatus, to: ErrorStatus) -> Self {
        AecEvent::StatusChanged {
            error_id,
            from_status: from,
            to_status: to,
            timestamp: Utc::now(),
        }
    }
}

/// Receives lifecycle events.
pub trait NotificationSink: Send + Sync {
    /// Handle an event. Errors are logged by the dispatcher, never propagated.
    fn send(&self, event: &AecEvent) -> Result<(), LifecycleError>;
}

/// Appends events as JSON lines to a file.
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl NotificationSink for LogSink {
    fn send(&self, event: &AecEvent) -> Result<(), LifecycleError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| LifecycleError::IoError {
                path: parent.display().to_string(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| LifecycleError::IoError {
                path: self.path.display().to_string(),
                source,
            })?;

        let json = serde_json::to_string(event)?;
        writeln!(file, "{}", json).map_err(|source| LifecycleError::IoError {
            path: self.path.display().to_string(),
            source,
        })?;

        Ok(())
    }
}

/// Fans events out to every registered sink.
#[derive(Default)]
pub struct EventDispatcher {
    sinks: Vec<Box<dyn NotificationSink>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        self.sinks.push(sink);
    }

    pub fn dispatch(&self, event: &AecEvent) {
        for sink in &self.sinks {
            if let Err(e) = sink.send(event) {
                tracing::warn!(event = event.event_type(), "notification sink error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FailingSink;

    impl NotificationSink for FailingSink {
        fn send(&self, _event: &AecEvent) -> Result<(), LifecycleError> {
            Err(LifecycleError::NotificationError("down".to_string()))
        }
    }

    #[test]
    fn status_event_serializes_with_wire_names() {
        let event = AecEvent::status_changed(42, ErrorStatus::Detected, ErrorStatus::Diagnosing);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event_type\":\"status_changed\""));
        assert!(json.contains("\"to_status\":\"diagnosing\""));
        assert_eq!(event.error_id(), 42);
    }

    #[test]
    fn log_sink_appends_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/events.jsonl");
        let sink = LogSink::new(&path);

        sink.send(&AecEvent::status_changed(1, ErrorStatus::Detected, ErrorStatus::Diagnosing))
            .unwrap();
        sink.send(&AecEvent::status_changed(1, ErrorStatus::Diagnosing, ErrorStatus::Patching))
            .unwrap();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }

    #[test]
    fn failing_sink_does_not_block_others() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.jsonl");

        let mut dispatcher = EventDispatcher::new();
        dispatcher.add_sink(Box::new(FailingSink));
        dispatcher.add_sink(Box::new(LogSink::new(&path)));
        dispatcher.dispatch(&AecEvent::status_changed(
            7,
            ErrorStatus::Deployed,
            ErrorStatus::RolledBack,
        ));

        assert!(fs::read_to_string(&path).unwrap().contains("rolled_back"));
    }
}
