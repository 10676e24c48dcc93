// errors.rs — Error subcommands: report, list, show.

use std::path::Path;

use aec_lifecycle::{DetectedError, ErrorStatus, RecordStore, Severity};
use aec_orchestrator::AecConfig;
use chrono::Utc;
use clap::ValueEnum;

use super::{open_store, truncate};

#[derive(Clone, Copy, ValueEnum)]
pub enum SeverityArg {
    Low,
    Medium,
    High,
    Critical,
}

impl From<SeverityArg> for Severity {
    fn from(arg: SeverityArg) -> Self {
        match arg {
            SeverityArg::Low => Severity::Low,
            SeverityArg::Medium => Severity::Medium,
            SeverityArg::High => Severity::High,
            SeverityArg::Critical => Severity::Critical,
        }
    }
}

pub fn report(
    config: &AecConfig,
    kind: &str,
    severity: Severity,
    message: &str,
    stack_trace_file: Option<&Path>,
    endpoint: Option<&str>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let stack_trace = match stack_trace_file {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    let error = record_occurrence(store.as_ref(), kind, severity, message, stack_trace, endpoint)?;
    if error.frequency > 1 {
        println!(
            "Error {} seen again ({} occurrences, status {})",
            error.id, error.frequency, error.status
        );
    } else {
        println!("Recorded error {}: {} {}", error.id, error.kind, truncate(&error.message, 60));
    }
    Ok(())
}

/// Save a new error, or bump the frequency of an open one with the same
/// kind, message, and endpoint.
pub fn record_occurrence(
    store: &dyn RecordStore,
    kind: &str,
    severity: Severity,
    message: &str,
    stack_trace: Option<String>,
    endpoint: Option<&str>,
) -> anyhow::Result<DetectedError> {
    let existing = store.list_errors()?;
    let open = existing
        .iter()
        .find(|e| {
            e.kind == kind
                && e.message == message
                && e.endpoint.as_deref() == endpoint
                && !matches!(e.status, ErrorStatus::Resolved | ErrorStatus::RolledBack)
        })
        .cloned();
    if let Some(mut error) = open {
        error.frequency += 1;
        error.last_seen_at = Utc::now();
        error.severity = error.severity.max(severity);
        store.save_error(&error)?;
        return Ok(error);
    }

    let next_id = existing.iter().map(|e| e.id).max().unwrap_or(0) + 1;
    let mut error = DetectedError::new(next_id, kind, severity, message);
    error.stack_trace = stack_trace;
    error.endpoint = endpoint.map(str::to_string);
    store.save_error(&error)?;
    tracing::info!(error_id = error.id, kind, %severity, "error recorded");
    Ok(error)
}

pub fn list(config: &AecConfig, status: Option<&str>) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let errors = match status {
        Some(s) => {
            let status: ErrorStatus = s.parse().map_err(anyhow::Error::msg)?;
            store.list_errors_by_status(status)?
        }
        None => store.list_errors()?,
    };

    if errors.is_empty() {
        println!("No errors found.");
        return Ok(());
    }

    println!(
        "{:<8} {:<16} {:<10} {:<16} {:<6} {:<40}",
        "ID", "KIND", "SEVERITY", "STATUS", "SEEN", "MESSAGE"
    );
    println!("{}", "-".repeat(100));
    for e in &errors {
        println!(
            "{:<8} {:<16} {:<10} {:<16} {:<6} {:<40}",
            e.id,
            truncate(&e.kind, 16),
            e.severity.to_string(),
            e.status.to_string(),
            e.frequency,
            truncate(&e.message, 40),
        );
    }
    println!("\n{} error(s) total.", errors.len());
    Ok(())
}

pub fn show(config: &AecConfig, id: u64) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let Some(error) = store.get_error(id)? else {
        anyhow::bail!("Error not found: {}", id);
    };

    println!("Error:     {}", error.id);
    println!("Kind:      {}", error.kind);
    println!("Severity:  {}", error.severity);
    println!("Status:    {}", error.status);
    println!("Message:   {}", error.message);
    if let Some(ref endpoint) = error.endpoint {
        println!("Endpoint:  {}", endpoint);
    }
    println!("Seen:      {} time(s), last {}", error.frequency, error.last_seen_at.to_rfc3339());
    println!("Updated:   {}", error.updated_at.to_rfc3339());

    if let Some(diagnostic) = store.get_diagnostic(id)? {
        println!();
        println!("Diagnosis: {}", diagnostic.diagnostic_id);
        println!("  Impact:  {}", diagnostic.impact);
        println!("  Cause:   {}", diagnostic.root_cause.issue);
        if let Some(ref file) = diagnostic.root_cause.file {
            match diagnostic.root_cause.line {
                Some(line) => println!("  At:      {}:{}", file, line),
                None => println!("  At:      {}", file),
            }
        }
        if !diagnostic.affected_features.is_empty() {
            println!("  Affects: {}", diagnostic.affected_features.join(", "));
        }
        for (i, step) in diagnostic.fix_steps.iter().enumerate() {
            println!("  {}. {}", i + 1, step);
        }
    }

    let patches = store.list_patches(id)?;
    if !patches.is_empty() {
        println!();
        println!("{:<38} {:<8} {:<12} {:<12} {:<6}", "PATCH", "VERSION", "VALIDATION", "DEPLOYMENT", "FILES");
        for p in &patches {
            println!(
                "{:<38} {:<8} {:<12} {:<12} {:<6}",
                p.patch_id(),
                p.patch.version,
                p.validation_status().to_string(),
                p.deployment_status().to_string(),
                p.patch.files.len(),
            );
            for warning in &p.safety_warnings {
                println!("    ! {}", warning);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use aec_lifecycle::JsonRecordStore;
    use tempfile::tempdir;

    #[test]
    fn repeat_occurrence_bumps_frequency() {
        let dir = tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path()).unwrap();

        let first = record_occurrence(&store, "TypeError", Severity::Low, "x is undefined", None, Some("/api/a")).unwrap();
        let again = record_occurrence(&store, "TypeError", Severity::High, "x is undefined", None, Some("/api/a")).unwrap();
        assert_eq!(first.id, again.id);
        assert_eq!(again.frequency, 2);
        assert_eq!(again.severity, Severity::High);

        let other = record_occurrence(&store, "TypeError", Severity::Low, "x is undefined", None, Some("/api/b")).unwrap();
        assert_eq!(other.id, first.id + 1);
        assert_eq!(store.list_errors().unwrap().len(), 2);
    }

    #[test]
    fn resolved_errors_are_not_reopened() {
        let dir = tempdir().unwrap();
        let store = JsonRecordStore::new(dir.path()).unwrap();
        let mut first = record_occurrence(&store, "E", Severity::Low, "m", None, None).unwrap();
        first.status = ErrorStatus::Resolved;
        store.save_error(&first).unwrap();

        let next = record_occurrence(&store, "E", Severity::Low, "m", None, None).unwrap();
        assert_ne!(next.id, first.id);
        assert_eq!(next.frequency, 1);
        assert_eq!(next.status, ErrorStatus::Detected);
    }

    #[test]
    fn show_of_unknown_error_is_an_error() {
        let dir = tempdir().unwrap();
        let config = AecConfig::for_project(dir.path());
        let err = show(&config, 404).unwrap_err();
        assert_eq!(err.to_string(), "Error not found: 404");
    }
}
