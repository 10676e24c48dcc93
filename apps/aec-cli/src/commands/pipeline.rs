// pipeline.rs — Pipeline subcommands: diagnose, apply, deploy, rollback,
// resolve, gate.

use aec_orchestrator::AecConfig;
use aec_workspace::ApplyOptions;
use uuid::Uuid;

use super::{build_orchestrator, print_json};

pub async fn diagnose(config: &AecConfig, id: u64) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let Some(handle) = orchestrator.trigger_diagnostic(id).await? else {
        println!("Error {} is not in detected status; nothing to do.", id);
        return Ok(());
    };
    println!("Diagnosing error {}...", handle.error_id());
    let outcome = handle.wait().await;
    print_json(&outcome)?;
    if !outcome.success {
        anyhow::bail!("pipeline for error {} did not succeed", id);
    }
    Ok(())
}

pub async fn apply(
    config: &AecConfig,
    patch_id: &str,
    approved_by: &str,
    create_branch: bool,
    create_backup: bool,
) -> anyhow::Result<()> {
    let patch_id = Uuid::parse_str(patch_id)?;
    let orchestrator = build_orchestrator(config)?;
    let options = ApplyOptions {
        create_branch,
        create_backup,
    };
    let report = orchestrator.apply_patch(patch_id, approved_by, options).await?;

    for file in &report.files {
        match &file.error {
            None => println!("  applied  {}", file.path),
            Some(e) => println!("  FAILED   {}: {}", file.path, e),
        }
    }
    if let Some(ref branch) = report.branch {
        println!("Branch:  {}", branch);
    }
    if let Some(ref backup) = report.backup {
        println!("Backup:  {}", backup.path.display());
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    for error in &report.errors {
        eprintln!("Error:   {}", error);
    }
    if !report.success {
        anyhow::bail!("patch {} was not fully applied", patch_id);
    }
    println!("Patch {} applied; run `aec deploy` to test and deploy.", patch_id);
    Ok(())
}

pub async fn deploy(config: &AecConfig, id: u64) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let outcome = orchestrator.run_deployment(id).await?;
    print_json(&outcome)?;
    if !outcome.success {
        anyhow::bail!("deployment for error {} did not succeed", id);
    }
    Ok(())
}

pub async fn rollback(config: &AecConfig, patch_id: &str, reason: &str) -> anyhow::Result<()> {
    let patch_id = Uuid::parse_str(patch_id)?;
    let orchestrator = build_orchestrator(config)?;
    let report = orchestrator.rollback_patch(patch_id, reason).await?;

    for path in &report.restore.restored {
        println!("  restored {}", path);
    }
    for path in &report.restore.removed {
        println!("  removed  {}", path);
    }
    for warning in &report.warnings {
        println!("Warning: {}", warning);
    }
    for error in &report.restore.errors {
        eprintln!("Error:   {}", error);
    }
    if !report.restore.is_complete() {
        anyhow::bail!("rollback of patch {} left files unrestored", patch_id);
    }
    println!("Patch {} rolled back.", patch_id);
    Ok(())
}

pub fn resolve(config: &AecConfig, id: u64) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let error = orchestrator.resolve(id)?;
    println!("Error {} is {}.", error.id, error.status);
    Ok(())
}

pub fn gate(config: &AecConfig, id: u64) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let trace = orchestrator.evaluate_gate(id)?;
    for step in &trace.steps {
        println!(
            "  {:<14} {}{}",
            step.check,
            step.outcome,
            if step.terminal { "  <- decided" } else { "" }
        );
    }
    println!();
    println!("Decision: {}", trace.decision.label());
    println!("Reason:   {}", trace.decision.reason());
    Ok(())
}
