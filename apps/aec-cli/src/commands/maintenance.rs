// maintenance.rs — reconcile, sweep, backups.

use aec_orchestrator::AecConfig;
use chrono::Utc;

use super::{build_orchestrator, print_json};

pub fn reconcile(config: &AecConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let reset = orchestrator.reconcile_stale(Utc::now())?;
    if reset.is_empty() {
        println!("No stale pipelines.");
    } else {
        for id in &reset {
            println!("Reset error {} to detected", id);
        }
    }
    Ok(())
}

pub async fn sweep(config: &AecConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let outcomes = orchestrator.deploy_due(Utc::now()).await?;
    if outcomes.is_empty() {
        println!("No deferred deployments are due.");
        return Ok(());
    }
    print_json(&outcomes)
}

pub fn backups(config: &AecConfig) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config)?;
    let backups = orchestrator.backups().list()?;
    if backups.is_empty() {
        println!("No backups.");
        return Ok(());
    }
    for path in &backups {
        println!("{}", path.display());
    }
    println!("\n{} backup(s) under {}", backups.len(), orchestrator.backups().backup_root().display());
    Ok(())
}
