// Subcommand implementations and the wiring they share.

pub mod errors;
pub mod maintenance;
pub mod pipeline;

use std::sync::Arc;
use std::time::Duration;

use aec_lifecycle::{EventDispatcher, JsonRecordStore, LogSink};
use aec_orchestrator::{
    AecConfig, Collaborators, CommandDeployer, CommandTestRunner, Deployer, DiagnosticOracle,
    HttpOracle, NoTestRunner, NoopDeployer, Orchestrator, PatchOracle, TestRunner,
    UnconfiguredOracle,
};
use aec_submit::{GitAdapter, VcsAdapter};

pub fn open_store(config: &AecConfig) -> anyhow::Result<Arc<JsonRecordStore>> {
    Ok(Arc::new(JsonRecordStore::new(&config.state_dir)?))
}

/// Construct the orchestrator and every collaborator from project config.
pub fn build_orchestrator(config: &AecConfig) -> anyhow::Result<Orchestrator> {
    let store = open_store(config)?;
    let vcs: Arc<dyn VcsAdapter> = Arc::new(GitAdapter::new(&config.project_root, &config.vcs));

    let (diagnostic_oracle, patch_oracle): (Arc<dyn DiagnosticOracle>, Arc<dyn PatchOracle>) =
        match &config.oracle.endpoint {
            Some(endpoint) => {
                let oracle = Arc::new(HttpOracle::new(
                    endpoint.clone(),
                    Duration::from_secs(config.oracle.timeout_secs),
                )?);
                let diagnostic: Arc<dyn DiagnosticOracle> = oracle.clone();
                let patch: Arc<dyn PatchOracle> = oracle;
                (diagnostic, patch)
            }
            None => {
                tracing::warn!("no [oracle] endpoint configured; diagnoses will fail");
                (Arc::new(UnconfiguredOracle), Arc::new(UnconfiguredOracle))
            }
        };

    let timeout = Duration::from_secs(config.deploy.command_timeout_secs);
    let test_runner: Arc<dyn TestRunner> = match &config.deploy.test_command {
        Some(command) => Arc::new(CommandTestRunner::new(
            command.clone(),
            &config.project_root,
            timeout,
        )),
        None => Arc::new(NoTestRunner),
    };
    let deployer: Arc<dyn Deployer> = match &config.deploy.deploy_command {
        Some(command) => Arc::new(CommandDeployer::new(
            command.clone(),
            config.deploy.health_check_command.clone(),
            &config.project_root,
            timeout,
        )),
        None => Arc::new(NoopDeployer),
    };

    let mut events = EventDispatcher::new();
    events.add_sink(Box::new(LogSink::new(&config.events_log)));

    Ok(Orchestrator::new(
        config.clone(),
        Collaborators {
            store,
            vcs,
            diagnostic_oracle,
            patch_oracle,
            test_runner,
            deployer,
            events,
        },
    ))
}

/// Pretty-print a serializable value to stdout.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        s.to_string()
    }
}
