//! Test and deployment collaborators.
//!
//! The orchestrator only consumes pass/fail and raw output from these.
//! The command-backed implementations run a configured shell command in
//! the project root.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aec_lifecycle::PatchRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::error::OrchestratorError;

/// Result of running the test suite against an applied patch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestOutcome {
    pub passed: bool,
    pub output: String,
}

#[async_trait]
pub trait TestRunner: Send + Sync {
    async fn run_tests(&self, patch: &PatchRecord) -> Result<TestOutcome, OrchestratorError>;
}

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, patch: &PatchRecord) -> Result<(), OrchestratorError>;

    /// `Ok(true)` when the deployed service is healthy.
    async fn health_check(&self, patch: &PatchRecord) -> Result<bool, OrchestratorError>;

    /// Called after the working tree has been restored from backup, to put
    /// the restored code back into service.
    async fn rollback(&self, _patch: &PatchRecord) -> Result<(), OrchestratorError> {
        Ok(())
    }
}

/// Runs a shell command and captures combined output.
async fn run_shell(
    command: &str,
    work_dir: &Path,
    timeout: Duration,
) -> Result<(bool, String), OrchestratorError> {
    #[cfg(windows)]
    let mut cmd = {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(command);
        c
    };
    #[cfg(not(windows))]
    let mut cmd = {
        let mut c = Command::new("sh");
        c.arg("-c").arg(command);
        c
    };
    cmd.current_dir(work_dir).kill_on_drop(true);

    tracing::debug!(command, "running command");
    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map_err(|e| OrchestratorError::Command(format!("{}: {}", command, e)))?,
        Err(_) => {
            return Err(OrchestratorError::Command(format!(
                "{}: timed out after {}s",
                command,
                timeout.as_secs()
            )))
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        text.push_str(&stderr);
    }
    Ok((output.status.success(), text))
}

/// Test runner backed by a shell command; exit status 0 means pass.
pub struct CommandTestRunner {
    command: String,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CommandTestRunner {
    pub fn new(command: impl Into<String>, work_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            work_dir: work_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TestRunner for CommandTestRunner {
    async fn run_tests(&self, patch: &PatchRecord) -> Result<TestOutcome, OrchestratorError> {
        tracing::info!(patch_id = %patch.patch_id(), "running tests");
        let (passed, output) = run_shell(&self.command, &self.work_dir, self.timeout).await?;
        Ok(TestOutcome { passed, output })
    }
}

/// Used when no test command is configured. Never passes, so nothing
/// deploys without a human.
pub struct NoTestRunner;

#[async_trait]
impl TestRunner for NoTestRunner {
    async fn run_tests(&self, _patch: &PatchRecord) -> Result<TestOutcome, OrchestratorError> {
        Ok(TestOutcome {
            passed: false,
            output: "no test command configured; manual validation required".to_string(),
        })
    }
}

pub struct CommandDeployer {
    deploy_command: String,
    health_check_command: Option<String>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl CommandDeployer {
    pub fn new(
        deploy_command: impl Into<String>,
        health_check_command: Option<String>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            deploy_command: deploy_command.into(),
            health_check_command,
            work_dir: work_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self, patch: &PatchRecord) -> Result<(), OrchestratorError> {
        tracing::info!(patch_id = %patch.patch_id(), "deploying");
        let (ok, output) = run_shell(&self.deploy_command, &self.work_dir, self.timeout).await?;
        if ok {
            Ok(())
        } else {
            Err(OrchestratorError::Command(format!(
                "deploy command failed: {}",
                output.trim()
            )))
        }
    }

    async fn health_check(&self, _patch: &PatchRecord) -> Result<bool, OrchestratorError> {
        match &self.health_check_command {
            Some(command) => Ok(run_shell(command, &self.work_dir, self.timeout).await?.0),
            None => Ok(true),
        }
    }

    async fn rollback(&self, patch: &PatchRecord) -> Result<(), OrchestratorError> {
        // Redeploy the restored tree.
        self.deploy(patch).await
    }
}

/// Deployer for projects without a deploy step: deploying is a no-op and
/// the service is always healthy.
pub struct NoopDeployer;

#[async_trait]
impl Deployer for NoopDeployer {
    async fn deploy(&self, _patch: &PatchRecord) -> Result<(), OrchestratorError> {
        Ok(())
    }

    async fn health_check(&self, _patch: &PatchRecord) -> Result<bool, OrchestratorError> {
        Ok(true)
    }
}
