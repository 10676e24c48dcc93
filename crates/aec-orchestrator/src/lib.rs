//! # aec-orchestrator
//!
//! Supervised remediation pipelines for detected errors.
//!
//! ## Key components
//!
//! - [`Orchestrator`] — owns every status change: claims `detected` errors,
//!   runs diagnose → patch in the background, applies approved patches,
//!   and drives test → gate → deploy → verify with rollback
//! - [`DiagnosticOracle`] / [`PatchOracle`] — the reasoning contracts;
//!   [`HttpOracle`] speaks them over HTTP
//! - [`TestRunner`] / [`Deployer`] — pass/fail collaborators for the
//!   deployment cycle, with shell-command implementations
//! - [`AecConfig`] — per-project configuration from `.aec/config.toml`

pub mod config;
pub mod error;
pub mod oracle;
pub mod orchestrator;
pub mod runner;

pub use config::{AecConfig, DeployConfig, OracleConfig, PipelineConfig};
pub use error::{OracleError, OrchestratorError};
pub use oracle::{
    parse_response, CurrentFile, DiagnosticOracle, HttpOracle, PatchOracle, PatchRequest,
    UnconfiguredOracle,
};
pub use orchestrator::{
    Collaborators, DeploymentOutcome, Orchestrator, PipelineHandle, PipelineOutcome,
    SurgicalOptions,
};
pub use runner::{
    CommandDeployer, CommandTestRunner, Deployer, NoTestRunner, NoopDeployer, TestOutcome,
    TestRunner,
};
