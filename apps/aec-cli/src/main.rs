//! # aec
//!
//! Command-line entry point for autonomous error correction.
//!
//! - `aec report` / `aec list` / `aec show` — record and inspect detected errors
//! - `aec diagnose` — run diagnose → patch for one error and wait for it
//! - `aec apply` / `aec rollback` — approve or undo a generated patch
//! - `aec deploy` / `aec gate` / `aec sweep` — test, gate, and deploy
//! - `aec reconcile` / `aec backups` — maintenance

mod commands;

use std::path::PathBuf;

use aec_orchestrator::AecConfig;
use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use commands::errors::SeverityArg;

/// Autonomous error correction: diagnose, patch, and deploy fixes.
#[derive(Parser)]
#[command(name = "aec", version, about)]
struct Cli {
    /// Project root directory (defaults to current directory).
    #[arg(long, default_value = ".")]
    project_root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a detected error (repeat occurrences bump its frequency).
    Report {
        /// Error type, e.g. "TypeError".
        #[arg(long)]
        kind: String,
        #[arg(long, value_enum, default_value = "medium")]
        severity: SeverityArg,
        /// Error message.
        message: String,
        /// File containing the stack trace.
        #[arg(long)]
        stack_trace_file: Option<PathBuf>,
        /// Request path or operation that failed.
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// List recorded errors.
    List {
        /// Filter by status (e.g., "detected", "pending_review").
        #[arg(long)]
        status: Option<String>,
    },
    /// Show an error with its diagnosis and patches.
    Show { id: u64 },
    /// Diagnose and patch a detected error, waiting for the pipeline.
    Diagnose { id: u64 },
    /// Apply a reviewed patch.
    Apply {
        patch_id: String,
        /// Who approved the patch.
        #[arg(long)]
        approved_by: String,
        /// Write on the current branch instead of a patch branch.
        #[arg(long)]
        no_branch: bool,
        /// Skip the pre-apply backup (the patch cannot be rolled back).
        #[arg(long)]
        no_backup: bool,
    },
    /// Test, gate, and deploy the applied patch for an error.
    Deploy { id: u64 },
    /// Roll back an applied patch from its backup.
    Rollback {
        patch_id: String,
        #[arg(long, default_value = "manual rollback")]
        reason: String,
    },
    /// Mark a reviewed or deployed error resolved.
    Resolve { id: u64 },
    /// Show the deployment gate decision for an error.
    Gate { id: u64 },
    /// Reset errors stuck in diagnosing/patching back to detected.
    Reconcile,
    /// Run deferred deployments that are now due.
    Sweep,
    /// List backups.
    Backups,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so command output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("aec_orchestrator=info".parse()?)
                .add_directive("aec_workspace=info".parse()?)
                .add_directive("aec=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let project_root = cli.project_root.canonicalize().unwrap_or(cli.project_root);
    let config = AecConfig::load(&project_root)?;

    match cli.command {
        Commands::Report {
            kind,
            severity,
            message,
            stack_trace_file,
            endpoint,
        } => commands::errors::report(
            &config,
            &kind,
            severity.into(),
            &message,
            stack_trace_file.as_deref(),
            endpoint.as_deref(),
        ),
        Commands::List { status } => commands::errors::list(&config, status.as_deref()),
        Commands::Show { id } => commands::errors::show(&config, id),
        Commands::Diagnose { id } => commands::pipeline::diagnose(&config, id).await,
        Commands::Apply {
            patch_id,
            approved_by,
            no_branch,
            no_backup,
        } => {
            commands::pipeline::apply(&config, &patch_id, &approved_by, !no_branch, !no_backup)
                .await
        }
        Commands::Deploy { id } => commands::pipeline::deploy(&config, id).await,
        Commands::Rollback { patch_id, reason } => {
            commands::pipeline::rollback(&config, &patch_id, &reason).await
        }
        Commands::Resolve { id } => commands::pipeline::resolve(&config, id),
        Commands::Gate { id } => commands::pipeline::gate(&config, id),
        Commands::Reconcile => commands::maintenance::reconcile(&config),
        Commands::Sweep => commands::maintenance::sweep(&config).await,
        Commands::Backups => commands::maintenance::backups(&config),
    }
}
