// orchestrator.rs — Drives errors through the remediation lifecycle.
//
// The orchestrator is the only component that changes an error's status.
// Each pipeline stage reads its inputs from the record store, calls one
// collaborator, persists the result, and moves the error forward. Any
// failure before a patch exists settles the error back to `detected`;
// failures after that park it in `pending_review` for a human.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use aec_context::ContextBuilder;
use aec_lifecycle::{
    AecEvent, DetectedError, DeploymentStatus, DiagnosticRecord, ErrorId, ErrorStatus,
    EventDispatcher, GeneratedPatch, PatchRecord, RecordStore, ValidationStatus,
};
use aec_policy::{DeploymentGate, GateDecision, GateInput, GateTrace, ValidationResult};
use aec_submit::VcsAdapter;
use aec_workspace::{
    resolve_project_path, ApplyOptions, ApplyReport, BackupManager, PatchApplicator,
    RollbackReport, SafetyValidator,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{AecConfig, PipelineConfig};
use crate::error::OrchestratorError;
use crate::oracle::{CurrentFile, DiagnosticOracle, PatchOracle, PatchRequest};
use crate::runner::{Deployer, TestOutcome, TestRunner};

/// Options for one surgical-procedure run.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SurgicalOptions {
    pub auto_apply: bool,
    pub create_branch: bool,
    pub create_backup: bool,
}

impl SurgicalOptions {
    pub fn apply_options(&self) -> ApplyOptions {
        ApplyOptions {
            create_branch: self.create_branch,
            create_backup: self.create_backup,
        }
    }
}

impl From<&PipelineConfig> for SurgicalOptions {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            auto_apply: config.auto_apply,
            create_branch: config.create_branch,
            create_backup: config.create_backup,
        }
    }
}

/// What a diagnose/patch pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub error_id: ErrorId,
    pub success: bool,
    pub final_status: ErrorStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub patch_id: Option<Uuid>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl PipelineOutcome {
    fn new(error_id: ErrorId, final_status: ErrorStatus) -> Self {
        Self {
            error_id,
            success: true,
            final_status,
            diagnostic_id: None,
            patch_id: None,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn failed(error_id: ErrorId, final_status: ErrorStatus, errors: Vec<String>) -> Self {
        Self {
            success: false,
            errors,
            ..Self::new(error_id, final_status)
        }
    }
}

/// What a test/gate/deploy cycle produced.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentOutcome {
    pub error_id: ErrorId,
    pub patch_id: Uuid,
    pub success: bool,
    pub tests_passed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<GateDecision>,
    pub final_status: ErrorStatus,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// A pipeline running in the background.
///
/// Dropping the handle does not cancel the pipeline; the supervisor still
/// settles the error's status when the work finishes.
pub struct PipelineHandle {
    error_id: ErrorId,
    join: JoinHandle<PipelineOutcome>,
}

impl PipelineHandle {
    pub fn error_id(&self) -> ErrorId {
        self.error_id
    }

    /// Wait for the pipeline and its status settlement to finish.
    pub async fn wait(self) -> PipelineOutcome {
        match self.join.await {
            Ok(outcome) => outcome,
            Err(e) => PipelineOutcome::failed(
                self.error_id,
                ErrorStatus::Detected,
                vec![format!("pipeline supervisor failed: {}", e)],
            ),
        }
    }
}

/// Everything the orchestrator talks to. Injected so tests can script it.
pub struct Collaborators {
    pub store: Arc<dyn RecordStore>,
    pub vcs: Arc<dyn VcsAdapter>,
    pub diagnostic_oracle: Arc<dyn DiagnosticOracle>,
    pub patch_oracle: Arc<dyn PatchOracle>,
    pub test_runner: Arc<dyn TestRunner>,
    pub deployer: Arc<dyn Deployer>,
    pub events: EventDispatcher,
}

struct Inner {
    config: AecConfig,
    store: Arc<dyn RecordStore>,
    diagnostic_oracle: Arc<dyn DiagnosticOracle>,
    patch_oracle: Arc<dyn PatchOracle>,
    test_runner: Arc<dyn TestRunner>,
    deployer: Arc<dyn Deployer>,
    events: EventDispatcher,
    context: Arc<ContextBuilder>,
    safety: Arc<SafetyValidator>,
    applicator: Arc<PatchApplicator>,
    gate: DeploymentGate,
    /// Errors with a pipeline stage running in this process.
    in_flight: Mutex<HashSet<ErrorId>>,
}

/// Exclusive hold on one error's pipeline; released on drop.
struct PipelineClaim {
    inner: Arc<Inner>,
    error_id: ErrorId,
}

impl Drop for PipelineClaim {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.error_id);
    }
}

/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(config: AecConfig, collaborators: Collaborators) -> Self {
        let root = config.project_root.clone();
        let vcs = collaborators.vcs;
        let context = ContextBuilder::new(root.clone(), config.context.clone(), vcs.clone());
        let safety = SafetyValidator::new(root.clone(), config.safety.clone(), vcs.clone());
        let applicator = PatchApplicator::new(root, vcs, config.vcs.clone());
        let gate = DeploymentGate::new(config.gate.clone());
        Self {
            inner: Arc::new(Inner {
                config,
                store: collaborators.store,
                diagnostic_oracle: collaborators.diagnostic_oracle,
                patch_oracle: collaborators.patch_oracle,
                test_runner: collaborators.test_runner,
                deployer: collaborators.deployer,
                events: collaborators.events,
                context: Arc::new(context),
                safety: Arc::new(safety),
                applicator: Arc::new(applicator),
                gate,
                in_flight: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn config(&self) -> &AecConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.inner.store
    }

    pub fn backups(&self) -> &BackupManager {
        self.inner.applicator.backups()
    }

    // ── Diagnosis ──────────────────────────────────────────────

    /// Claim a `detected` error and run diagnose → patch in the background.
    ///
    /// Returns `Ok(None)` without doing anything if the error is not in
    /// `detected` (already being worked on, or past diagnosis). The claim is
    /// an atomic compare-and-transition, so concurrent triggers for the same
    /// error start at most one pipeline.
    pub async fn trigger_diagnostic(
        &self,
        error_id: ErrorId,
    ) -> Result<Option<PipelineHandle>, OrchestratorError> {
        let Some(claim) = self.claim(error_id) else {
            info!(error_id, "trigger ignored; a pipeline is already running");
            return Ok(None);
        };
        let claimed = self.inner.store.compare_and_transition(
            error_id,
            ErrorStatus::Detected,
            ErrorStatus::Diagnosing,
        )?;
        if claimed.is_none() {
            info!(error_id, "trigger ignored; error is not in detected status");
            return Ok(None);
        }
        self.emit(AecEvent::status_changed(
            error_id,
            ErrorStatus::Detected,
            ErrorStatus::Diagnosing,
        ));

        let worker = self.clone();
        let work = tokio::spawn(async move { worker.diagnose_and_patch(error_id).await });

        let supervisor = self.clone();
        let join = tokio::spawn(async move {
            let outcome = match work.await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => {
                    error!(error_id, "pipeline failed: {}", e);
                    PipelineOutcome::failed(error_id, ErrorStatus::Detected, vec![e.to_string()])
                }
                Err(e) => {
                    error!(error_id, "pipeline task aborted: {}", e);
                    PipelineOutcome::failed(
                        error_id,
                        ErrorStatus::Detected,
                        vec![format!("pipeline task aborted: {}", e)],
                    )
                }
            };
            let outcome = supervisor.settle_outcome(outcome);
            drop(claim);
            outcome
        });

        Ok(Some(PipelineHandle { error_id, join }))
    }

    async fn diagnose_and_patch(&self, error_id: ErrorId) -> Result<PipelineOutcome, OrchestratorError> {
        let error = self.require_error(error_id)?;

        let builder = self.inner.context.clone();
        let snapshot = error.clone();
        let context = blocking(move || builder.build(&snapshot)).await?;

        let started = Instant::now();
        let payload = match self.inner.diagnostic_oracle.diagnose(&context).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error_id, "diagnostic oracle failed: {}", e);
                return self.abandon(error_id, vec![format!("diagnosis failed: {}", e)]);
            }
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Err(problems) = payload.validate(self.inner.config.pipeline.min_explanation_len) {
            warn!(error_id, ?problems, "malformed diagnosis rejected");
            return self.abandon(
                error_id,
                problems
                    .into_iter()
                    .map(|p| format!("malformed diagnosis: {}", p))
                    .collect(),
            );
        }

        let record = payload.into_record(error_id, duration_ms);
        self.inner.store.save_diagnostic(&record)?;
        info!(
            error_id,
            diagnostic_id = %record.diagnostic_id,
            impact = %record.impact,
            duration_ms,
            "diagnosis completed"
        );
        self.emit(AecEvent::DiagnosisCompleted {
            error_id,
            diagnostic_id: record.diagnostic_id,
            impact: record.impact.to_string(),
            timestamp: Utc::now(),
        });

        self.move_to(error_id, ErrorStatus::Patching)?;
        let options = SurgicalOptions::from(&self.inner.config.pipeline);
        let mut outcome = self.surgical(error_id, options).await?;
        outcome.diagnostic_id = Some(record.diagnostic_id);
        Ok(outcome)
    }

    // ── Patch generation ───────────────────────────────────────

    /// Generate, validate, and optionally apply a patch for an error in
    /// `patching`.
    ///
    /// On return the error is never left in `patching`: it is `detected`
    /// when no usable patch came back, `pending_review` when a human has
    /// to act, or `testing` when the patch was applied.
    ///
    /// Refuses, without touching the status, an error that is not in
    /// `patching` or that already has a pipeline running.
    pub async fn run_surgical_procedure(
        &self,
        error_id: ErrorId,
        options: SurgicalOptions,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let Some(_claim) = self.claim(error_id) else {
            return Err(OrchestratorError::InvalidState(format!(
                "error {} already has a pipeline running",
                error_id
            )));
        };
        let status = self.require_error(error_id)?.status;
        if status != ErrorStatus::Patching {
            return Err(OrchestratorError::InvalidState(format!(
                "error {} is {}, expected patching",
                error_id, status
            )));
        }
        match self.surgical(error_id, options).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(reset) = self.settle(error_id) {
                    error!(error_id, "could not settle status after failure: {}", reset);
                }
                Err(e)
            }
        }
    }

    async fn surgical(
        &self,
        error_id: ErrorId,
        options: SurgicalOptions,
    ) -> Result<PipelineOutcome, OrchestratorError> {
        let error = self.require_error(error_id)?;
        let diagnostic = match self.inner.store.get_diagnostic(error_id)? {
            Some(d) => d,
            None => return self.abandon(error_id, vec!["no diagnostic recorded".to_string()]),
        };

        let files = self.current_files(&diagnostic).await?;
        let diagnostic_id = diagnostic.diagnostic_id;
        let request = PatchRequest {
            error,
            diagnostic,
            files,
        };
        let payload = match self.inner.patch_oracle.generate_patch(&request).await {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error_id, "patch oracle failed: {}", e);
                return self.abandon(error_id, vec![format!("patch generation failed: {}", e)]);
            }
        };
        if let Err(problems) = payload.validate() {
            warn!(error_id, ?problems, "invalid patch rejected");
            return self.abandon(
                error_id,
                problems
                    .into_iter()
                    .map(|p| format!("invalid patch: {}", p))
                    .collect(),
            );
        }

        let sequence = self.inner.store.list_patches(error_id)?.len() + 1;
        let patch = GeneratedPatch::from_payload(payload, error_id, diagnostic_id, sequence);

        let validator = self.inner.safety.clone();
        let candidate = patch.clone();
        let safety = blocking(move || validator.validate(&candidate)).await?;

        let mut outcome = PipelineOutcome::new(error_id, ErrorStatus::Patching);
        outcome.diagnostic_id = Some(diagnostic_id);
        outcome.patch_id = Some(patch.patch_id);
        outcome.warnings = safety.warnings.clone();

        if safety.is_blocked() {
            let findings = safety
                .errors
                .iter()
                .chain(safety.warnings.iter())
                .cloned()
                .collect();
            let mut record = PatchRecord::new(patch, findings);
            record.set_deployment_status(DeploymentStatus::Rejected)?;
            self.inner.store.save_patch(&record)?;
            self.emit_generated(&record);
            warn!(error_id, patch_id = %record.patch_id(), errors = ?safety.errors, "patch blocked by safety checks");
            self.move_to(error_id, ErrorStatus::PendingReview)?;
            outcome.success = false;
            outcome.errors = safety.errors;
            outcome.final_status = ErrorStatus::PendingReview;
            return Ok(outcome);
        }

        let mut record = PatchRecord::new(patch, safety.warnings);
        self.inner.store.save_patch(&record)?;
        self.emit_generated(&record);
        info!(
            error_id,
            patch_id = %record.patch_id(),
            version = %record.patch.version,
            files = record.patch.files.len(),
            "patch generated"
        );

        if !options.auto_apply {
            self.move_to(error_id, ErrorStatus::PendingReview)?;
            outcome.final_status = ErrorStatus::PendingReview;
            outcome
                .warnings
                .push("patch awaits approval before it is applied".to_string());
            return Ok(outcome);
        }

        let report = self
            .apply_record(&mut record, None, options.apply_options())
            .await?;
        outcome.warnings.extend(report.warnings.iter().cloned());
        if report.success {
            self.move_to(error_id, ErrorStatus::Testing)?;
            outcome.final_status = ErrorStatus::Testing;
        } else {
            outcome.success = false;
            outcome.errors = report.errors.clone();
            if !report.applied_files.is_empty() {
                let reason = "automatic apply failed";
                match self.restore_files(&record).await {
                    Ok(warnings) => outcome.warnings.extend(warnings),
                    Err(e) => outcome.errors.push(format!("restore failed: {}", e)),
                }
                record.mark_rolled_back(reason)?;
                self.inner.store.save_patch(&record)?;
                self.emit_rolled_back(&record, reason);
            }
            self.move_to(error_id, ErrorStatus::PendingReview)?;
            outcome.final_status = ErrorStatus::PendingReview;
        }
        Ok(outcome)
    }

    /// Read the current content of every file the diagnosis names.
    async fn current_files(
        &self,
        diagnostic: &DiagnosticRecord,
    ) -> Result<Vec<CurrentFile>, OrchestratorError> {
        let root = self.inner.config.project_root.clone();
        let paths = diagnostic.files_to_modify.clone();
        blocking(move || {
            paths
                .into_iter()
                .filter_map(|path| match resolve_project_path(&root, &path) {
                    Ok(full) => Some(match std::fs::read_to_string(&full) {
                        Ok(content) => CurrentFile {
                            path,
                            content,
                            exists: true,
                        },
                        Err(_) => CurrentFile {
                            path,
                            content: String::new(),
                            exists: false,
                        },
                    }),
                    Err(e) => {
                        warn!("skipping file named by diagnosis: {}", e);
                        None
                    }
                })
                .collect()
        })
        .await
    }

    // ── Apply ──────────────────────────────────────────────────

    /// Apply a reviewed patch. The error must be in `pending_review` and the
    /// patch must not have been applied, rejected, or rolled back.
    pub async fn apply_patch(
        &self,
        patch_id: Uuid,
        approved_by: &str,
        options: ApplyOptions,
    ) -> Result<ApplyReport, OrchestratorError> {
        let mut record = self.require_patch(patch_id)?;
        if record.is_applied() {
            return Err(OrchestratorError::InvalidState(format!(
                "patch {} was already applied",
                patch_id
            )));
        }
        if record.deployment_status() != DeploymentStatus::Pending {
            return Err(OrchestratorError::InvalidState(format!(
                "patch {} is {}",
                patch_id,
                record.deployment_status()
            )));
        }
        let error_id = record.error_id();
        let error = self.require_error(error_id)?;
        if error.status != ErrorStatus::PendingReview {
            return Err(OrchestratorError::InvalidState(format!(
                "error {} is {}, expected pending_review",
                error_id, error.status
            )));
        }

        let report = self
            .apply_record(&mut record, Some(approved_by.to_string()), options)
            .await?;
        if report.success {
            self.move_to(error_id, ErrorStatus::Testing)?;
        } else {
            warn!(error_id, %patch_id, errors = ?report.errors, "approved patch did not apply cleanly");
        }
        Ok(report)
    }

    /// Write a patch to the tree and record where it went.
    async fn apply_record(
        &self,
        record: &mut PatchRecord,
        approved_by: Option<String>,
        options: ApplyOptions,
    ) -> Result<ApplyReport, OrchestratorError> {
        let applicator = self.inner.applicator.clone();
        let patch = record.patch.clone();
        let report = blocking(move || applicator.apply(&patch, options)).await?;

        record.branch_name = report.branch.clone();
        record.backup_path = report.backup.as_ref().map(|b| b.path.clone());
        record.commit_id = report.commit.as_ref().map(|c| c.commit_id.clone());
        if !report.applied_files.is_empty() {
            record.applied_at = Some(Utc::now());
            record.approved_by = approved_by;
        }
        record.updated_at = Utc::now();
        self.inner.store.save_patch(record)?;

        if !report.applied_files.is_empty() {
            self.emit(AecEvent::PatchApplied {
                error_id: record.error_id(),
                patch_id: record.patch_id(),
                files: report.applied_files.clone(),
                branch: report.branch.clone(),
                timestamp: Utc::now(),
            });
        }
        Ok(report)
    }

    // ── Test, gate, deploy ─────────────────────────────────────

    /// Test the applied patch, ask the gate, and deploy if allowed.
    pub async fn run_deployment(&self, error_id: ErrorId) -> Result<DeploymentOutcome, OrchestratorError> {
        let error = self.require_error(error_id)?;
        if error.status != ErrorStatus::Testing {
            return Err(OrchestratorError::InvalidState(format!(
                "error {} is {}, expected testing",
                error_id, error.status
            )));
        }
        let mut record = self.inner.store.latest_patch(error_id)?.ok_or_else(|| {
            OrchestratorError::InvalidState(format!("error {} has no patch", error_id))
        })?;
        if !record.is_applied() {
            return Err(OrchestratorError::InvalidState(format!(
                "patch {} has not been applied",
                record.patch_id()
            )));
        }
        let diagnostic = self
            .inner
            .store
            .get_diagnostic(error_id)?
            .ok_or(OrchestratorError::DiagnosticNotFound(error_id))?;

        record.set_validation_status(ValidationStatus::Testing)?;
        self.inner.store.save_patch(&record)?;
        let test = match self.inner.test_runner.run_tests(&record).await {
            Ok(test) => test,
            Err(e) => TestOutcome {
                passed: false,
                output: e.to_string(),
            },
        };
        info!(error_id, patch_id = %record.patch_id(), passed = test.passed, "tests finished");
        record.test_output = Some(test.output.clone());
        record.set_validation_status(if test.passed {
            ValidationStatus::Passed
        } else {
            ValidationStatus::Failed
        })?;
        self.inner.store.save_patch(&record)?;

        let mut outcome = DeploymentOutcome {
            error_id,
            patch_id: record.patch_id(),
            success: true,
            tests_passed: test.passed,
            decision: None,
            final_status: ErrorStatus::Testing,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        if !test.passed {
            let reason = "tests failed";
            match self.restore_files(&record).await {
                Ok(warnings) => {
                    outcome.warnings.extend(warnings);
                    record.rolled_back_at = Some(Utc::now());
                }
                Err(e) => outcome.errors.push(format!("restore failed: {}", e)),
            }
            record.set_deployment_status(DeploymentStatus::Rejected)?;
            record.rollback_reason = Some(reason.to_string());
            self.inner.store.save_patch(&record)?;
            self.emit_rolled_back(&record, reason);
            self.move_to(error_id, ErrorStatus::PendingReview)?;
            outcome.success = false;
            outcome.errors.push(reason.to_string());
            outcome.final_status = ErrorStatus::PendingReview;
            return Ok(outcome);
        }

        let trace = self.inner.gate.evaluate_with_trace(&GateInput {
            impact: diagnostic.impact,
            affected_features: diagnostic.affected_features.clone(),
            now: Utc::now(),
            validation: Some(ValidationResult {
                tests_passed: true,
                safety_warnings: record.safety_warnings.clone(),
            }),
        });
        info!(error_id, decision = trace.decision.label(), "deployment gate decided");
        self.emit(AecEvent::GateDecided {
            error_id,
            patch_id: record.patch_id(),
            decision: trace.decision.label().to_string(),
            reason: trace.decision.reason(),
            timestamp: Utc::now(),
        });
        outcome.decision = Some(trace.decision.clone());

        match trace.decision {
            GateDecision::ManualReview { reason } => {
                self.move_to(error_id, ErrorStatus::PendingReview)?;
                outcome.final_status = ErrorStatus::PendingReview;
                outcome.warnings.push(reason);
            }
            GateDecision::Deferred { until, reason } => {
                record.scheduled_deploy_at = Some(until);
                record.updated_at = Utc::now();
                self.inner.store.save_patch(&record)?;
                outcome.warnings.push(reason);
            }
            GateDecision::Autonomous => {
                self.deploy_record(&mut record, &mut outcome).await?;
            }
        }
        Ok(outcome)
    }

    async fn deploy_record(
        &self,
        record: &mut PatchRecord,
        outcome: &mut DeploymentOutcome,
    ) -> Result<(), OrchestratorError> {
        let error_id = record.error_id();
        self.move_to(error_id, ErrorStatus::Deploying)?;
        record.scheduled_deploy_at = None;
        record.set_deployment_status(DeploymentStatus::Deploying)?;
        self.inner.store.save_patch(record)?;

        if let Err(e) = self.inner.deployer.deploy(record).await {
            warn!(error_id, "deploy failed: {}", e);
            let reason = format!("deploy failed: {}", e);
            match self.restore_files(record).await {
                Ok(warnings) => outcome.warnings.extend(warnings),
                Err(e) => outcome.errors.push(format!("restore failed: {}", e)),
            }
            record.mark_rolled_back(reason.clone())?;
            self.inner.store.save_patch(record)?;
            self.emit_rolled_back(record, &reason);
            self.move_to(error_id, ErrorStatus::PendingReview)?;
            outcome.success = false;
            outcome.errors.push(reason);
            outcome.final_status = ErrorStatus::PendingReview;
            return Ok(());
        }

        record.set_deployment_status(DeploymentStatus::Deployed)?;
        self.inner.store.save_patch(record)?;
        self.move_to(error_id, ErrorStatus::Deployed)?;
        self.emit(AecEvent::Deployed {
            error_id,
            patch_id: record.patch_id(),
            timestamp: Utc::now(),
        });

        let healthy = match self.inner.deployer.health_check(record).await {
            Ok(healthy) => healthy,
            Err(e) => {
                warn!(error_id, "health check errored: {}", e);
                false
            }
        };
        if healthy {
            self.move_to(error_id, ErrorStatus::Resolved)?;
            outcome.final_status = ErrorStatus::Resolved;
            return Ok(());
        }

        let reason = "health check failed after deploy";
        warn!(error_id, patch_id = %record.patch_id(), "{}; rolling back", reason);
        match self.restore_files(record).await {
            Ok(warnings) => outcome.warnings.extend(warnings),
            Err(e) => outcome.errors.push(format!("restore failed: {}", e)),
        }
        if let Err(e) = self.inner.deployer.rollback(record).await {
            outcome.warnings.push(format!("redeploy after rollback failed: {}", e));
        }
        record.mark_rolled_back(reason)?;
        self.inner.store.save_patch(record)?;
        self.emit_rolled_back(record, reason);
        self.move_to(error_id, ErrorStatus::RolledBack)?;
        outcome.success = false;
        outcome.errors.push(reason.to_string());
        outcome.final_status = ErrorStatus::RolledBack;
        Ok(())
    }

    /// Run deployments whose off-peak slot has arrived.
    pub async fn deploy_due(&self, now: DateTime<Utc>) -> Result<Vec<DeploymentOutcome>, OrchestratorError> {
        let mut outcomes = Vec::new();
        for error in self.inner.store.list_errors_by_status(ErrorStatus::Testing)? {
            let Some(patch) = self.inner.store.latest_patch(error.id)? else {
                continue;
            };
            match patch.scheduled_deploy_at {
                Some(at) if at <= now => {}
                _ => continue,
            }
            match self.run_deployment(error.id).await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => warn!(error_id = error.id, "deferred deployment failed: {}", e),
            }
        }
        Ok(outcomes)
    }

    /// Gate decision for an error's current state, with the rules checked.
    pub fn evaluate_gate(&self, error_id: ErrorId) -> Result<GateTrace, OrchestratorError> {
        let diagnostic = self
            .inner
            .store
            .get_diagnostic(error_id)?
            .ok_or(OrchestratorError::DiagnosticNotFound(error_id))?;
        let validation = self.inner.store.latest_patch(error_id)?.and_then(|patch| {
            match patch.validation_status() {
                ValidationStatus::Passed | ValidationStatus::Failed => Some(ValidationResult {
                    tests_passed: patch.validation_status() == ValidationStatus::Passed,
                    safety_warnings: patch.safety_warnings.clone(),
                }),
                _ => None,
            }
        });
        Ok(self.inner.gate.evaluate_with_trace(&GateInput {
            impact: diagnostic.impact,
            affected_features: diagnostic.affected_features,
            now: Utc::now(),
            validation,
        }))
    }

    // ── Rollback and review ────────────────────────────────────

    /// Restore the files a patch replaced and record the rollback.
    pub async fn rollback_patch(
        &self,
        patch_id: Uuid,
        reason: &str,
    ) -> Result<RollbackReport, OrchestratorError> {
        let mut record = self.require_patch(patch_id)?;
        if !record.is_applied() {
            return Err(OrchestratorError::InvalidState(format!(
                "patch {} was never applied",
                patch_id
            )));
        }
        if matches!(
            record.deployment_status(),
            DeploymentStatus::RolledBack | DeploymentStatus::Rejected
        ) {
            return Err(OrchestratorError::InvalidState(format!(
                "patch {} is already {}",
                patch_id,
                record.deployment_status()
            )));
        }
        let backup = record.backup_path.clone().ok_or_else(|| {
            OrchestratorError::InvalidState(format!("patch {} has no backup", patch_id))
        })?;
        let was_deployed = record.deployment_status() == DeploymentStatus::Deployed;

        let applicator = self.inner.applicator.clone();
        let branch = record.branch_name.clone();
        let mut report = blocking(move || applicator.rollback(&backup, branch.as_deref())).await??;

        record.mark_rolled_back(reason)?;
        self.inner.store.save_patch(&record)?;
        self.emit_rolled_back(&record, reason);
        if was_deployed {
            if let Err(e) = self.inner.deployer.rollback(&record).await {
                report
                    .warnings
                    .push(format!("redeploy after rollback failed: {}", e));
            }
        }

        let error_id = record.error_id();
        match self.require_error(error_id)?.status {
            ErrorStatus::Deployed => {
                self.move_to(error_id, ErrorStatus::RolledBack)?;
            }
            ErrorStatus::Testing => {
                self.move_to(error_id, ErrorStatus::PendingReview)?;
            }
            _ => {}
        }
        info!(error_id, %patch_id, reason, "patch rolled back");
        Ok(report)
    }

    /// Mark an error resolved after human review or a verified deploy.
    pub fn resolve(&self, error_id: ErrorId) -> Result<DetectedError, OrchestratorError> {
        let error = self.require_error(error_id)?;
        if !matches!(error.status, ErrorStatus::PendingReview | ErrorStatus::Deployed) {
            return Err(OrchestratorError::InvalidState(format!(
                "error {} is {}; only pending_review or deployed errors can be resolved",
                error_id, error.status
            )));
        }
        self.move_to(error_id, ErrorStatus::Resolved)
    }

    /// Reset errors stuck in `diagnosing` or `patching` (e.g. after a
    /// crash) back to `detected`. Returns the ids that were reset.
    pub fn reconcile_stale(&self, now: DateTime<Utc>) -> Result<Vec<ErrorId>, OrchestratorError> {
        // chrono durations top out at i64::MAX milliseconds.
        let secs = i64::try_from(self.inner.config.pipeline.stale_after_secs)
            .unwrap_or(i64::MAX)
            .min(i64::MAX / 1_000);
        let threshold = chrono::Duration::seconds(secs);
        let mut reset = Vec::new();
        for error in self.inner.store.list_errors()? {
            if !error.status.is_transient() || now.signed_duration_since(error.updated_at) < threshold {
                continue;
            }
            // A pipeline in this process still owns it.
            let Some(_claim) = self.claim(error.id) else {
                continue;
            };
            if self
                .inner
                .store
                .compare_and_transition(error.id, error.status, ErrorStatus::Detected)?
                .is_some()
            {
                warn!(error_id = error.id, from = %error.status, "reset stale pipeline to detected");
                self.emit(AecEvent::status_changed(
                    error.id,
                    error.status,
                    ErrorStatus::Detected,
                ));
                reset.push(error.id);
            }
        }
        Ok(reset)
    }

    // ── Helpers ────────────────────────────────────────────────

    fn claim(&self, error_id: ErrorId) -> Option<PipelineClaim> {
        let fresh = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(error_id);
        fresh.then(|| PipelineClaim {
            inner: self.inner.clone(),
            error_id,
        })
    }

    fn require_error(&self, error_id: ErrorId) -> Result<DetectedError, OrchestratorError> {
        self.inner
            .store
            .get_error(error_id)?
            .ok_or(OrchestratorError::ErrorNotFound(error_id))
    }

    fn require_patch(&self, patch_id: Uuid) -> Result<PatchRecord, OrchestratorError> {
        self.inner
            .store
            .get_patch(patch_id)?
            .ok_or(OrchestratorError::PatchNotFound(patch_id))
    }

    fn move_to(&self, error_id: ErrorId, next: ErrorStatus) -> Result<DetectedError, OrchestratorError> {
        let from = self.require_error(error_id)?.status;
        let updated = self.inner.store.transition(error_id, next)?;
        info!(error_id, %from, to = %next, "status changed");
        self.emit(AecEvent::status_changed(error_id, from, next));
        Ok(updated)
    }

    /// Move a transient error back to `detected`. Returns the final status.
    fn settle(&self, error_id: ErrorId) -> Result<ErrorStatus, OrchestratorError> {
        let status = self.require_error(error_id)?.status;
        if status.is_transient() {
            self.move_to(error_id, ErrorStatus::Detected)?;
            return Ok(ErrorStatus::Detected);
        }
        Ok(status)
    }

    fn settle_outcome(&self, mut outcome: PipelineOutcome) -> PipelineOutcome {
        match self.settle(outcome.error_id) {
            Ok(status) => {
                if status == ErrorStatus::Detected && outcome.final_status != ErrorStatus::Detected {
                    outcome.success = false;
                }
                outcome.final_status = status;
            }
            Err(e) => {
                error!(error_id = outcome.error_id, "could not settle status: {}", e);
                outcome.success = false;
                outcome.errors.push(format!("could not settle status: {}", e));
            }
        }
        outcome
    }

    /// Give up on the current attempt and return the error to `detected`.
    fn abandon(&self, error_id: ErrorId, errors: Vec<String>) -> Result<PipelineOutcome, OrchestratorError> {
        let status = self.settle(error_id)?;
        Ok(PipelineOutcome::failed(error_id, status, errors))
    }

    /// Restore a patch's backup. Returns warnings; a patch without a backup
    /// is left in place with a warning.
    async fn restore_files(&self, record: &PatchRecord) -> Result<Vec<String>, OrchestratorError> {
        let Some(backup) = record.backup_path.clone() else {
            warn!(patch_id = %record.patch_id(), "no backup; patched files left in place");
            return Ok(vec!["no backup; patched files left in place".to_string()]);
        };
        let applicator = self.inner.applicator.clone();
        let branch = record.branch_name.clone();
        let report = blocking(move || applicator.rollback(&backup, branch.as_deref())).await??;
        let mut warnings = report.warnings;
        warnings.extend(report.restore.errors);
        Ok(warnings)
    }

    fn emit(&self, event: AecEvent) {
        self.inner.events.dispatch(&event);
    }

    fn emit_generated(&self, record: &PatchRecord) {
        self.emit(AecEvent::PatchGenerated {
            error_id: record.error_id(),
            patch_id: record.patch_id(),
            version: record.patch.version.clone(),
            warnings: record.safety_warnings.len(),
            timestamp: Utc::now(),
        });
    }

    fn emit_rolled_back(&self, record: &PatchRecord, reason: &str) {
        self.emit(AecEvent::RolledBack {
            error_id: record.error_id(),
            patch_id: record.patch_id(),
            reason: reason.to_string(),
            timestamp: Utc::now(),
        });
    }
}

/// Run filesystem or VCS work off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, OrchestratorError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OrchestratorError::Task(e.to_string()))
}
