// config.rs — Project configuration.
//
// `AecConfig::for_project()` derives the on-disk layout under `.aec/` in the
// project root. Tunables come from `.aec/config.toml`; every table and
// field is optional and falls back to its default.

use std::path::{Path, PathBuf};

use aec_context::ContextConfig;
use aec_policy::GateConfig;
use aec_submit::VcsConfig;
use aec_workspace::SafetyConfig;
use serde::{Deserialize, Serialize};

use crate::error::OrchestratorError;

/// How the pipeline behaves once a patch has been generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Apply generated patches without a separate approval call.
    #[serde(default)]
    pub auto_apply: bool,

    #[serde(default = "default_true")]
    pub create_branch: bool,

    #[serde(default = "default_true")]
    pub create_backup: bool,

    /// Diagnoses with a shorter explanation are rejected as malformed.
    #[serde(default = "default_min_explanation_len")]
    pub min_explanation_len: usize,

    /// Errors left in `diagnosing`/`patching` longer than this are reset
    /// to `detected` by the reconciler.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            auto_apply: false,
            create_branch: true,
            create_backup: true,
            min_explanation_len: default_min_explanation_len(),
            stale_after_secs: default_stale_after_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Base URL serving `/diagnose` and `/patch`.
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_oracle_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_oracle_timeout_secs(),
        }
    }
}

/// Shell commands for the test/deploy cycle, run from the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    #[serde(default)]
    pub test_command: Option<String>,

    #[serde(default)]
    pub deploy_command: Option<String>,

    /// Exit status 0 means healthy.
    #[serde(default)]
    pub health_check_command: Option<String>,

    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            test_command: None,
            deploy_command: None,
            health_check_command: None,
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

/// Complete configuration for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AecConfig {
    /// Root of the source tree patches are applied to.
    #[serde(skip)]
    pub project_root: PathBuf,

    /// Record store directory (errors, diagnostics, patches).
    #[serde(skip)]
    pub state_dir: PathBuf,

    /// JSONL lifecycle event log.
    #[serde(skip)]
    pub events_log: PathBuf,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub safety: SafetyConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub vcs: VcsConfig,

    #[serde(default)]
    pub oracle: OracleConfig,

    #[serde(default)]
    pub deploy: DeployConfig,
}

impl AecConfig {
    /// Default configuration with the standard `.aec/` layout.
    pub fn for_project(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref().to_path_buf();
        let aec_dir = root.join(".aec");
        Self {
            project_root: root,
            state_dir: aec_dir.join("state"),
            events_log: aec_dir.join("events.jsonl"),
            context: ContextConfig::default(),
            safety: SafetyConfig::default(),
            gate: GateConfig::default(),
            pipeline: PipelineConfig::default(),
            vcs: VcsConfig::default(),
            oracle: OracleConfig::default(),
            deploy: DeployConfig::default(),
        }
    }

    /// Path of the config file for a project.
    pub fn config_path(project_root: &Path) -> PathBuf {
        project_root.join(".aec").join("config.toml")
    }

    /// Load `.aec/config.toml`. A missing file yields the defaults; a file
    /// that exists but does not parse is an error.
    pub fn load(project_root: impl AsRef<Path>) -> Result<Self, OrchestratorError> {
        let root = project_root.as_ref();
        let path = Self::config_path(root);
        let defaults = Self::for_project(root);
        if !path.exists() {
            return Ok(defaults);
        }
        let content = std::fs::read_to_string(&path).map_err(|e| OrchestratorError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let parsed: AecConfig = toml::from_str(&content).map_err(|e| OrchestratorError::Config {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        parsed.gate.validate().map_err(|message| OrchestratorError::Config {
            path: path.display().to_string(),
            message: format!("[gate] {}", message),
        })?;
        Ok(Self {
            project_root: defaults.project_root,
            state_dir: defaults.state_dir,
            events_log: defaults.events_log,
            ..parsed
        })
    }

    /// Like `load`, but falls back to defaults on a malformed file.
    pub fn load_or_default(project_root: impl AsRef<Path>) -> Self {
        let root = project_root.as_ref();
        match Self::load(root) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("{}; using defaults", e);
                Self::for_project(root)
            }
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_explanation_len() -> usize {
    20
}

fn default_stale_after_secs() -> u64 {
    900
}

fn default_oracle_timeout_secs() -> u64 {
    120
}

fn default_command_timeout_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn for_project_layout() {
        let config = AecConfig::for_project("/srv/app");
        assert_eq!(config.state_dir, PathBuf::from("/srv/app/.aec/state"));
        assert_eq!(config.events_log, PathBuf::from("/srv/app/.aec/events.jsonl"));
        assert!(!config.pipeline.auto_apply);
        assert_eq!(config.context.token_ceiling, 900_000);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = AecConfig::load(dir.path()).unwrap();
        assert_eq!(config.project_root, dir.path());
        assert_eq!(config.pipeline.stale_after_secs, 900);
    }

    #[test]
    fn partial_file_overrides_only_what_it_names() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".aec")).unwrap();
        std::fs::write(
            AecConfig::config_path(dir.path()),
            r#"
[pipeline]
auto_apply = true

[gate]
peak_start_hour = 9
sensitive_keywords = ["dosage"]

[deploy]
test_command = "npm test"
"#,
        )
        .unwrap();

        let config = AecConfig::load(dir.path()).unwrap();
        assert!(config.pipeline.auto_apply);
        assert!(config.pipeline.create_backup);
        assert_eq!(config.gate.peak_start_hour, 9);
        assert_eq!(config.gate.peak_end_hour, 20);
        assert_eq!(config.gate.sensitive_keywords, vec!["dosage"]);
        assert_eq!(config.deploy.test_command.as_deref(), Some("npm test"));
        assert_eq!(config.vcs.branch_prefix, "aec/");
        assert_eq!(config.state_dir, dir.path().join(".aec/state"));
    }

    #[test]
    fn out_of_range_peak_hour_is_a_config_error() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".aec")).unwrap();
        std::fs::write(AecConfig::config_path(dir.path()), "[gate]\npeak_end_hour = 24\n").unwrap();

        match AecConfig::load(dir.path()) {
            Err(OrchestratorError::Config { message, .. }) => {
                assert!(message.contains("peak_end_hour"), "{}", message)
            }
            other => panic!("expected a config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn malformed_file_is_an_error_but_load_or_default_recovers() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".aec")).unwrap();
        std::fs::write(AecConfig::config_path(dir.path()), "[pipeline\nauto_apply = ").unwrap();

        assert!(matches!(
            AecConfig::load(dir.path()),
            Err(OrchestratorError::Config { .. })
        ));
        assert!(!AecConfig::load_or_default(dir.path()).pipeline.auto_apply);
    }
}
