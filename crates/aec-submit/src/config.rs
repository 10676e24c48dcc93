//! VCS configuration

use serde::{Deserialize, Serialize};

/// Branch naming and status filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VcsConfig {
    /// Branch naming prefix (e.g., "aec/", "fix/")
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,

    /// Branch patches are cut from and returned to
    #[serde(default = "default_base_branch")]
    pub base_branch: String,

    /// Paths owned by the tool itself; never count as uncommitted work
    #[serde(default = "default_ignored_paths")]
    pub ignored_paths: Vec<String>,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            base_branch: default_base_branch(),
            ignored_paths: default_ignored_paths(),
        }
    }
}

impl VcsConfig {
    /// Deterministic branch name for a patch version (`42.1` → `aec/patch-42-1`)
    pub fn branch_for(&self, patch_version: &str) -> String {
        let sanitized: String = patch_version
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        format!("{}patch-{}", self.branch_prefix, sanitized)
    }
}

// Serde default functions
fn default_branch_prefix() -> String {
    "aec/".to_string()
}

fn default_base_branch() -> String {
    "main".to_string()
}

fn default_ignored_paths() -> Vec<String> {
    vec![".aec-backups".to_string(), ".aec".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_is_deterministic() {
        let config = VcsConfig::default();
        assert_eq!(config.branch_for("42.1"), "aec/patch-42-1");
        assert_eq!(config.branch_for("42.1"), config.branch_for("42.1"));
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config: VcsConfig = serde_json::from_str(r#"{"branch_prefix": "fix/"}"#).unwrap();
        assert_eq!(config.branch_prefix, "fix/");
        assert_eq!(config.base_branch, "main");
        assert!(config.ignored_paths.contains(&".aec-backups".to_string()));
    }
}
