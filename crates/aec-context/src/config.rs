//! Context builder configuration

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Estimated-token ceiling for the whole package
    #[serde(default = "default_token_ceiling")]
    pub token_ceiling: usize,

    /// Sibling files collected per stack-trace directory
    #[serde(default = "default_sibling_cap")]
    pub sibling_cap: usize,

    #[serde(default = "default_recent_commits")]
    pub recent_commits: usize,

    /// Dependency manifests included verbatim when present
    #[serde(default = "default_manifests")]
    pub manifests: Vec<String>,

    /// Project-relative schema file; the excerpt is its head
    #[serde(default)]
    pub schema_path: Option<String>,

    #[serde(default = "default_schema_excerpt_bytes")]
    pub schema_excerpt_bytes: usize,

    /// Environment variables that may be shared. Anything else is dropped.
    #[serde(default = "default_env_allow_list")]
    pub env_allow_list: Vec<String>,

    /// Extensions counted as source files when collecting siblings
    #[serde(default = "default_source_extensions")]
    pub source_extensions: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_ceiling: default_token_ceiling(),
            sibling_cap: default_sibling_cap(),
            recent_commits: default_recent_commits(),
            manifests: default_manifests(),
            schema_path: None,
            schema_excerpt_bytes: default_schema_excerpt_bytes(),
            env_allow_list: default_env_allow_list(),
            source_extensions: default_source_extensions(),
        }
    }
}

fn default_token_ceiling() -> usize {
    900_000
}

fn default_sibling_cap() -> usize {
    10
}

fn default_recent_commits() -> usize {
    10
}

fn default_manifests() -> Vec<String> {
    ["package.json", "Cargo.toml", "requirements.txt", "pyproject.toml", "go.mod"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_schema_excerpt_bytes() -> usize {
    8 * 1024
}

fn default_env_allow_list() -> Vec<String> {
    ["NODE_ENV", "RUST_LOG", "TZ", "LANG", "PORT", "APP_ENV"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_source_extensions() -> Vec<String> {
    [
        "ts", "tsx", "js", "jsx", "mjs", "rs", "py", "go", "java", "rb", "sql",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ContextConfig =
            serde_json::from_str(r#"{"token_ceiling": 1000, "schema_path": "shared/schema.ts"}"#)
                .unwrap();
        assert_eq!(config.token_ceiling, 1000);
        assert_eq!(config.sibling_cap, 10);
        assert_eq!(config.schema_path.as_deref(), Some("shared/schema.ts"));
        assert!(config.env_allow_list.contains(&"NODE_ENV".to_string()));
    }
}
