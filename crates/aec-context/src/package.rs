//! The evidence package handed to the diagnostic oracle.
//!
//! Serialized field names are the oracle request contract.

use std::collections::BTreeMap;

use aec_lifecycle::DetectedError;
use aec_submit::CommitSummary;
use serde::{Deserialize, Serialize};

/// A source file and how strongly it relates to the fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantFile {
    pub path: String,
    pub content: String,
    /// 1.0 for files named in the stack trace, 0.5 for their siblings.
    pub relevance: f32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebaseContext {
    pub relevant_files: Vec<RelevantFile>,
    pub recent_commits: Vec<CommitSummary>,
    /// Manifest path to its contents.
    pub dependencies: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_excerpt: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub family: String,
}

impl SystemInfo {
    pub fn current() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            family: std::env::consts::FAMILY.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeContext {
    pub logs: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub system_info: SystemInfo,
}

/// Request body for a diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticContext {
    pub error: DetectedError,
    pub codebase: CodebaseContext,
    pub runtime: RuntimeContext,
}
