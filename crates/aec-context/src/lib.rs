//! # aec-context
//!
//! Assembles the evidence package sent to a diagnostic oracle: source files
//! named in the stack trace and their siblings, recent history, dependency
//! manifests, a schema excerpt, an allow-listed environment snapshot, and
//! runtime logs. The package is kept under a token ceiling by evicting the
//! least relevant files first.

pub mod builder;
pub mod config;
pub mod package;

pub use builder::{enforce_budget, estimate_tokens, extract_trace_paths, ContextBuilder};
pub use config::ContextConfig;
pub use package::{CodebaseContext, DiagnosticContext, RelevantFile, RuntimeContext, SystemInfo};
