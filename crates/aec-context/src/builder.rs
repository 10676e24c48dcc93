// builder.rs — Evidence gathering and budget enforcement.
//
// The builder never fails: a missing or unreadable file, a VCS error, or a
// bad schema path is logged and the package is built without it.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use aec_lifecycle::DetectedError;
use aec_submit::VcsAdapter;
use regex::Regex;

use crate::config::ContextConfig;
use crate::package::{CodebaseContext, DiagnosticContext, RelevantFile, RuntimeContext, SystemInfo};

const TRACE_RELEVANCE: f32 = 1.0;
const SIBLING_RELEVANCE: f32 = 0.5;

/// Substrings that disqualify an environment variable even when allow-listed.
const SECRET_MARKERS: &[&str] = &["SECRET", "TOKEN", "KEY", "PASSWORD", "CREDENTIAL"];

pub struct ContextBuilder {
    project_root: PathBuf,
    config: ContextConfig,
    vcs: Arc<dyn VcsAdapter>,
    /// Overrides the process environment.
    env: Option<Vec<(String, String)>>,
}

impl ContextBuilder {
    pub fn new(project_root: impl Into<PathBuf>, config: ContextConfig, vcs: Arc<dyn VcsAdapter>) -> Self {
        Self {
            project_root: project_root.into(),
            config,
            vcs,
            env: None,
        }
    }

    /// Use the given variables instead of the process environment.
    pub fn with_env(mut self, vars: Vec<(String, String)>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn build(&self, error: &DetectedError) -> DiagnosticContext {
        let trace = error.stack_trace.as_deref().unwrap_or_default();
        let trace_paths = extract_trace_paths(&self.project_root, trace);

        let mut seen: HashSet<String> = HashSet::new();
        let mut relevant_files = Vec::new();
        for path in &trace_paths {
            if let Some(file) = self.read_relevant(path, TRACE_RELEVANCE) {
                seen.insert(path.clone());
                relevant_files.push(file);
            }
        }
        let siblings = self.collect_siblings(&trace_paths, &mut seen);
        relevant_files.extend(siblings);

        let recent_commits = match self.vcs.recent_commits(self.config.recent_commits) {
            Ok(commits) => commits,
            Err(e) => {
                tracing::warn!(error_id = error.id, "could not read recent commits: {}", e);
                Vec::new()
            }
        };

        let mut context = DiagnosticContext {
            error: error.clone(),
            codebase: CodebaseContext {
                relevant_files,
                recent_commits,
                dependencies: self.read_manifests(),
                schema_excerpt: self.read_schema_excerpt(),
            },
            runtime: RuntimeContext {
                logs: error.runtime_logs.clone(),
                env: self.filtered_env(),
                system_info: SystemInfo::current(),
            },
        };

        let dropped = enforce_budget(&mut context, self.config.token_ceiling);
        tracing::info!(
            error_id = error.id,
            files = context.codebase.relevant_files.len(),
            dropped = dropped.len(),
            tokens = estimate_tokens(&context),
            "built diagnostic context"
        );
        context
    }

    fn read_relevant(&self, path: &str, relevance: f32) -> Option<RelevantFile> {
        match fs::read_to_string(self.project_root.join(path)) {
            Ok(content) => Some(RelevantFile {
                path: path.to_string(),
                content,
                relevance,
            }),
            Err(e) => {
                tracing::warn!(path = %path, "skipping unreadable file: {}", e);
                None
            }
        }
    }

    fn collect_siblings(&self, trace_paths: &[String], seen: &mut HashSet<String>) -> Vec<RelevantFile> {
        let mut dirs: Vec<PathBuf> = Vec::new();
        for path in trace_paths {
            let dir = Path::new(path).parent().map(Path::to_path_buf).unwrap_or_default();
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }

        let mut siblings = Vec::new();
        for dir in dirs {
            let entries = match fs::read_dir(self.project_root.join(&dir)) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(dir = %dir.display(), "cannot list directory: {}", e);
                    continue;
                }
            };
            let mut names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().to_string())
                .filter(|name| self.is_source_file(name))
                .collect();
            names.sort();

            let mut taken = 0;
            for name in names {
                if taken >= self.config.sibling_cap {
                    break;
                }
                let rel = dir.join(&name).to_string_lossy().to_string();
                if seen.contains(&rel) {
                    continue;
                }
                if let Some(file) = self.read_relevant(&rel, SIBLING_RELEVANCE) {
                    seen.insert(rel);
                    siblings.push(file);
                    taken += 1;
                }
            }
        }
        siblings
    }

    fn is_source_file(&self, name: &str) -> bool {
        Path::new(name)
            .extension()
            .map(|ext| {
                let ext = ext.to_string_lossy();
                self.config.source_extensions.iter().any(|e| *e == ext)
            })
            .unwrap_or(false)
    }

    fn read_manifests(&self) -> BTreeMap<String, String> {
        self.config
            .manifests
            .iter()
            .filter_map(|name| {
                let path = self.project_root.join(name);
                if !path.is_file() {
                    return None;
                }
                match fs::read_to_string(&path) {
                    Ok(content) => Some((name.clone(), content)),
                    Err(e) => {
                        tracing::warn!(path = %name, "skipping unreadable manifest: {}", e);
                        None
                    }
                }
            })
            .collect()
    }

    fn read_schema_excerpt(&self) -> Option<String> {
        let rel = self.config.schema_path.as_ref()?;
        match fs::read_to_string(self.project_root.join(rel)) {
            Ok(content) => Some(truncate(&content, self.config.schema_excerpt_bytes).to_string()),
            Err(e) => {
                tracing::warn!(path = %rel, "schema excerpt unavailable: {}", e);
                None
            }
        }
    }

    fn filtered_env(&self) -> BTreeMap<String, String> {
        let vars: Vec<(String, String)> = match &self.env {
            Some(vars) => vars.clone(),
            None => std::env::vars().collect(),
        };
        vars.into_iter()
            .filter(|(key, _)| self.config.env_allow_list.iter().any(|allowed| allowed == key))
            .filter(|(key, _)| {
                let upper = key.to_uppercase();
                !SECRET_MARKERS.iter().any(|marker| upper.contains(marker))
            })
            .collect()
    }
}

/// Project-relative paths mentioned in a stack trace, in order of first
/// appearance. Only absolute paths under the project root count, and
/// vendored dependencies are ignored.
pub fn extract_trace_paths(project_root: &Path, trace: &str) -> Vec<String> {
    let mut roots = vec![project_root.to_string_lossy().trim_end_matches('/').to_string()];
    if let Ok(canonical) = project_root.canonicalize() {
        let canonical = canonical.to_string_lossy().trim_end_matches('/').to_string();
        if !roots.contains(&canonical) {
            roots.push(canonical);
        }
    }
    let alternatives: Vec<String> = roots.iter().map(|r| regex::escape(r)).collect();
    let pattern = format!(r#"(?:{})/([^\s:()'"<>,\[\]]+)"#, alternatives.join("|"));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("cannot build stack-trace pattern: {}", e);
            return Vec::new();
        }
    };

    let mut paths: Vec<String> = Vec::new();
    for capture in re.captures_iter(trace) {
        let path = capture[1].to_string();
        if path.split('/').any(|part| part == ".." || part == "node_modules") {
            continue;
        }
        if !paths.contains(&path) {
            paths.push(path);
        }
    }
    paths
}

/// Coarse token cost: serialized length divided by four, rounded up.
pub fn estimate_tokens(context: &DiagnosticContext) -> usize {
    let len = serde_json::to_string(context).map(|s| s.len()).unwrap_or(0);
    len.div_ceil(4)
}

/// Drop the lowest-relevance file until the package fits the ceiling or a
/// single file remains. Among equally relevant files the last one goes
/// first. Returns the dropped paths.
pub fn enforce_budget(context: &mut DiagnosticContext, ceiling: usize) -> Vec<String> {
    let mut dropped = Vec::new();
    while estimate_tokens(context) > ceiling && context.codebase.relevant_files.len() > 1 {
        let files = &context.codebase.relevant_files;
        let mut victim = 0;
        for (i, file) in files.iter().enumerate() {
            if file.relevance <= files[victim].relevance {
                victim = i;
            }
        }
        let removed = context.codebase.relevant_files.remove(victim);
        tracing::debug!(path = %removed.path, relevance = removed.relevance, "dropped file over budget");
        dropped.push(removed.path);
    }
    dropped
}

fn truncate(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use aec_lifecycle::Severity;
    use aec_submit::{CommitSummary, InMemoryVcs};
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn error_with_trace(root: &Path, frames: &[&str]) -> DetectedError {
        let trace = frames
            .iter()
            .map(|f| format!("    at handler ({}/{}:12:7)", root.display(), f))
            .collect::<Vec<_>>()
            .join("\n");
        DetectedError::new(7, "TypeError", Severity::High, "Cannot read properties of undefined")
            .with_stack_trace(format!("TypeError: boom\n{}", trace))
    }

    fn builder(root: &Path) -> ContextBuilder {
        ContextBuilder::new(root, ContextConfig::default(), Arc::new(InMemoryVcs::new()))
            .with_env(Vec::new())
    }

    #[test]
    fn extracts_project_paths_in_order_without_duplicates() {
        let root = Path::new("/srv/app");
        let trace = "Error: x\n at f (/srv/app/server/routes.ts:45:12)\n at g (/srv/app/server/db.ts:3:1)\n at f (/srv/app/server/routes.ts:50:2)\n at h (/usr/lib/node/internal.js:1:1)\n at i (/srv/app/node_modules/express/index.js:9:9)";
        assert_eq!(
            extract_trace_paths(root, trace),
            vec!["server/routes.ts", "server/db.ts"]
        );
    }

    #[test]
    fn trace_files_and_siblings_are_tagged() {
        let dir = tempdir().unwrap();
        write(dir.path(), "server/routes.ts", "routes");
        write(dir.path(), "server/auth.ts", "auth");
        write(dir.path(), "server/notes.md", "not source");

        let context = builder(dir.path()).build(&error_with_trace(dir.path(), &["server/routes.ts"]));
        let files = &context.codebase.relevant_files;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "server/routes.ts");
        assert_eq!(files[0].relevance, 1.0);
        assert_eq!(files[1].path, "server/auth.ts");
        assert_eq!(files[1].relevance, 0.5);
    }

    #[test]
    fn missing_trace_file_is_skipped() {
        let dir = tempdir().unwrap();
        write(dir.path(), "server/present.ts", "here");
        let context = builder(dir.path())
            .build(&error_with_trace(dir.path(), &["server/gone.ts", "server/present.ts"]));
        let paths: Vec<&str> = context
            .codebase
            .relevant_files
            .iter()
            .map(|f| f.path.as_str())
            .collect();
        assert_eq!(paths, vec!["server/present.ts"]);
    }

    #[test]
    fn siblings_are_capped() {
        let dir = tempdir().unwrap();
        write(dir.path(), "lib/main.ts", "main");
        for i in 0..15 {
            write(dir.path(), &format!("lib/s{:02}.ts", i), "sibling");
        }
        let context = builder(dir.path()).build(&error_with_trace(dir.path(), &["lib/main.ts"]));
        let siblings = context
            .codebase
            .relevant_files
            .iter()
            .filter(|f| f.relevance == 0.5)
            .count();
        assert_eq!(siblings, 10);
    }

    #[test]
    fn env_is_allow_listed_and_secret_free() {
        let dir = tempdir().unwrap();
        let mut config = ContextConfig::default();
        config.env_allow_list.push("API_TOKEN".to_string());
        let builder = ContextBuilder::new(dir.path(), config, Arc::new(InMemoryVcs::new())).with_env(vec![
            ("NODE_ENV".to_string(), "production".to_string()),
            ("DATABASE_URL".to_string(), "postgres://u:p@h/db".to_string()),
            ("API_TOKEN".to_string(), "abc".to_string()),
        ]);
        let context = builder.build(&DetectedError::new(1, "E", Severity::Low, "m"));
        assert_eq!(context.runtime.env.len(), 1);
        assert_eq!(context.runtime.env["NODE_ENV"], "production");
    }

    #[test]
    fn commits_manifests_schema_and_logs_are_included() {
        let dir = tempdir().unwrap();
        write(dir.path(), "package.json", "{\"name\":\"app\"}");
        write(dir.path(), "shared/schema.ts", &"x".repeat(100));
        let mut config = ContextConfig::default();
        config.schema_path = Some("shared/schema.ts".to_string());
        config.schema_excerpt_bytes = 10;
        let vcs = InMemoryVcs::new().with_commits(vec![CommitSummary {
            hash: "abc".to_string(),
            author: "dev".to_string(),
            date: "2026-01-01T00:00:00Z".to_string(),
            message: "tweak".to_string(),
            files: vec!["server/routes.ts".to_string()],
        }]);
        let mut error = DetectedError::new(1, "E", Severity::Low, "m");
        error.runtime_logs = vec!["GET /api 500".to_string()];

        let context = ContextBuilder::new(dir.path(), config, Arc::new(vcs))
            .with_env(Vec::new())
            .build(&error);

        assert_eq!(context.codebase.recent_commits.len(), 1);
        assert!(context.codebase.dependencies.contains_key("package.json"));
        assert_eq!(context.codebase.schema_excerpt.as_deref(), Some("xxxxxxxxxx"));
        assert_eq!(context.runtime.logs, vec!["GET /api 500"]);
    }

    #[test]
    fn vcs_failure_does_not_fail_build() {
        let dir = tempdir().unwrap();
        let builder = ContextBuilder::new(
            dir.path(),
            ContextConfig::default(),
            Arc::new(InMemoryVcs::new().fail_on("recent_commits")),
        );
        let context = builder.build(&DetectedError::new(1, "E", Severity::Low, "m"));
        assert!(context.codebase.recent_commits.is_empty());
    }

    fn context_with(relevances: &[f32], size: usize) -> DiagnosticContext {
        DiagnosticContext {
            error: DetectedError::new(1, "E", Severity::Low, "m"),
            codebase: CodebaseContext {
                relevant_files: relevances
                    .iter()
                    .enumerate()
                    .map(|(i, r)| RelevantFile {
                        path: format!("f{}.ts", i),
                        content: "y".repeat(size),
                        relevance: *r,
                    })
                    .collect(),
                ..CodebaseContext::default()
            },
            runtime: RuntimeContext::default(),
        }
    }

    #[test]
    fn budget_drops_lowest_relevance_first() {
        let mut context = context_with(&[1.0, 0.5, 0.5, 0.5, 0.5], 4000);
        let ceiling = 2500;
        assert!(estimate_tokens(&context) > ceiling);

        let dropped = enforce_budget(&mut context, ceiling);

        assert!(estimate_tokens(&context) <= ceiling);
        assert_eq!(dropped.len(), 3);
        assert_eq!(context.codebase.relevant_files[0].path, "f0.ts");
        assert_eq!(context.codebase.relevant_files[0].relevance, 1.0);
    }

    #[test]
    fn budget_keeps_last_file_even_when_over() {
        let mut context = context_with(&[0.5, 1.0, 0.5], 4000);
        enforce_budget(&mut context, 10);
        assert_eq!(context.codebase.relevant_files.len(), 1);
        assert_eq!(context.codebase.relevant_files[0].relevance, 1.0);
    }

    #[test]
    fn under_budget_is_untouched() {
        let mut context = context_with(&[1.0, 0.5], 10);
        assert!(enforce_budget(&mut context, 900_000).is_empty());
        assert_eq!(context.codebase.relevant_files.len(), 2);
    }

    #[test]
    fn token_estimate_rounds_up() {
        let context = context_with(&[], 0);
        let len = serde_json::to_string(&context).unwrap().len();
        assert_eq!(estimate_tokens(&context), (len + 3) / 4);
    }
}
