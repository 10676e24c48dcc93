//! Git adapter: shells out to the `git` binary in the project directory

use std::path::PathBuf;
use std::process::Command;

use crate::adapter::{CommitResult, CommitSummary, Result, VcsAdapter, VcsError, WorkingTreeStatus};
use crate::config::VcsConfig;

/// Field and record separators for `git log` parsing.
const FIELD_SEP: char = '\u{1f}';
const RECORD_SEP: char = '\u{1e}';

/// Git adapter for branch-per-patch workflows
pub struct GitAdapter {
    /// Working directory for git operations
    work_dir: PathBuf,

    /// Path prefixes excluded from working-tree status
    ignored_paths: Vec<String>,
}

impl GitAdapter {
    /// Create a new GitAdapter for the given working directory
    pub fn new(work_dir: impl Into<PathBuf>, config: &VcsConfig) -> Self {
        Self {
            work_dir: work_dir.into(),
            ignored_paths: config.ignored_paths.clone(),
        }
    }

    /// Run a git command in the working directory
    fn git_cmd(&self, args: &[&str]) -> Result<String> {
        Ok(self.git_raw(args)?.trim().to_string())
    }

    /// Like `git_cmd` but keeps leading whitespace, which is significant in
    /// porcelain output.
    fn git_raw(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.work_dir)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(VcsError::CommandFailed(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignored_paths
            .iter()
            .any(|prefix| path == prefix || path.starts_with(&format!("{}/", prefix)))
    }
}

impl VcsAdapter for GitAdapter {
    fn current_branch(&self) -> Result<String> {
        self.git_cmd(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        let branches = self.git_cmd(&["branch", "--list", name])?;
        Ok(!branches.is_empty())
    }

    fn checkout_new(&self, name: &str) -> Result<()> {
        tracing::info!("GitAdapter: creating branch {}", name);
        if self.branch_exists(name)? {
            return Err(VcsError::InvalidState(format!(
                "branch {} already exists",
                name
            )));
        }
        self.git_cmd(&["checkout", "-b", name])?;
        Ok(())
    }

    fn checkout(&self, name: &str) -> Result<()> {
        if !self.branch_exists(name)? {
            return Err(VcsError::BranchNotFound(name.to_string()));
        }
        self.git_cmd(&["checkout", name])?;
        Ok(())
    }

    fn add(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.git_cmd(&args)?;
        Ok(())
    }

    fn commit(&self, message: &str, paths: &[String]) -> Result<CommitResult> {
        tracing::info!("GitAdapter: committing {} path(s)", paths.len());
        if paths.is_empty() {
            return Err(VcsError::InvalidState("No changes to commit".to_string()));
        }

        let mut diff = vec!["diff", "--cached", "--name-only", "--"];
        diff.extend(paths.iter().map(String::as_str));
        if self.git_cmd(&diff)?.is_empty() {
            return Err(VcsError::InvalidState("No changes to commit".to_string()));
        }

        let mut commit = vec!["commit", "--only", "-m", message, "--"];
        commit.extend(paths.iter().map(String::as_str));
        self.git_cmd(&commit)?;
        let commit_id = self.git_cmd(&["rev-parse", "HEAD"])?;
        let short = commit_id.chars().take(8).collect::<String>();

        Ok(CommitResult {
            commit_id: commit_id.clone(),
            message: format!("Committed as {}", short),
            metadata: [("full_hash".to_string(), commit_id)].into_iter().collect(),
        })
    }

    fn status(&self) -> Result<WorkingTreeStatus> {
        let porcelain = self.git_raw(&["status", "--porcelain"])?;
        let changed_paths = porcelain
            .lines()
            .filter(|line| line.len() > 3)
            .map(|line| {
                let path = &line[3..];
                // Renames are reported as "old -> new".
                path.rsplit(" -> ").next().unwrap_or(path).trim_matches('"').to_string()
            })
            .filter(|path| !self.is_ignored(path))
            .collect();
        Ok(WorkingTreeStatus { changed_paths })
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<()> {
        let flag = if force { "-D" } else { "-d" };
        self.git_cmd(&["branch", flag, name])?;
        Ok(())
    }

    fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        let count = limit.to_string();
        let format = format!(
            "--pretty=format:{}%H{}%an{}%aI{}%s",
            RECORD_SEP, FIELD_SEP, FIELD_SEP, FIELD_SEP
        );
        let log = self.git_cmd(&["log", "-n", &count, "--name-only", &format])?;
        Ok(parse_log(&log))
    }

    fn name(&self) -> &str {
        "git"
    }
}

fn parse_log(log: &str) -> Vec<CommitSummary> {
    log.split(RECORD_SEP)
        .filter(|record| !record.trim().is_empty())
        .filter_map(|record| {
            let mut lines = record.lines();
            let header = lines.next()?;
            let mut fields = header.split(FIELD_SEP);
            let hash = fields.next()?.to_string();
            let author = fields.next().unwrap_or_default().to_string();
            let date = fields.next().unwrap_or_default().to_string();
            let message = fields.next().unwrap_or_default().to_string();
            let files = lines
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            Some(CommitSummary {
                hash,
                author,
                date,
                message,
                files,
            })
        })
        .collect()
}
