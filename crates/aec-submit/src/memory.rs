//! In-memory VCS for tests and dry runs

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;

use crate::adapter::{CommitResult, CommitSummary, Result, VcsAdapter, VcsError, WorkingTreeStatus};

#[derive(Debug, Default)]
struct State {
    current: String,
    branches: BTreeSet<String>,
    staged: Vec<String>,
    commits: Vec<CommitSummary>,
    dirty: Vec<String>,
    failing: HashSet<&'static str>,
}

/// A fake repository that records every operation
///
/// Operations can be made to fail by name (`"checkout_new"`, `"commit"`,
/// `"add"`, `"status"`, ...) to exercise error paths.
pub struct InMemoryVcs {
    state: Mutex<State>,
}

impl InMemoryVcs {
    /// A repository with a single `main` branch and no history
    pub fn new() -> Self {
        let mut branches = BTreeSet::new();
        branches.insert("main".to_string());
        Self {
            state: Mutex::new(State {
                current: "main".to_string(),
                branches,
                ..State::default()
            }),
        }
    }

    /// Mark paths as having uncommitted changes
    pub fn with_dirty(self, paths: &[&str]) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.dirty = paths.iter().map(|p| p.to_string()).collect();
        }
        self
    }

    /// Seed history, newest first
    pub fn with_commits(self, commits: Vec<CommitSummary>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.commits = commits;
        }
        self
    }

    /// Make the named operation fail
    pub fn fail_on(self, operation: &'static str) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(operation);
        }
        self
    }

    /// Branches that currently exist
    pub fn branches(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.branches.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Commits recorded so far, newest first
    pub fn commits(&self) -> Vec<CommitSummary> {
        self.state
            .lock()
            .map(|s| s.commits.clone())
            .unwrap_or_default()
    }

    fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, State>> {
        let state = self
            .state
            .lock()
            .map_err(|_| VcsError::InvalidState("in-memory vcs lock poisoned".to_string()))?;
        if state.failing.contains(operation) {
            return Err(VcsError::CommandFailed(format!(
                "{} failed (injected)",
                operation
            )));
        }
        Ok(state)
    }
}

impl Default for InMemoryVcs {
    fn default() -> Self {
        Self::new()
    }
}

impl VcsAdapter for InMemoryVcs {
    fn current_branch(&self) -> Result<String> {
        Ok(self.lock("current_branch")?.current.clone())
    }

    fn branch_exists(&self, name: &str) -> Result<bool> {
        Ok(self.lock("branch_exists")?.branches.contains(name))
    }

    fn checkout_new(&self, name: &str) -> Result<()> {
        let mut state = self.lock("checkout_new")?;
        if !state.branches.insert(name.to_string()) {
            return Err(VcsError::InvalidState(format!(
                "branch {} already exists",
                name
            )));
        }
        state.current = name.to_string();
        Ok(())
    }

    fn checkout(&self, name: &str) -> Result<()> {
        let mut state = self.lock("checkout")?;
        if !state.branches.contains(name) {
            return Err(VcsError::BranchNotFound(name.to_string()));
        }
        state.current = name.to_string();
        Ok(())
    }

    fn add(&self, paths: &[String]) -> Result<()> {
        let mut state = self.lock("add")?;
        for path in paths {
            if !state.staged.contains(path) {
                state.staged.push(path.clone());
            }
        }
        Ok(())
    }

    fn commit(&self, message: &str, paths: &[String]) -> Result<CommitResult> {
        let mut state = self.lock("commit")?;
        let (files, rest): (Vec<String>, Vec<String>) = std::mem::take(&mut state.staged)
            .into_iter()
            .partition(|p| paths.contains(p));
        state.staged = rest;
        if files.is_empty() {
            return Err(VcsError::InvalidState("No changes to commit".to_string()));
        }
        let hash = format!("{:040x}", state.commits.len() + 1);
        state.commits.insert(
            0,
            CommitSummary {
                hash: hash.clone(),
                author: "aec".to_string(),
                date: Utc::now().to_rfc3339(),
                message: message.to_string(),
                files,
            },
        );
        Ok(CommitResult {
            commit_id: hash.clone(),
            message: format!("Committed as {}", &hash[..8]),
            metadata: Default::default(),
        })
    }

    fn status(&self) -> Result<WorkingTreeStatus> {
        Ok(WorkingTreeStatus {
            changed_paths: self.lock("status")?.dirty.clone(),
        })
    }

    fn delete_branch(&self, name: &str, _force: bool) -> Result<()> {
        let mut state = self.lock("delete_branch")?;
        if state.current == name {
            return Err(VcsError::InvalidState(format!(
                "cannot delete checked-out branch {}",
                name
            )));
        }
        if !state.branches.remove(name) {
            return Err(VcsError::BranchNotFound(name.to_string()));
        }
        Ok(())
    }

    fn recent_commits(&self, limit: usize) -> Result<Vec<CommitSummary>> {
        Ok(self
            .lock("recent_commits")?
            .commits
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_lifecycle() {
        let vcs = InMemoryVcs::new();
        vcs.checkout_new("aec/patch-1-1").unwrap();
        assert_eq!(vcs.current_branch().unwrap(), "aec/patch-1-1");
        assert!(vcs.delete_branch("aec/patch-1-1", true).is_err());

        vcs.checkout("main").unwrap();
        vcs.delete_branch("aec/patch-1-1", false).unwrap();
        assert_eq!(vcs.branches(), vec!["main"]);
    }

    #[test]
    fn commit_takes_only_the_named_staged_files() {
        let vcs = InMemoryVcs::new();
        let named = vec!["a.ts".to_string(), "b.ts".to_string()];
        assert!(vcs.commit("nothing", &named).is_err());

        vcs.add(&["a.ts".to_string(), "user.txt".to_string(), "b.ts".to_string()])
            .unwrap();
        vcs.commit("fix", &named).unwrap();
        let commits = vcs.recent_commits(10).unwrap();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].files, vec!["a.ts", "b.ts"]);
        assert!(vcs.commit("again", &named).is_err());

        vcs.commit("user", &["user.txt".to_string()]).unwrap();
        assert_eq!(vcs.commits()[0].files, vec!["user.txt"]);
    }

    #[test]
    fn injected_failures_surface_as_errors() {
        let vcs = InMemoryVcs::new().fail_on("checkout_new");
        assert!(matches!(
            vcs.checkout_new("x"),
            Err(VcsError::CommandFailed(_))
        ));
        assert!(vcs.checkout("main").is_ok());
    }

    #[test]
    fn dirty_paths_reported_by_status() {
        let vcs = InMemoryVcs::new().with_dirty(&["src/app.ts"]);
        let status = vcs.status().unwrap();
        assert!(!status.is_clean());
        assert_eq!(status.changed_paths, vec!["src/app.ts"]);
    }
}
