//! Version-control adapters for patch application.
//!
//! The applicator and context builder only need a handful of VCS primitives:
//! create/checkout branches, stage specific files, commit, check working-tree
//! status, delete branches, and read recent history. The [`VcsAdapter`] trait
//! captures exactly those, with [`GitAdapter`] shelling out to `git` and
//! [`InMemoryVcs`] standing in for a repository in tests.

pub mod adapter;
pub mod config;
pub mod git;
pub mod memory;

pub use adapter::{CommitResult, CommitSummary, Result, VcsAdapter, VcsError, WorkingTreeStatus};
pub use config::VcsConfig;
pub use git::GitAdapter;
pub use memory::InMemoryVcs;
