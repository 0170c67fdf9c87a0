//! Version control port.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::domain::errors::DomainResult;

/// Result of a `merge --no-ff` attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    /// Merge committed; carries the new HEAD
    Clean { commit: String },
    /// Merge stopped with conflicts and is still in progress
    Conflicted { files: Vec<String> },
}

/// Git operations the engine needs, all against one working copy.
#[async_trait]
pub trait VersionControl: Send + Sync {
    async fn checkout(&self, branch: &str) -> DomainResult<()>;

    async fn fetch(&self, remote: &str, branch: &str) -> DomainResult<()>;

    /// Fast-forward the current branch to `upstream` (e.g. `origin/main`).
    async fn fast_forward(&self, upstream: &str) -> DomainResult<()>;

    async fn branch_exists(&self, branch: &str) -> DomainResult<bool>;

    /// Create `branch` at `start_point` and check it out.
    async fn create_branch(&self, branch: &str, start_point: &str) -> DomainResult<()>;

    /// Force-delete a local branch. Missing branches are not an error.
    async fn delete_branch(&self, branch: &str) -> DomainResult<()>;

    /// Point `branch` at `target` without checking it out.
    async fn set_branch(&self, branch: &str, target: &str) -> DomainResult<()>;

    /// `merge --no-ff -m message source` into the current branch.
    async fn merge_no_ff(&self, source: &str, message: &str) -> DomainResult<MergeOutcome>;

    async fn merge_in_progress(&self) -> DomainResult<bool>;

    /// Paths with unresolved conflicts.
    async fn unmerged_paths(&self) -> DomainResult<Vec<String>>;

    async fn abort_merge(&self) -> DomainResult<()>;

    async fn stage(&self, path: &str) -> DomainResult<()>;

    async fn stage_all(&self) -> DomainResult<()>;

    /// Commit staged changes; returns the new HEAD.
    async fn commit(&self, message: &str) -> DomainResult<String>;

    async fn head(&self, rev: &str) -> DomainResult<String>;

    /// Three-dot diff `base...head`.
    async fn diff(&self, base: &str, head: &str) -> DomainResult<String>;

    async fn push(&self, remote: &str, refspec: &str, force: bool) -> DomainResult<()>;

    /// Create (or move) a lightweight tag at `target`.
    async fn tag(&self, name: &str, target: &str) -> DomainResult<()>;

    /// One-line log of `range`.
    async fn log_range(&self, range: &str) -> DomainResult<Vec<String>>;

    async fn read_file(&self, path: &str) -> DomainResult<String>;

    async fn write_file(&self, path: &str, content: &str) -> DomainResult<()>;

    /// Add a worktree at `path` on a new `branch` from `start_point`,
    /// reusing the branch when it already exists.
    async fn add_worktree(&self, path: &Path, branch: &str, start_point: &str) -> DomainResult<()>;
}
