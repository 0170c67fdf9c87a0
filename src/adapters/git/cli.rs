//! [`VersionControl`] over the `git` binary.

use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::{MergeOutcome, VersionControl};

/// Runs git in one working copy.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo: PathBuf,
}

impl GitCli {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }

    pub fn repo_path(&self) -> &Path {
        &self.repo
    }

    async fn output(&self, args: &[&str]) -> DomainResult<Output> {
        debug!(args = ?args, "git");
        Command::new("git")
            .current_dir(&self.repo)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| DomainError::VersionControl(format!("failed to run git: {e}")))
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn git(&self, args: &[&str]) -> DomainResult<String> {
        let output = self.output(args).await?;
        if !output.status.success() {
            return Err(command_failed(args, &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim_end().to_string())
    }

    /// Run git and report only whether it succeeded.
    async fn succeeds(&self, args: &[&str]) -> DomainResult<bool> {
        Ok(self.output(args).await?.status.success())
    }

    fn resolve(&self, path: &str) -> DomainResult<PathBuf> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(DomainError::VersionControl(format!(
                "path '{path}' is outside the working copy"
            )));
        }
        Ok(self.repo.join(relative))
    }
}

fn command_failed(args: &[&str], output: &Output) -> DomainError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
    DomainError::VersionControl(format!("git {} failed: {detail}", args.join(" ")))
}

/// Paths from `git diff --name-only --diff-filter=U -z`.
///
/// The listing is NUL-separated and unquoted, so non-ASCII names arrive
/// verbatim. Each path is returned once, in listing order.
pub fn parse_unmerged_paths(listing: &str) -> Vec<String> {
    let mut paths: Vec<String> = Vec::new();
    for path in listing.split('\0').filter(|p| !p.is_empty()) {
        if !paths.iter().any(|seen| seen == path) {
            paths.push(path.to_string());
        }
    }
    paths
}

#[async_trait]
impl VersionControl for GitCli {
    async fn checkout(&self, branch: &str) -> DomainResult<()> {
        self.git(&["checkout", branch]).await.map(|_| ())
    }

    async fn fetch(&self, remote: &str, branch: &str) -> DomainResult<()> {
        self.git(&["fetch", remote, branch]).await.map(|_| ())
    }

    async fn fast_forward(&self, upstream: &str) -> DomainResult<()> {
        self.git(&["merge", "--ff-only", upstream]).await.map(|_| ())
    }

    async fn branch_exists(&self, branch: &str) -> DomainResult<bool> {
        let reference = format!("refs/heads/{branch}");
        self.succeeds(&["rev-parse", "--verify", "--quiet", &reference]).await
    }

    async fn create_branch(&self, branch: &str, start_point: &str) -> DomainResult<()> {
        self.git(&["checkout", "-b", branch, start_point]).await.map(|_| ())
    }

    async fn delete_branch(&self, branch: &str) -> DomainResult<()> {
        if !self.branch_exists(branch).await? {
            return Ok(());
        }
        self.git(&["branch", "-D", branch]).await.map(|_| ())
    }

    async fn set_branch(&self, branch: &str, target: &str) -> DomainResult<()> {
        self.git(&["branch", "-f", branch, target]).await.map(|_| ())
    }

    #[instrument(skip(self, message))]
    async fn merge_no_ff(&self, source: &str, message: &str) -> DomainResult<MergeOutcome> {
        let args = ["merge", "--no-ff", "--no-edit", "-m", message, source];
        let output = self.output(&args).await?;
        if output.status.success() {
            let commit = self.head("HEAD").await?;
            return Ok(MergeOutcome::Clean { commit });
        }

        let files = self.unmerged_paths().await?;
        if !files.is_empty() {
            return Ok(MergeOutcome::Conflicted { files });
        }

        // Failed for another reason (dirty tree, unknown ref): leave nothing behind.
        if self.merge_in_progress().await? {
            if let Err(e) = self.abort_merge().await {
                warn!(error = %e, "failed to abort broken merge");
            }
        }
        Err(command_failed(&args, &output))
    }

    async fn merge_in_progress(&self) -> DomainResult<bool> {
        self.succeeds(&["rev-parse", "-q", "--verify", "MERGE_HEAD"]).await
    }

    async fn unmerged_paths(&self) -> DomainResult<Vec<String>> {
        let listing = self
            .git(&["diff", "--name-only", "--diff-filter=U", "-z"])
            .await?;
        Ok(parse_unmerged_paths(&listing))
    }

    async fn abort_merge(&self) -> DomainResult<()> {
        self.git(&["merge", "--abort"]).await.map(|_| ())
    }

    async fn stage(&self, path: &str) -> DomainResult<()> {
        self.git(&["add", "--", path]).await.map(|_| ())
    }

    async fn stage_all(&self) -> DomainResult<()> {
        self.git(&["add", "-A"]).await.map(|_| ())
    }

    async fn commit(&self, message: &str) -> DomainResult<String> {
        self.git(&["commit", "--no-edit", "-m", message]).await?;
        self.head("HEAD").await
    }

    async fn head(&self, rev: &str) -> DomainResult<String> {
        self.git(&["rev-parse", rev]).await
    }

    async fn diff(&self, base: &str, head: &str) -> DomainResult<String> {
        let range = format!("{base}...{head}");
        self.git(&["diff", &range]).await
    }

    async fn push(&self, remote: &str, refspec: &str, force: bool) -> DomainResult<()> {
        let mut args = vec!["push"];
        if force {
            args.push("--force");
        }
        args.extend([remote, refspec]);
        self.git(&args).await.map(|_| ())
    }

    async fn tag(&self, name: &str, target: &str) -> DomainResult<()> {
        self.git(&["tag", "-f", name, target]).await.map(|_| ())
    }

    async fn log_range(&self, range: &str) -> DomainResult<Vec<String>> {
        let log = self.git(&["log", "--oneline", range]).await?;
        Ok(log.lines().map(str::to_string).collect())
    }

    async fn read_file(&self, path: &str) -> DomainResult<String> {
        let full = self.resolve(path)?;
        tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| DomainError::VersionControl(format!("failed to read {path}: {e}")))
    }

    async fn write_file(&self, path: &str, content: &str) -> DomainResult<()> {
        let full = self.resolve(path)?;
        tokio::fs::write(&full, content)
            .await
            .map_err(|e| DomainError::VersionControl(format!("failed to write {path}: {e}")))
    }

    #[instrument(skip(self))]
    async fn add_worktree(&self, path: &Path, branch: &str, start_point: &str) -> DomainResult<()> {
        let target = if path.is_absolute() { path.to_path_buf() } else { self.repo.join(path) };
        if target.exists() {
            debug!(path = %target.display(), "worktree already present");
            return Ok(());
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DomainError::VersionControl(format!("failed to create {}: {e}", parent.display())))?;
        }

        let location = target.to_string_lossy().to_string();
        if self.branch_exists(branch).await? {
            self.git(&["worktree", "add", &location, branch]).await?;
        } else {
            self.git(&["worktree", "add", "-b", branch, &location, start_point]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_unmerged_paths() {
        let listing = "src/lib.rs\0docs/new file.md\0notes/\u{fc}ber.md\0src/lib.rs\0";
        assert_eq!(
            parse_unmerged_paths(listing),
            vec!["src/lib.rs", "docs/new file.md", "notes/\u{fc}ber.md"]
        );
        assert!(parse_unmerged_paths("").is_empty());
    }

    #[test]
    fn test_resolve_rejects_escaping_paths() {
        let git = GitCli::new("/tmp/repo");
        assert!(git.resolve("src/lib.rs").is_ok());
        assert!(git.resolve("../etc/passwd").is_err());
        assert!(git.resolve("/etc/passwd").is_err());
    }
}
