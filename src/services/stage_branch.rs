//! Stage Branch Controller.
//!
//! Drives the shared branches through one integration cycle:
//!
//! ```text
//! absent -> fresh-from-main -> merged-into -> pushed-to-stage -> promoted-to-main
//! ```
//!
//! The integration branch is scratch space; it is rebuilt from main before
//! every merge attempt so a failed attempt never leaks into the next one.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{PipelineConfig, RepositoryConfig};
use crate::domain::ports::{MergeOutcome, VersionControl};

/// Branch layout for the controller.
#[derive(Debug, Clone)]
pub struct StageBranchConfig {
    /// Branch promoted work lands on.
    pub main_branch: String,
    /// Scratch branch rebuilt from main for every merge.
    pub integration_branch: String,
    /// Last integration that passed review.
    pub stage_branch: String,
    /// Remote to sync with; local-only when `None`.
    pub remote: Option<String>,
    /// Prefix of stage push tags.
    pub tag_prefix: String,
}

impl StageBranchConfig {
    /// Branch layout from the repository and pipeline sections.
    pub fn from_config(repo: &RepositoryConfig, pipeline: &PipelineConfig) -> Self {
        Self {
            main_branch: repo.main_branch.clone(),
            integration_branch: repo.integration_branch.clone(),
            stage_branch: repo.stage_branch.clone(),
            remote: repo.remote.clone(),
            tag_prefix: pipeline.tag_prefix.clone(),
        }
    }
}

impl Default for StageBranchConfig {
    fn default() -> Self {
        Self::from_config(&RepositoryConfig::default(), &PipelineConfig::default())
    }
}

/// Outcome of merging one branch into another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeAttempt {
    /// The merge committed cleanly.
    pub merged: bool,
    /// Merge commit, when `merged`.
    pub commit: Option<String>,
    /// The merge stopped on conflicts and is still in progress.
    pub has_conflicts: bool,
    /// Paths with conflicts, relative to the repository root.
    pub conflicted_files: Vec<String>,
}

impl From<MergeOutcome> for MergeAttempt {
    fn from(outcome: MergeOutcome) -> Self {
        match outcome {
            MergeOutcome::Clean { commit } => Self {
                merged: true,
                commit: Some(commit),
                has_conflicts: false,
                conflicted_files: Vec::new(),
            },
            MergeOutcome::Conflicted { files } => Self {
                merged: false,
                commit: None,
                has_conflicts: true,
                conflicted_files: files,
            },
        }
    }
}

/// Result of publishing the integration branch to stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagePush {
    /// Commit stage now points at.
    pub commit: String,
    /// Tag placed on that commit.
    pub tag: String,
}

/// Drives the integration, stage and main branches through a [`VersionControl`].
pub struct StageBranchController {
    vcs: Arc<dyn VersionControl>,
    config: StageBranchConfig,
}

impl StageBranchController {
    /// Fails when a configured branch name is unsafe to pass to git.
    pub fn new(vcs: Arc<dyn VersionControl>, config: StageBranchConfig) -> DomainResult<Self> {
        validate_branch_name(&config.main_branch)?;
        validate_branch_name(&config.integration_branch)?;
        validate_branch_name(&config.stage_branch)?;
        if let Some(remote) = &config.remote {
            validate_branch_name(remote)?;
        }
        Ok(Self { vcs, config })
    }

    /// Branch layout in use.
    pub fn config(&self) -> &StageBranchConfig {
        &self.config
    }

    /// Rebuild the integration branch from an up-to-date main. Idempotent.
    ///
    /// Returns the commit the branch now points at.
    #[instrument(skip(self), fields(branch = %self.config.integration_branch))]
    pub async fn create_or_reset_integration_branch(&self) -> DomainResult<String> {
        let cfg = &self.config;
        self.abort_merge().await?;
        self.vcs.checkout(&cfg.main_branch).await?;

        if let Some(remote) = &cfg.remote {
            self.vcs.fetch(remote, &cfg.main_branch).await?;
            self.vcs
                .fast_forward(&format!("{remote}/{}", cfg.main_branch))
                .await?;
        }

        self.vcs.delete_branch(&cfg.integration_branch).await?;
        self.vcs
            .create_branch(&cfg.integration_branch, &cfg.main_branch)
            .await?;
        let head = self.vcs.head(&cfg.integration_branch).await?;
        debug!(commit = %head, "integration branch reset from main");
        Ok(head)
    }

    /// `merge --no-ff` a feature branch into the integration branch.
    ///
    /// Conflicts are reported, not raised, and leave the merge in progress.
    #[instrument(skip(self))]
    pub async fn merge_feature_branch(&self, branch: &str, issue_ref: &str) -> DomainResult<MergeAttempt> {
        validate_branch_name(branch)?;
        let cfg = &self.config;
        self.vcs.checkout(&cfg.integration_branch).await?;
        let message = format!(
            "Merge {branch} ({issue_ref}) into {}",
            cfg.integration_branch
        );
        let attempt = MergeAttempt::from(self.vcs.merge_no_ff(branch, &message).await?);
        if attempt.has_conflicts {
            warn!(files = ?attempt.conflicted_files, "feature branch merge conflicted");
        } else {
            info!(commit = ?attempt.commit, "feature branch merged into integration");
        }
        Ok(attempt)
    }

    /// Abort an in-progress merge; no-op when none is in progress.
    pub async fn abort_merge(&self) -> DomainResult<()> {
        if self.vcs.merge_in_progress().await? {
            debug!("aborting in-progress merge");
            self.vcs.abort_merge().await?;
        }
        Ok(())
    }

    /// Conclude a merge whose conflicted files have all been staged.
    /// Returns the merge commit.
    pub async fn commit_resolved_conflicts(&self, message: &str) -> DomainResult<String> {
        let remaining = self.vcs.unmerged_paths().await?;
        if !remaining.is_empty() {
            return Err(DomainError::MergeConflict {
                branch: self.config.integration_branch.clone(),
                files: remaining,
            });
        }
        self.vcs.stage_all().await?;
        self.vcs.commit(message).await
    }

    /// `main...integration` diff.
    pub async fn diff_against_main(&self) -> DomainResult<String> {
        self.vcs
            .diff(&self.config.main_branch, &self.config.integration_branch)
            .await
    }

    /// Force stage to the integration tip and tag it.
    #[instrument(skip(self), fields(stage = %self.config.stage_branch))]
    pub async fn force_push_to_stage(&self) -> DomainResult<StagePush> {
        let cfg = &self.config;
        let commit = self.vcs.head(&cfg.integration_branch).await?;

        self.vcs.set_branch(&cfg.stage_branch, &commit).await?;
        if let Some(remote) = &cfg.remote {
            let refspec = format!("{}:refs/heads/{}", cfg.integration_branch, cfg.stage_branch);
            self.vcs.push(remote, &refspec, true).await?;
        }

        let tag = stage_tag(&cfg.tag_prefix);
        self.vcs.tag(&tag, &commit).await?;
        if let Some(remote) = &cfg.remote {
            self.vcs
                .push(remote, &format!("refs/tags/{tag}"), true)
                .await?;
        }

        info!(commit = %commit, tag = %tag, "integration pushed to stage");
        Ok(StagePush { commit, tag })
    }

    /// Merge stage into main. A clean merge is pushed; conflicts stay in progress.
    #[instrument(skip(self))]
    pub async fn merge_stage_to_main(&self) -> DomainResult<MergeAttempt> {
        let cfg = &self.config;
        self.abort_merge().await?;
        self.vcs.checkout(&cfg.main_branch).await?;

        let source = match &cfg.remote {
            Some(remote) => {
                self.vcs.fetch(remote, &cfg.main_branch).await?;
                self.vcs
                    .fast_forward(&format!("{remote}/{}", cfg.main_branch))
                    .await?;
                self.vcs.fetch(remote, &cfg.stage_branch).await?;
                format!("{remote}/{}", cfg.stage_branch)
            }
            None => cfg.stage_branch.clone(),
        };

        let message = format!("Promote {} to {}", cfg.stage_branch, cfg.main_branch);
        let attempt = MergeAttempt::from(self.vcs.merge_no_ff(&source, &message).await?);
        if attempt.merged {
            self.push_main().await?;
            info!(commit = ?attempt.commit, "stage promoted to main");
        } else {
            warn!(files = ?attempt.conflicted_files, "stage to main merge conflicted");
        }
        Ok(attempt)
    }

    /// Publish main after a promotion conflict was resolved and committed.
    pub async fn finish_main_promotion(&self) -> DomainResult<String> {
        self.push_main().await?;
        self.vcs.head(&self.config.main_branch).await
    }

    async fn push_main(&self) -> DomainResult<()> {
        if let Some(remote) = &self.config.remote {
            self.vcs
                .push(remote, &self.config.main_branch, false)
                .await?;
        }
        Ok(())
    }
}

/// `{prefix}YYYYmmdd-HHMMSS-mmm` in UTC.
pub fn stage_tag(prefix: &str) -> String {
    format!("{prefix}{}", Utc::now().format("%Y%m%d-%H%M%S-%3f"))
}

/// Reject names git would misread as options or revision syntax.
pub fn validate_branch_name(name: &str) -> DomainResult<()> {
    if name.is_empty() {
        return Err(DomainError::ValidationFailed(
            "Branch name cannot be empty".to_string(),
        ));
    }
    if name.starts_with('-') {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': must not start with '-'"
        )));
    }
    if name.contains("..") {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': must not contain '..'"
        )));
    }
    for ch in name.chars() {
        if ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return Err(DomainError::ValidationFailed(format!(
                "Invalid branch name '{name}': contains disallowed character '{ch}'"
            )));
        }
    }
    if name.ends_with(".lock") {
        return Err(DomainError::ValidationFailed(format!(
            "Invalid branch name '{name}': must not end with '.lock'"
        )));
    }
    Ok(())
}
