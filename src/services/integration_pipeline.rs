//! Integration Pipeline.
//!
//! Drains `dev-complete` assignments one at a time through
//! merge -> conflict resolution -> persona review -> stage -> (main).
//!
//! The shared integration branch allows exactly one batch at a time; a second
//! caller gets `None` back immediately instead of waiting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{Assignment, AssignmentStatus, PhaseTag, PipelineConfig};
use crate::domain::ports::{IssueTracker, ReviewContext};
use crate::services::assignment_registry::AssignmentRegistry;
use crate::services::conflict_resolution::{ConflictContext, ConflictResolutionService};
use crate::services::persona_review::{format_rejection, PersonaReviewGate};
use crate::services::stage_branch::StageBranchController;

/// Non-blocking mutual exclusion flag.
#[derive(Debug, Default)]
pub struct SingleFlight {
    running: AtomicBool,
}

/// Held while a batch runs; clears the flag on drop.
#[derive(Debug)]
pub struct SingleFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl SingleFlight {
    /// An idle guard.
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another holder is running.
    pub fn try_acquire(&self) -> Option<SingleFlightGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SingleFlightGuard {
                flag: &self.running,
            })
    }

    /// Whether a batch is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for SingleFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// What happened to one assignment in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PipelineOutcome {
    /// Passed review and pushed to stage
    StageReady { stage_commit: String, tag: String },
    /// Pushed to stage and promoted to main
    Merged { stage_commit: String, main_commit: String },
    /// On stage, but promotion to main did not go through
    PromotionDeferred { stage_commit: String, reason: String },
    /// Sent back to `assigned`
    Rejected { reason: String },
    /// An unexpected error; the assignment was rejected
    Errored { error: String },
}

impl PipelineOutcome {
    /// Short kebab-case name for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::StageReady { .. } => "stage-ready",
            Self::Merged { .. } => "merged",
            Self::PromotionDeferred { .. } => "promotion-deferred",
            Self::Rejected { .. } => "rejected",
            Self::Errored { .. } => "errored",
        }
    }

    /// Status the assignment reached, for phase propagation.
    fn promoted_status(&self) -> Option<AssignmentStatus> {
        match self {
            Self::StageReady { .. } | Self::PromotionDeferred { .. } => Some(AssignmentStatus::StageReady),
            Self::Merged { .. } => Some(AssignmentStatus::Merged),
            _ => None,
        }
    }
}

/// One assignment's entry in a [`BatchReport`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentReport {
    /// Assignment processed.
    pub assignment_id: Uuid,
    /// Its issue.
    pub issue_number: u64,
    /// Result of the merge and review.
    pub outcome: PipelineOutcome,
    /// Phase siblings moved along with this assignment
    pub propagated: Vec<u64>,
}

/// Result of one `run_batch` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// When the batch acquired the guard.
    pub started_at: DateTime<Utc>,
    /// When the last assignment was done.
    pub finished_at: DateTime<Utc>,
    /// One entry per assignment, in processing order.
    pub results: Vec<AssignmentReport>,
}

impl BatchReport {
    /// Number of results whose outcome has `label`.
    pub fn count(&self, label: &str) -> usize {
        self.results.iter().filter(|r| r.outcome.label() == label).count()
    }
}

/// Merges `dev-complete` work into the integration branch, reviews it,
/// and pushes passing work to stage. One batch at a time.
pub struct IntegrationPipeline {
    registry: Arc<AssignmentRegistry>,
    stage: StageBranchController,
    resolver: ConflictResolutionService,
    review_gate: PersonaReviewGate,
    tracker: Arc<dyn IssueTracker>,
    config: PipelineConfig,
    single_flight: SingleFlight,
}

impl IntegrationPipeline {
    /// Pipeline over its collaborators.
    pub fn new(
        registry: Arc<AssignmentRegistry>,
        stage: StageBranchController,
        resolver: ConflictResolutionService,
        review_gate: PersonaReviewGate,
        tracker: Arc<dyn IssueTracker>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            registry,
            stage,
            resolver,
            review_gate,
            tracker,
            config,
            single_flight: SingleFlight::new(),
        }
    }

    /// Whether a batch is in flight.
    pub fn is_running(&self) -> bool {
        self.single_flight.is_running()
    }

    /// Run one batch. Returns `None` when a batch is already running.
    #[instrument(skip(self))]
    pub async fn run_batch(&self) -> DomainResult<Option<BatchReport>> {
        let Some(_guard) = self.single_flight.try_acquire() else {
            info!("integration batch already running, skipping");
            return Ok(None);
        };
        let started_at = Utc::now();

        let mut candidates = self.registry.list_by_status(AssignmentStatus::DevComplete).await?;
        candidates.sort_by_key(|a| a.issue_number);
        if self.config.phase_mode {
            candidates.retain(|a| self.is_phase_master(a));
        }
        info!(count = candidates.len(), "integration batch starting");

        let mut results = Vec::with_capacity(candidates.len());
        for assignment in candidates {
            let outcome = match self.process(&assignment).await {
                Ok(outcome) => outcome,
                Err(e) => self.recover(&assignment, e).await,
            };

            let propagated = match outcome.promoted_status() {
                Some(status) if self.config.phase_mode => self.propagate_phase(&assignment, status).await,
                _ => Vec::new(),
            };

            info!(
                issue = assignment.issue_number,
                outcome = outcome.label(),
                propagated = propagated.len(),
                "assignment processed"
            );
            results.push(AssignmentReport {
                assignment_id: assignment.id,
                issue_number: assignment.issue_number,
                outcome,
                propagated,
            });
        }

        Ok(Some(BatchReport {
            started_at,
            finished_at: Utc::now(),
            results,
        }))
    }

    fn is_phase_master(&self, assignment: &Assignment) -> bool {
        assignment.is_phase_master
            || PhaseTag::is_master_title(&assignment.issue_title, &self.config.phase_master_marker)
    }

    #[instrument(skip(self, assignment), fields(issue = assignment.issue_number, branch = %assignment.branch_name))]
    async fn process(&self, assignment: &Assignment) -> DomainResult<PipelineOutcome> {
        let id = assignment.id;
        let issue_ref = assignment.issue_ref();
        self.registry.begin_merge_review(id).await?;
        self.registry.hold_slot_for_merge(id).await?;

        self.stage.create_or_reset_integration_branch().await?;
        let attempt = self
            .stage
            .merge_feature_branch(&assignment.branch_name, &issue_ref)
            .await?;

        if attempt.has_conflicts {
            let context = ConflictContext {
                source_branch: assignment.branch_name.clone(),
                target_branch: self.stage.config().integration_branch.clone(),
                issue_ref: issue_ref.clone(),
            };
            if let Err(reason) = self.resolve_conflicts(&attempt.conflicted_files, &context).await {
                return self.reject_with_comment(assignment, &reason, None).await;
            }
        }

        let diff = self.stage.diff_against_main().await?;
        let review = self
            .review_gate
            .review(&ReviewContext {
                issue_number: assignment.issue_number,
                issue_title: assignment.issue_title.clone(),
                branch_name: assignment.branch_name.clone(),
                diff,
            })
            .await;
        self.registry.record_review(id, review.clone()).await?;

        if !review.overall_passed {
            let reason = DomainError::ReviewRejected(review.failure_reasons.join("; ")).to_string();
            let comment = format_rejection(&issue_ref, &review);
            return self.reject_with_comment(assignment, &reason, Some(comment)).await;
        }

        let push = self.stage.force_push_to_stage().await?;
        self.registry.mark_stage_ready(id, &push.commit).await?;

        if !self.config.auto_promote_to_main {
            return Ok(PipelineOutcome::StageReady {
                stage_commit: push.commit,
                tag: push.tag,
            });
        }
        Ok(self.promote(assignment, push.commit).await)
    }

    /// Resolve conflicts of the in-progress merge, or abort it.
    ///
    /// The error string is the rejection reason.
    async fn resolve_conflicts(&self, files: &[String], context: &ConflictContext) -> Result<String, String> {
        let conflict = DomainError::MergeConflict {
            branch: context.source_branch.clone(),
            files: files.to_vec(),
        };
        if !self.config.auto_resolve_conflicts {
            self.abort_best_effort().await;
            return Err(conflict.to_string());
        }

        let message = format!(
            "Merge {} ({}) into {} with resolved conflicts",
            context.source_branch, context.issue_ref, context.target_branch
        );
        let resolved = async {
            self.resolver.resolve(files, context).await?;
            self.stage.commit_resolved_conflicts(&message).await
        }
        .await;
        match resolved {
            Ok(commit) => Ok(commit),
            Err(e) => {
                self.abort_best_effort().await;
                Err(format!("{conflict}; {e}"))
            }
        }
    }

    /// Merge stage into main. Never rejects: the assignment is already on stage.
    async fn promote(&self, assignment: &Assignment, stage_commit: String) -> PipelineOutcome {
        let promoted = match self.try_promote(assignment).await {
            Ok(main_commit) => self
                .registry
                .mark_merged(assignment.id, Some(main_commit.as_str()))
                .await
                .map(|_| main_commit)
                .map_err(|e| e.to_string()),
            Err(reason) => {
                self.abort_best_effort().await;
                Err(reason)
            }
        };

        match promoted {
            Ok(main_commit) => PipelineOutcome::Merged {
                stage_commit,
                main_commit,
            },
            Err(reason) => {
                warn!(
                    issue = assignment.issue_number,
                    reason = %reason,
                    "promotion to main deferred, assignment stays stage-ready"
                );
                PipelineOutcome::PromotionDeferred {
                    stage_commit,
                    reason,
                }
            }
        }
    }

    async fn try_promote(&self, assignment: &Assignment) -> Result<String, String> {
        let attempt = self
            .stage
            .merge_stage_to_main()
            .await
            .map_err(|e| e.to_string())?;
        if attempt.merged {
            return Ok(attempt.commit.unwrap_or_default());
        }
        let context = ConflictContext {
            source_branch: self.stage.config().stage_branch.clone(),
            target_branch: self.stage.config().main_branch.clone(),
            issue_ref: assignment.issue_ref(),
        };
        self.resolve_conflicts(&attempt.conflicted_files, &context).await?;
        self.stage
            .finish_main_promotion()
            .await
            .map_err(|e| e.to_string())
    }

    async fn reject_with_comment(
        &self,
        assignment: &Assignment,
        reason: &str,
        comment: Option<String>,
    ) -> DomainResult<PipelineOutcome> {
        let body = comment.unwrap_or_else(|| {
            format!(
                "## Integration failed for {}\n\n{reason}\n\nThe assignment has been returned for rework.\n",
                assignment.issue_ref()
            )
        });
        if let Err(e) = self.tracker.post_comment(assignment.issue_number, &body).await {
            warn!(issue = assignment.issue_number, error = %e, "failed to post rejection comment");
        }
        self.registry.reject(assignment.id, reason).await?;
        Ok(PipelineOutcome::Rejected {
            reason: reason.to_string(),
        })
    }

    /// An error escaped `process`: clean up the merge and reject.
    async fn recover(&self, assignment: &Assignment, err: DomainError) -> PipelineOutcome {
        error!(issue = assignment.issue_number, error = %err, "integration failed");
        self.abort_best_effort().await;

        let current = self.registry.get(assignment.id).await.map(|a| a.status);
        match current {
            Ok(status) if status == AssignmentStatus::Assigned || status.is_terminal() => {}
            _ => {
                if let Err(e) = self.registry.reject(assignment.id, &err.to_string()).await {
                    warn!(issue = assignment.issue_number, error = %e, "failed to reject after error");
                }
            }
        }
        PipelineOutcome::Errored {
            error: err.to_string(),
        }
    }

    async fn abort_best_effort(&self) {
        if let Err(e) = self.stage.abort_merge().await {
            warn!(error = %e, "failed to abort merge");
        }
    }

    /// Move sub-phase siblings of a master to the status it reached.
    async fn propagate_phase(&self, master: &Assignment, status: AssignmentStatus) -> Vec<u64> {
        let Some(master_tag) = master.phase_tag() else {
            return Vec::new();
        };
        let siblings = match self.registry.list_active().await {
            Ok(active) => active,
            Err(e) => {
                warn!(error = %e, "could not list phase siblings");
                return Vec::new();
            }
        };

        let mut propagated = Vec::new();
        for sibling in siblings {
            if sibling.id == master.id {
                continue;
            }
            let is_sibling = sibling
                .phase_tag()
                .is_some_and(|tag| tag.is_sub_phase_of(&master_tag));
            if !is_sibling {
                continue;
            }
            match self.registry.propagate_status(sibling.id, status).await {
                Ok(_) => propagated.push(sibling.issue_number),
                Err(e) => warn!(
                    issue = sibling.issue_number,
                    error = %e,
                    "phase propagation failed"
                ),
            }
        }
        if !propagated.is_empty() {
            info!(master = master.issue_number, siblings = ?propagated, status = %status, "phase propagated");
        }
        propagated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_flight_excludes_second_holder() {
        let flight = SingleFlight::new();
        let guard = flight.try_acquire();
        assert!(guard.is_some());
        assert!(flight.try_acquire().is_none());
        assert!(flight.is_running());
        drop(guard);
        assert!(!flight.is_running());
        assert!(flight.try_acquire().is_some());
    }

    #[test]
    fn test_outcome_promoted_status() {
        let rejected = PipelineOutcome::Rejected { reason: "x".into() };
        assert_eq!(rejected.promoted_status(), None);
        let merged = PipelineOutcome::Merged {
            stage_commit: "a".into(),
            main_commit: "b".into(),
        };
        assert_eq!(merged.promoted_status(), Some(AssignmentStatus::Merged));
        assert_eq!(merged.label(), "merged");
    }
}
