//! Assignment Registry
//!
//! The single writer of assignment status. Every status change is persisted
//! through the repository first and then mirrored to the tracker; a failed
//! mirror is logged and never undoes the transition.
//!
//! The registry also owns the slot claims: at most one [`SlotClaim`] per
//! assignment, removed and consumed on release.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Assignment, AssignmentStatus, FieldSchema, NewAssignment, ProviderSlots, ReviewResult,
    SlotClaim, SlotOwner, WorkSession,
};
use crate::domain::ports::{AssignmentRepository, IssueTracker};
use crate::services::slot_allocator::InstanceSlotAllocator;

/// Sole writer of assignment status.
///
/// Every change is persisted first, then mirrored to the tracker on a
/// best-effort basis. The registry also owns the [`SlotClaim`] of each
/// assignment that holds a slot.
pub struct AssignmentRegistry {
    repository: Arc<dyn AssignmentRepository>,
    tracker: Arc<dyn IssueTracker>,
    allocator: InstanceSlotAllocator,
    schema: FieldSchema,
    rejection_status_label: Option<String>,
    /// Live claims by assignment; the lock also serializes writes.
    claims: Mutex<HashMap<Uuid, SlotClaim>>,
}

impl AssignmentRegistry {
    /// Registry over `repository`, mirroring status into `tracker` using `schema`.
    pub fn new(
        repository: Arc<dyn AssignmentRepository>,
        tracker: Arc<dyn IssueTracker>,
        allocator: InstanceSlotAllocator,
        schema: FieldSchema,
    ) -> Self {
        Self {
            repository,
            tracker,
            allocator,
            schema,
            rejection_status_label: None,
            claims: Mutex::new(HashMap::new()),
        }
    }

    /// Tracker status written for rejected assignments instead of `assigned`.
    pub fn with_rejection_status_label(mut self, label: Option<String>) -> Self {
        self.rejection_status_label = label;
        self
    }

    /// Slot allocator shared with the registry.
    pub fn allocator(&self) -> &InstanceSlotAllocator {
        &self.allocator
    }

    /// Create an assignment for an issue and claim a slot for it.
    ///
    /// Fails with `DuplicateAssignment` when the issue already has an active
    /// assignment and with `ResourceExhausted` when the provider is full.
    #[instrument(skip(self, input), fields(issue = input.issue_number, provider = %input.provider))]
    pub async fn create_assignment(&self, input: NewAssignment) -> DomainResult<Assignment> {
        let assignment = {
            let mut claims = self.claims.lock().await;
            if self
                .repository
                .get_active_by_issue(input.issue_number)
                .await?
                .is_some()
            {
                return Err(DomainError::DuplicateAssignment(input.issue_number));
            }

            let active = self.list_active().await?;
            let id = Uuid::new_v4();
            let claim = self
                .allocator
                .claim(&input.provider, SlotOwner::Assignment(id), &active)?;

            let mut assignment = Assignment::new(input, claim.instance_id());
            assignment.id = id;
            // On failure the claim drops here and the slot frees itself.
            self.repository.create(&assignment).await?;
            claims.insert(id, claim);
            assignment
        };

        info!(
            assignment_id = %assignment.id,
            instance_id = ?assignment.instance_id,
            branch = %assignment.branch_name,
            "assignment created"
        );
        self.mirror(&assignment, assignment.status.as_str()).await;
        Ok(assignment)
    }

    /// Agent launched; records its pid.
    pub async fn mark_in_progress(&self, id: Uuid, pid: Option<u32>) -> DomainResult<Assignment> {
        self.transition(id, AssignmentStatus::InProgress, |a| {
            a.process_handle = pid;
            Ok(())
        })
        .await
    }

    /// Agent opened a pull request and is still running.
    pub async fn mark_in_review(&self, id: Uuid) -> DomainResult<Assignment> {
        self.transition(id, AssignmentStatus::InReview, |_| Ok(())).await
    }

    /// Agent finished. The slot stays claimed until the pipeline is done.
    pub async fn mark_dev_complete(&self, id: Uuid) -> DomainResult<Assignment> {
        self.transition(id, AssignmentStatus::DevComplete, |a| {
            a.process_handle = None;
            Ok(())
        })
        .await
    }

    /// The pipeline picked the assignment up.
    pub async fn begin_merge_review(&self, id: Uuid) -> DomainResult<Assignment> {
        self.transition(id, AssignmentStatus::MergeReview, |_| Ok(())).await
    }

    /// Hand the assignment's slot to the merge worker for the pipeline run.
    ///
    /// An assignment without a live claim gets a fresh merge-worker claim when
    /// one is free; otherwise the pipeline proceeds without holding a slot.
    #[instrument(skip(self))]
    pub async fn hold_slot_for_merge(&self, id: Uuid) -> DomainResult<()> {
        let mut claims = self.claims.lock().await;
        if let Some(claim) = claims.get_mut(&id) {
            claim.hand_to_merge_worker();
            debug!(instance_id = claim.instance_id(), "slot held by merge worker");
            return Ok(());
        }

        let assignment = self.get(id).await?;
        let active = self.list_active().await?;
        match self
            .allocator
            .claim(&assignment.provider, SlotOwner::MergeWorker(id), &active)
        {
            Ok(claim) => {
                debug!(instance_id = claim.instance_id(), "fresh slot claimed for merge worker");
                claims.insert(id, claim);
            }
            Err(DomainError::ResourceExhausted { .. }) => {
                warn!("no slot free for merge worker, continuing without one");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Integration passed review and was pushed to stage. Releases the slot.
    pub async fn mark_stage_ready(&self, id: Uuid, stage_commit: &str) -> DomainResult<Assignment> {
        let stage_commit = stage_commit.to_string();
        let assignment = self
            .transition(id, AssignmentStatus::StageReady, |a| {
                a.stage_commit = Some(stage_commit);
                Ok(())
            })
            .await?;
        Ok(self.release_slot(id).await?.unwrap_or(assignment))
    }

    /// Promoted to main. Retires the assignment.
    pub async fn mark_merged(&self, id: Uuid, main_commit: Option<&str>) -> DomainResult<Assignment> {
        let main_commit = main_commit.map(str::to_string);
        self.transition(id, AssignmentStatus::Merged, |a| {
            a.main_commit = main_commit;
            Ok(())
        })
        .await?;
        self.release_slot(id).await?;
        self.get(id).await
    }

    /// Send an assignment back to `assigned` with feedback. Releases the slot.
    #[instrument(skip(self, reason))]
    pub async fn reject(&self, id: Uuid, reason: &str) -> DomainResult<Assignment> {
        let reason = reason.to_string();
        let assignment = {
            let mut claims = self.claims.lock().await;
            let mut assignment = self.get(id).await?;
            if assignment.status == AssignmentStatus::Assigned {
                // Never started, e.g. the agent failed to launch.
                assignment.touch();
                assignment.version += 1;
            } else {
                assignment.transition_to(AssignmentStatus::Assigned)?;
            }
            assignment.note_rejection(reason);
            assignment.process_handle = None;
            assignment.instance_id = None;
            self.repository.update(&assignment).await?;
            if let Some(claim) = claims.remove(&id) {
                claim.release();
            }
            assignment
        };

        warn!(
            assignment_id = %id,
            issue = assignment.issue_number,
            rejections = assignment.rejection_count,
            reason = ?assignment.last_rejection,
            "assignment rejected"
        );
        let label = self
            .rejection_status_label
            .clone()
            .unwrap_or_else(|| assignment.status.as_str().to_string());
        self.mirror(&assignment, &label).await;
        Ok(assignment)
    }

    /// Move a phase sibling straight to `target` (stage-ready or merged).
    ///
    /// Returns the statuses passed through. Slots are released on `merged`.
    #[instrument(skip(self))]
    pub async fn propagate_status(
        &self,
        id: Uuid,
        target: AssignmentStatus,
    ) -> DomainResult<Vec<AssignmentStatus>> {
        let (assignment, path) = {
            let mut claims = self.claims.lock().await;
            let mut assignment = self.get(id).await?;
            let path = assignment.propagate_to(target)?;
            if target == AssignmentStatus::Merged {
                assignment.instance_id = None;
                assignment.process_handle = None;
            }
            self.repository.update(&assignment).await?;
            if target == AssignmentStatus::Merged {
                if let Some(claim) = claims.remove(&id) {
                    claim.release();
                }
            }
            (assignment, path)
        };

        info!(
            assignment_id = %id,
            issue = assignment.issue_number,
            path = ?path,
            "status propagated from phase master"
        );
        self.mirror(&assignment, assignment.status.as_str()).await;
        Ok(path)
    }

    /// Claim a new slot for a slot-less `assigned` assignment so it can run again.
    #[instrument(skip(self))]
    pub async fn reclaim_slot(&self, id: Uuid) -> DomainResult<Assignment> {
        let assignment = {
            let mut claims = self.claims.lock().await;
            if claims.contains_key(&id) {
                return Err(DomainError::ValidationFailed(format!(
                    "Assignment {id} already holds a slot"
                )));
            }
            let mut assignment = self.get(id).await?;
            if assignment.status != AssignmentStatus::Assigned {
                return Err(DomainError::InvalidStateTransition {
                    from: assignment.status.as_str().to_string(),
                    to: AssignmentStatus::Assigned.as_str().to_string(),
                });
            }
            let active = self.list_active().await?;
            let claim = self
                .allocator
                .claim(&assignment.provider, SlotOwner::Assignment(id), &active)?;
            assignment.instance_id = Some(claim.instance_id().to_string());
            assignment.touch();
            assignment.version += 1;
            self.repository.update(&assignment).await?;
            claims.insert(id, claim);
            assignment
        };

        info!(instance_id = ?assignment.instance_id, "slot reclaimed");
        self.mirror(&assignment, assignment.status.as_str()).await;
        Ok(assignment)
    }

    /// Release the assignment's slot, if it holds one.
    ///
    /// Returns the updated assignment, or `None` when there was nothing to
    /// release. Releasing twice is a logged no-op.
    pub async fn release_slot(&self, id: Uuid) -> DomainResult<Option<Assignment>> {
        let mut claims = self.claims.lock().await;
        let Some(claim) = claims.remove(&id) else {
            debug!(assignment_id = %id, "no slot claim to release");
            return Ok(None);
        };
        claim.release();

        let mut assignment = self.get(id).await?;
        assignment.instance_id = None;
        assignment.version += 1;
        self.repository.update(&assignment).await?;
        Ok(Some(assignment))
    }

    /// Rebuild claims for persisted assignments that still name an instance.
    ///
    /// Returns how many claims were restored.
    #[instrument(skip(self))]
    pub async fn restore_claims(&self) -> DomainResult<usize> {
        let mut claims = self.claims.lock().await;
        let mut restored = 0;
        for assignment in self.list_active().await? {
            let Some(instance) = assignment.instance_id.as_deref() else {
                continue;
            };
            if claims.contains_key(&assignment.id) {
                continue;
            }
            match self
                .allocator
                .claim_instance(instance, SlotOwner::Assignment(assignment.id))
            {
                Ok(claim) => {
                    claims.insert(assignment.id, claim);
                    restored += 1;
                }
                Err(e) => warn!(
                    assignment_id = %assignment.id,
                    instance_id = instance,
                    error = %e,
                    "could not restore slot claim"
                ),
            }
        }
        if restored > 0 {
            info!(restored, "slot claims restored");
        }
        Ok(restored)
    }

    /// Store the latest persona review without changing status.
    pub async fn record_review(&self, id: Uuid, review: ReviewResult) -> DomainResult<Assignment> {
        self.update(id, |a| {
            a.review_result = Some(review);
            Ok(())
        })
        .await
    }

    /// Append an agent activity record without changing status.
    pub async fn add_work_session(&self, id: Uuid, session: WorkSession) -> DomainResult<Assignment> {
        self.update(id, |a| {
            a.work_sessions.push(session);
            Ok(())
        })
        .await
    }

    /// Note agent output without changing status.
    pub async fn touch_activity(&self, id: Uuid) -> DomainResult<Assignment> {
        self.update(id, |a| {
            a.touch();
            Ok(())
        })
        .await
    }

    /// Assignment by id, or `AssignmentNotFound`.
    pub async fn get(&self, id: Uuid) -> DomainResult<Assignment> {
        self.repository
            .get(id)
            .await?
            .ok_or(DomainError::AssignmentNotFound(id))
    }

    /// The active assignment for an issue.
    pub async fn get_by_issue(&self, issue_number: u64) -> DomainResult<Option<Assignment>> {
        self.repository.get_active_by_issue(issue_number).await
    }

    /// Assignments currently in `status`.
    pub async fn list_by_status(&self, status: AssignmentStatus) -> DomainResult<Vec<Assignment>> {
        self.repository.list_by_status(status).await
    }

    /// Every assignment not yet merged.
    pub async fn list_active(&self) -> DomainResult<Vec<Assignment>> {
        Ok(self
            .repository
            .list_all()
            .await?
            .into_iter()
            .filter(Assignment::is_active)
            .collect())
    }

    /// Every assignment, merged ones included.
    pub async fn list_all(&self) -> DomainResult<Vec<Assignment>> {
        self.repository.list_all().await
    }

    /// Whether the issue has an active assignment.
    pub async fn is_issue_assigned(&self, issue_number: u64) -> DomainResult<bool> {
        Ok(self.get_by_issue(issue_number).await?.is_some())
    }

    /// Whether the registry currently holds a claim for the assignment.
    pub async fn holds_claim(&self, id: Uuid) -> bool {
        self.claims.lock().await.contains_key(&id)
    }

    /// Occupancy of every slot of `provider`.
    pub async fn slot_view(&self, provider: &str) -> DomainResult<ProviderSlots> {
        let active = self.list_active().await?;
        self.allocator.get_provider_slots(provider, &active)
    }

    /// Load, mutate and persist under the write lock, then mirror.
    async fn transition<F>(&self, id: Uuid, status: AssignmentStatus, apply: F) -> DomainResult<Assignment>
    where
        F: FnOnce(&mut Assignment) -> DomainResult<()>,
    {
        let assignment = self
            .update(id, |a| {
                a.transition_to(status)?;
                apply(a)
            })
            .await?;
        info!(
            assignment_id = %id,
            issue = assignment.issue_number,
            status = %status,
            "assignment status changed"
        );
        self.mirror(&assignment, status.as_str()).await;
        Ok(assignment)
    }

    async fn update<F>(&self, id: Uuid, apply: F) -> DomainResult<Assignment>
    where
        F: FnOnce(&mut Assignment) -> DomainResult<()>,
    {
        let _guard = self.claims.lock().await;
        let mut assignment = self.get(id).await?;
        apply(&mut assignment)?;
        self.repository.update(&assignment).await?;
        Ok(assignment)
    }

    async fn mirror(&self, assignment: &Assignment, status_label: &str) {
        let update = self
            .schema
            .encode(status_label, assignment.instance_id.as_deref());
        if let Err(e) = self
            .tracker
            .update_fields(assignment.issue_number, &update)
            .await
        {
            warn!(
                issue = assignment.issue_number,
                status = status_label,
                error = %e,
                "failed to mirror assignment status to tracker"
            );
        }
    }
}
