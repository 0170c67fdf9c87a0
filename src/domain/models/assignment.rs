//! Assignment domain model.
//!
//! An assignment binds one issue to one agent run and tracks it through the
//! merge/review lifecycle. Status is only changed through the transition
//! methods here, which enforce the declared transition graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::issue::PhaseTag;
use crate::domain::models::review::ReviewResult;

/// Lifecycle status of an assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentStatus {
    /// Issue scheduled, slot claimed (or awaiting re-claim after a rejection)
    Assigned,
    /// Agent process is running
    InProgress,
    /// Agent opened a pull request and is waiting on review
    InReview,
    /// Agent finished; waiting for the integration pipeline
    DevComplete,
    /// Being merged and reviewed on the integration branch
    MergeReview,
    /// Review passed; integration output pushed to the stage branch
    StageReady,
    /// Promoted to main; retired
    Merged,
}

impl Default for AssignmentStatus {
    fn default() -> Self {
        Self::Assigned
    }
}

impl AssignmentStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Assigned,
        Self::InProgress,
        Self::InReview,
        Self::DevComplete,
        Self::MergeReview,
        Self::StageReady,
        Self::Merged,
    ];

    /// Kebab-case name, as stored and mirrored to the tracker.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assigned => "assigned",
            Self::InProgress => "in-progress",
            Self::InReview => "in-review",
            Self::DevComplete => "dev-complete",
            Self::MergeReview => "merge-review",
            Self::StageReady => "stage-ready",
            Self::Merged => "merged",
        }
    }

    /// Parse a status name; case and `_`/`-` are not significant.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "assigned" => Some(Self::Assigned),
            "in-progress" => Some(Self::InProgress),
            "in-review" => Some(Self::InReview),
            "dev-complete" => Some(Self::DevComplete),
            "merge-review" => Some(Self::MergeReview),
            "stage-ready" => Some(Self::StageReady),
            "merged" => Some(Self::Merged),
            _ => None,
        }
    }

    /// Retired assignments are kept but no longer count as active.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Merged)
    }

    /// Counts toward the one-active-assignment-per-issue rule.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Statuses in which an agent process owns the instance slot.
    pub fn occupies_instance(&self) -> bool {
        matches!(self, Self::Assigned | Self::InProgress)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> Vec<AssignmentStatus> {
        match self {
            Self::Assigned => vec![Self::InProgress],
            Self::InProgress => vec![Self::InReview, Self::DevComplete, Self::Assigned],
            Self::InReview => vec![Self::InProgress, Self::DevComplete, Self::Assigned],
            Self::DevComplete => vec![Self::MergeReview],
            Self::MergeReview => vec![Self::StageReady, Self::Assigned],
            Self::StageReady => vec![Self::Merged],
            Self::Merged => vec![],
        }
    }

    /// Whether `new_status` is a declared successor.
    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// Path a phase sibling walks when it is synced to `target`.
    ///
    /// Siblings in `dev-complete` pass through `merge-review` so they never
    /// appear to skip it. Only `stage-ready` and `merged` are propagated.
    pub fn propagation_path(&self, target: Self) -> Option<Vec<AssignmentStatus>> {
        if !matches!(target, Self::StageReady | Self::Merged) || self.is_terminal() {
            return None;
        }
        if *self == target {
            return Some(vec![]);
        }
        match self {
            Self::DevComplete => {
                let mut path = vec![Self::MergeReview, Self::StageReady];
                if target == Self::Merged {
                    path.push(Self::Merged);
                }
                Some(path)
            }
            _ => Some(vec![target]),
        }
    }
}

impl std::fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A timestamped record of agent activity on an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSession {
    /// When the agent run started.
    pub started_at: DateTime<Utc>,
    /// When the run ended; `None` while it is still going.
    pub ended_at: Option<DateTime<Utc>>,
    /// Free-form summary (last log lines, exit status, ...)
    pub summary: String,
    /// Completion signal observed for this run, if any
    pub signal: Option<String>,
}

impl WorkSession {
    /// An open session.
    pub fn new(started_at: DateTime<Utc>, summary: impl Into<String>) -> Self {
        Self {
            started_at,
            ended_at: None,
            summary: summary.into(),
            signal: None,
        }
    }

    /// Close the session now with the observed signal.
    pub fn finished(mut self, signal: Option<String>) -> Self {
        self.ended_at = Some(Utc::now());
        self.signal = signal;
        self
    }
}

/// Input for creating an assignment.
#[derive(Debug, Clone)]
pub struct NewAssignment {
    /// Issue being scheduled.
    pub issue_number: u64,
    /// Issue title at scheduling time.
    pub issue_title: String,
    /// Link to the tracker's record.
    pub external_link_id: Option<String>,
    /// Provider whose slot is claimed.
    pub provider: String,
    /// Worktree the agent runs in.
    pub worktree_path: String,
    /// Feature branch the agent commits to.
    pub branch_name: String,
    /// Title carries the phase-master marker.
    pub is_phase_master: bool,
}

/// One issue bound to one agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// Unique identifier
    pub id: Uuid,
    /// Issue number in the tracker
    pub issue_number: u64,
    /// Issue title at scheduling time
    pub issue_title: String,
    /// Link to the tracker's record
    pub external_link_id: Option<String>,
    /// Worker provider (e.g. `claude`)
    pub provider: String,
    /// Occupied instance slot `{provider}-{n}`, if one is held
    pub instance_id: Option<String>,
    /// Dedicated worktree
    pub worktree_path: String,
    /// Feature branch the agent commits to
    pub branch_name: String,
    /// OS process id of the launched agent
    pub process_handle: Option<u32>,
    /// Current status
    pub status: AssignmentStatus,
    /// Coordinates a batch of phase sub-items
    pub is_phase_master: bool,
    /// Creation time
    pub assigned_at: DateTime<Utc>,
    /// First move to `in-progress`
    pub started_at: Option<DateTime<Utc>>,
    /// Last status change or agent output
    pub last_activity_at: DateTime<Utc>,
    /// Reached `dev-complete`
    pub completed_at: Option<DateTime<Utc>>,
    /// Reached `merged`
    pub merged_at: Option<DateTime<Utc>>,
    /// Stage branch commit after a passing review
    pub stage_commit: Option<String>,
    /// Main commit after promotion
    pub main_commit: Option<String>,
    /// Latest persona review
    pub review_result: Option<ReviewResult>,
    /// Agent activity log
    pub work_sessions: Vec<WorkSession>,
    /// How many times the pipeline sent this back
    pub rejection_count: u32,
    /// Reason for the latest rejection
    pub last_rejection: Option<String>,
    /// Version for optimistic locking
    pub version: u64,
}

impl Assignment {
    /// Create a new assignment in `assigned` holding `instance_id`.
    pub fn new(input: NewAssignment, instance_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            issue_number: input.issue_number,
            issue_title: input.issue_title,
            external_link_id: input.external_link_id,
            provider: input.provider,
            instance_id: Some(instance_id.into()),
            worktree_path: input.worktree_path,
            branch_name: input.branch_name,
            process_handle: None,
            status: AssignmentStatus::Assigned,
            is_phase_master: input.is_phase_master,
            assigned_at: now,
            started_at: None,
            last_activity_at: now,
            completed_at: None,
            merged_at: None,
            stage_commit: None,
            main_commit: None,
            review_result: None,
            work_sessions: Vec::new(),
            rejection_count: 0,
            last_rejection: None,
            version: 1,
        }
    }

    /// `#42` style reference used in commit messages and comments.
    pub fn issue_ref(&self) -> String {
        format!("#{}", self.issue_number)
    }

    /// Not yet merged.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Whether this assignment currently occupies its instance slot.
    pub fn occupies_slot(&self) -> bool {
        self.status.occupies_instance() && self.instance_id.is_some()
    }

    /// Phase parsed from the issue title.
    pub fn phase_tag(&self) -> Option<PhaseTag> {
        PhaseTag::parse(&self.issue_title)
    }

    /// Whether `transition_to(new_status)` would succeed.
    pub fn can_transition_to(&self, new_status: AssignmentStatus) -> bool {
        self.status.can_transition_to(new_status)
    }

    /// Transition to a new status along the declared graph.
    pub fn transition_to(&mut self, new_status: AssignmentStatus) -> DomainResult<()> {
        if !self.can_transition_to(new_status) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }
        self.apply_status(new_status);
        Ok(())
    }

    /// Phase propagation: walk the sibling to `target` via `propagation_path`.
    ///
    /// Returns the statuses passed through, in order.
    pub fn propagate_to(&mut self, target: AssignmentStatus) -> DomainResult<Vec<AssignmentStatus>> {
        let path = self
            .status
            .propagation_path(target)
            .ok_or_else(|| DomainError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
            })?;
        for status in &path {
            self.apply_status(*status);
        }
        Ok(path)
    }

    fn apply_status(&mut self, new_status: AssignmentStatus) {
        let now = Utc::now();
        self.status = new_status;
        self.last_activity_at = now;
        self.version += 1;

        match new_status {
            AssignmentStatus::InProgress => {
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            AssignmentStatus::DevComplete => self.completed_at = Some(now),
            AssignmentStatus::Merged => self.merged_at = Some(now),
            _ => {}
        }
    }

    /// Record that the assignment was sent back for rework.
    pub fn note_rejection(&mut self, reason: impl Into<String>) {
        self.rejection_count += 1;
        self.last_rejection = Some(reason.into());
    }

    /// Bump `last_activity_at` without changing status.
    pub fn touch(&mut self) {
        self.last_activity_at = Utc::now();
    }
}
