//! In-memory registry and pipeline wiring over a real git fixture.

use std::sync::Arc;

use foreman::adapters::git::GitCli;
use foreman::adapters::memory::{InMemoryAssignmentRepository, InMemoryIssueTracker};
use foreman::adapters::mock::{MockAgentRunner, ScriptedReviewer};
use foreman::domain::models::{
    Assignment, FieldSchema, NewAssignment, PipelineConfig, ProviderConfig, ReviewPolicy,
};
use foreman::domain::ports::PersonaReviewer;
use foreman::services::persona_review::persona_set;
use foreman::services::{
    AssignmentRegistry, ConflictResolutionService, InstanceSlotAllocator, IntegrationPipeline,
    PersonaReviewGate, StageBranchConfig, StageBranchController,
};

use super::git::GitFixture;

pub const PROVIDER: &str = "claude";

pub fn registry(tracker: Arc<InMemoryIssueTracker>, slots: u32) -> Arc<AssignmentRegistry> {
    let allocator = InstanceSlotAllocator::new(&[ProviderConfig {
        name: PROVIDER.to_string(),
        max_concurrent_issues: slots,
    }]);
    Arc::new(AssignmentRegistry::new(
        Arc::new(InMemoryAssignmentRepository::new()),
        tracker,
        allocator,
        FieldSchema::new("status", "instance"),
    ))
}

pub fn stage_config(with_remote: bool) -> StageBranchConfig {
    StageBranchConfig {
        remote: with_remote.then(|| "origin".to_string()),
        ..StageBranchConfig::default()
    }
}

pub struct PipelineParts {
    pub reviewer: Arc<ScriptedReviewer>,
    pub agent: Arc<MockAgentRunner>,
    pub config: PipelineConfig,
    pub with_remote: bool,
}

impl Default for PipelineParts {
    fn default() -> Self {
        Self {
            reviewer: Arc::new(ScriptedReviewer::new()),
            agent: Arc::new(MockAgentRunner::default()),
            config: PipelineConfig {
                auto_resolve_conflicts: false,
                ..PipelineConfig::default()
            },
            with_remote: false,
        }
    }
}

pub fn pipeline(
    git: &GitFixture,
    registry: Arc<AssignmentRegistry>,
    tracker: Arc<InMemoryIssueTracker>,
    parts: &PipelineParts,
) -> IntegrationPipeline {
    pipeline_with_reviewer(git, registry, tracker, parts, parts.reviewer.clone())
}

/// Like [`pipeline`], with a reviewer other than the scripted one.
pub fn pipeline_with_reviewer(
    git: &GitFixture,
    registry: Arc<AssignmentRegistry>,
    tracker: Arc<InMemoryIssueTracker>,
    parts: &PipelineParts,
    reviewer: Arc<dyn PersonaReviewer>,
) -> IntegrationPipeline {
    let vcs = Arc::new(GitCli::new(&git.repo));
    let stage = StageBranchController::new(vcs.clone(), stage_config(parts.with_remote))
        .expect("valid branch config");
    let resolver = ConflictResolutionService::new(parts.agent.clone(), vcs);
    let gate = PersonaReviewGate::new(
        reviewer,
        persona_set("minimal").expect("minimal persona set"),
        ReviewPolicy::RequireAll,
    );
    IntegrationPipeline::new(registry, stage, resolver, gate, tracker, parts.config.clone())
}

pub fn new_assignment(issue: u64, title: &str) -> NewAssignment {
    NewAssignment {
        issue_number: issue,
        issue_title: title.to_string(),
        external_link_id: None,
        provider: PROVIDER.to_string(),
        worktree_path: format!(".foreman/worktrees/issue-{issue}"),
        branch_name: format!("foreman/issue-{issue}"),
        is_phase_master: false,
    }
}

/// Create an assignment and walk it to `dev-complete`.
pub async fn dev_complete(registry: &AssignmentRegistry, issue: u64, title: &str) -> Assignment {
    let assignment = registry
        .create_assignment(new_assignment(issue, title))
        .await
        .expect("create assignment");
    registry
        .mark_in_progress(assignment.id, Some(4242))
        .await
        .expect("mark in progress");
    registry
        .mark_dev_complete(assignment.id)
        .await
        .expect("mark dev complete")
}
