//! Work dispatcher against a mock launcher and a real git repository.

mod helpers;

use std::sync::Arc;
use std::time::Duration;

use foreman::adapters::git::GitCli;
use foreman::adapters::memory::InMemoryIssueTracker;
use foreman::adapters::mock::MockAgentLauncher;
use foreman::domain::models::{AssignmentStatus, CompletionSignal, Issue, IssueState, RepositoryConfig};
use foreman::services::{AssignmentRegistry, CompletionDetector, RegexRelationshipParser, WorkDispatcher};
use helpers::git::GitFixture;
use helpers::pipeline::{registry, PROVIDER};

struct Harness {
    git: GitFixture,
    tracker: Arc<InMemoryIssueTracker>,
    registry: Arc<AssignmentRegistry>,
    launcher: Arc<MockAgentLauncher>,
    dispatcher: WorkDispatcher,
}

fn harness(slots: u32) -> Harness {
    let git = GitFixture::new();
    let tracker = Arc::new(InMemoryIssueTracker::new());
    let registry = registry(tracker.clone(), slots);
    let launcher = Arc::new(MockAgentLauncher::new());
    let repository = RepositoryConfig {
        path: git.repo.to_string_lossy().to_string(),
        ..RepositoryConfig::default()
    };
    let dispatcher = WorkDispatcher::new(
        registry.clone(),
        tracker.clone(),
        Arc::new(RegexRelationshipParser::new()),
        Arc::new(GitCli::new(&git.repo)),
        launcher.clone(),
        // Heuristics never kick in while a run is alive.
        CompletionDetector::new(10, Duration::from_secs(3600)),
        repository,
        "MASTER".to_string(),
    );
    Harness {
        git,
        tracker,
        registry,
        launcher,
        dispatcher,
    }
}

impl Harness {
    async fn status(&self, issue: u64) -> AssignmentStatus {
        self.registry
            .get_by_issue(issue)
            .await
            .unwrap()
            .expect("assignment exists")
            .status
    }
}

// ============================================================================
// Scheduling
// ============================================================================

#[tokio::test]
async fn test_schedule_launches_agent_in_worktree() {
    let h = harness(2);
    let issues = vec![Issue::new(1, "Add cache").with_body("Cache the lookups.")];

    let report = h.dispatcher.schedule(issues, PROVIDER).await.unwrap();
    assert_eq!(report.launched, vec![1]);
    assert_eq!(h.dispatcher.active_runs().await, 1);

    let launches = h.launcher.launches().await;
    assert_eq!(launches.len(), 1);
    assert_eq!(launches[0].issue_number, 1);
    assert_eq!(launches[0].instance_id, "claude-1");
    assert!(launches[0].prompt.contains("Cache the lookups."));
    assert!(launches[0].prompt.contains("[[FOREMAN:COMPLETE]]"));

    let assignment = h.registry.get_by_issue(1).await.unwrap().unwrap();
    assert_eq!(assignment.status, AssignmentStatus::InProgress);
    assert_eq!(assignment.process_handle, Some(10_000));
    assert_eq!(assignment.branch_name, "foreman/issue-1");
    assert!(h.git.branch_exists("foreman/issue-1"));
    assert!(h.git.repo.join(&assignment.worktree_path).join("README.md").exists());
    assert_eq!(
        h.tracker.fields(1).await.get("status").cloned().flatten().as_deref(),
        Some("in-progress")
    );
}

#[tokio::test]
async fn test_schedule_skips_active_and_defers_when_full() {
    let h = harness(1);
    let issues = vec![Issue::new(1, "One"), Issue::new(2, "Two"), Issue::new(3, "Three")];

    let report = h.dispatcher.schedule(issues.clone(), PROVIDER).await.unwrap();
    assert_eq!(report.launched.len(), 1);
    assert_eq!(report.deferred.len(), 2);

    let again = h.dispatcher.schedule(issues, PROVIDER).await.unwrap();
    assert!(again.launched.is_empty());
    assert_eq!(again.already_active, report.launched);
    assert_eq!(h.launcher.launches().await.len(), 1);
}

#[tokio::test]
async fn test_schedule_respects_dependencies() {
    let h = harness(3);
    h.tracker
        .insert_issue(Issue::new(5, "Old groundwork").with_state(IssueState::Closed))
        .await;
    let issues = vec![
        Issue::new(1, "Schema"),
        Issue::new(2, "Queries").with_body("Blocked by #1"),
        Issue::new(3, "Docs").with_body("Depends on #5"),
    ];

    let report = h.dispatcher.schedule(issues, PROVIDER).await.unwrap();
    let mut launched = report.launched.clone();
    launched.sort_unstable();
    assert_eq!(launched, vec![1, 3], "closed out-of-batch dependency unblocks #3");
    assert_eq!(report.blocked, vec![2]);
    assert!(h.registry.get_by_issue(2).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_provider_is_rejected() {
    let h = harness(1);
    assert!(h
        .dispatcher
        .schedule(vec![Issue::new(1, "One")], "nonexistent")
        .await
        .is_err());
}

#[tokio::test]
async fn test_launch_failure_rejects_and_requeues() {
    let h = harness(1);
    h.launcher.fail_launches(true);

    let report = h.dispatcher.schedule(vec![Issue::new(7, "Seven")], PROVIDER).await.unwrap();
    assert_eq!(report.failed, vec![7]);
    let assignment = h.registry.get_by_issue(7).await.unwrap().unwrap();
    assert_eq!(assignment.status, AssignmentStatus::Assigned);
    assert_eq!(assignment.instance_id, None);
    assert_eq!(assignment.rejection_count, 1);
    assert!(!h.registry.holds_claim(assignment.id).await);

    h.launcher.fail_launches(false);
    let retry = h.dispatcher.schedule(vec![Issue::new(7, "Seven")], PROVIDER).await.unwrap();
    assert_eq!(retry.launched, vec![7]);
    let launches = h.launcher.launches().await;
    assert!(launches[0].prompt.contains("Previous attempt was rejected"));
    assert_eq!(h.status(7).await, AssignmentStatus::InProgress);
}

// ============================================================================
// Polling
// ============================================================================

#[tokio::test]
async fn test_complete_marker_moves_to_dev_complete() {
    let h = harness(1);
    h.dispatcher.schedule(vec![Issue::new(1, "One")], PROVIDER).await.unwrap();

    assert!(h.dispatcher.poll().await.unwrap().is_empty(), "no output yet");

    assert!(h.launcher.emit(1, "Writing tests").await);
    assert!(h.launcher.emit(1, "[[FOREMAN:COMPLETE]]").await);
    let events = h.dispatcher.poll().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].signal, CompletionSignal::Complete);
    assert_eq!(events[0].status, AssignmentStatus::DevComplete);
    assert_eq!(h.dispatcher.active_runs().await, 0);

    let assignment = h.registry.get_by_issue(1).await.unwrap().unwrap();
    assert_eq!(assignment.status, AssignmentStatus::DevComplete);
    assert_eq!(assignment.process_handle, None);
    assert_eq!(assignment.work_sessions.len(), 1);
    assert_eq!(assignment.work_sessions[0].summary, "[[FOREMAN:COMPLETE]]");
    assert_eq!(assignment.work_sessions[0].signal.as_deref(), Some("complete"));
    assert!(h.registry.holds_claim(assignment.id).await, "slot kept until merge");
}

#[tokio::test]
async fn test_blocked_marker_terminates_and_rejects() {
    let h = harness(1);
    h.dispatcher.schedule(vec![Issue::new(3, "Three")], PROVIDER).await.unwrap();
    h.launcher.emit(3, "[[FOREMAN:BLOCKED]] need database credentials").await;

    let events = h.dispatcher.poll().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].signal,
        CompletionSignal::Blocked("need database credentials".to_string())
    );
    assert_eq!(events[0].status, AssignmentStatus::Assigned);
    assert!(h.launcher.was_terminated(3).await);

    let assignment = h.registry.get_by_issue(3).await.unwrap().unwrap();
    assert_eq!(assignment.last_rejection.as_deref(), Some("need database credentials"));
    let comments = h.tracker.comments(3).await;
    assert_eq!(comments.len(), 1);
    assert!(comments[0].contains("blocked: need database credentials"));
}

#[tokio::test]
async fn test_pull_request_while_running_then_exit() {
    let h = harness(1);
    h.dispatcher.schedule(vec![Issue::new(4, "Four")], PROVIDER).await.unwrap();
    h.launcher.emit(4, "[[FOREMAN:PR_CREATED]] #88").await;

    let events = h.dispatcher.poll().await.unwrap();
    assert_eq!(events[0].status, AssignmentStatus::InReview);
    assert!(h.dispatcher.poll().await.unwrap().is_empty(), "pull request reported once");
    assert!(!h.launcher.was_terminated(4).await);

    h.launcher.exit(4, Some(0)).await;
    let events = h.dispatcher.poll().await.unwrap();
    assert_eq!(events[0].signal, CompletionSignal::PullRequestCreated(88));
    assert_eq!(events[0].status, AssignmentStatus::DevComplete);
    assert_eq!(h.status(4).await, AssignmentStatus::DevComplete);
}

#[tokio::test]
async fn test_non_zero_exit_fails_run() {
    let h = harness(1);
    h.dispatcher.schedule(vec![Issue::new(6, "Six")], PROVIDER).await.unwrap();
    h.launcher.exit(6, Some(3)).await;

    let events = h.dispatcher.poll().await.unwrap();
    assert!(matches!(&events[0].signal, CompletionSignal::Failed(r) if r.contains("status 3")));
    assert_eq!(h.status(6).await, AssignmentStatus::Assigned);
    assert_eq!(h.dispatcher.active_runs().await, 0);
}

#[tokio::test]
async fn test_terminate_all_signals_every_run() {
    let h = harness(2);
    h.dispatcher
        .schedule(vec![Issue::new(1, "One"), Issue::new(2, "Two")], PROVIDER)
        .await
        .unwrap();

    assert_eq!(h.dispatcher.terminate_all().await, 2);
    assert!(h.launcher.was_terminated(1).await);
    assert!(h.launcher.was_terminated(2).await);

    let events = h.dispatcher.poll().await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.status == AssignmentStatus::Assigned));
    assert_eq!(h.dispatcher.active_runs().await, 0);
}

#[tokio::test]
async fn test_poll_stops_runs_of_propagated_siblings_and_handles_the_rest() {
    let h = harness(2);
    h.dispatcher
        .schedule(
            vec![Issue::new(1, "Phase 3.1: parser"), Issue::new(2, "Phase 3.2: lexer")],
            PROVIDER,
        )
        .await
        .unwrap();
    let synced = h.registry.get_by_issue(1).await.unwrap().unwrap();
    h.registry
        .propagate_status(synced.id, AssignmentStatus::StageReady)
        .await
        .unwrap();

    h.launcher.emit(1, "[[FOREMAN:BLOCKED]] waiting on review").await;
    h.launcher.emit(2, "[[FOREMAN:COMPLETE]]").await;

    let events = h.dispatcher.poll().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].issue_number, 2);
    assert_eq!(events[0].status, AssignmentStatus::DevComplete);
    assert_eq!(h.dispatcher.active_runs().await, 0);

    assert!(h.launcher.was_terminated(1).await);
    let synced = h.registry.get(synced.id).await.unwrap();
    assert_eq!(synced.status, AssignmentStatus::StageReady, "stage-ready work is never requeued");
    assert_eq!(synced.rejection_count, 0);
    assert_eq!(synced.work_sessions.len(), 1);
    assert!(h.tracker.comments(1).await.is_empty());
    assert_eq!(h.status(2).await, AssignmentStatus::DevComplete);

    assert!(h.dispatcher.poll().await.unwrap().is_empty());
}
