//! Work Dispatcher
//!
//! Turns open issues into running agents and agent output into status:
//! - `schedule` picks unblocked issues, claims slots and launches agents
//! - `poll` reads agent output and moves assignments forward or back
//!
//! The dispatcher owns the [`ProcessHandle`] of every run it started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Assignment, AssignmentStatus, CompletionSignal, DependencyGraph, Issue, IssueState, NewAssignment, PhaseTag,
    ProcessHandle, RepositoryConfig, WorkSession,
};
use crate::domain::ports::{
    AgentLauncher, IssueTracker, LaunchRequest, RelationshipParser, VersionControl,
};
use crate::services::assignment_registry::AssignmentRegistry;
use crate::services::completion_detector::{CompletionDetector, RunObservation};
use crate::services::dependency_graph::DependencyGraphAnalyzer;

/// Longest work session summary, in characters.
const SUMMARY_MAX_CHARS: usize = 200;

/// Outcome of one `schedule` call, by issue number.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleReport {
    /// Agent started
    pub launched: Vec<u64>,
    /// Already has an active assignment
    pub already_active: Vec<u64>,
    /// Waiting on open dependencies
    pub blocked: Vec<u64>,
    /// Unblocked, but no slot was free
    pub deferred: Vec<u64>,
    /// Assignment or launch failed; requeued when possible
    pub failed: Vec<u64>,
}

/// A status change caused by agent output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollEvent {
    /// Assignment the run belongs to.
    pub assignment_id: Uuid,
    /// Its issue.
    pub issue_number: u64,
    /// Signal that triggered the change.
    pub signal: CompletionSignal,
    /// Status after handling the signal.
    pub status: AssignmentStatus,
}

struct ActiveRun {
    issue_number: u64,
    handle: ProcessHandle,
    lines: Vec<String>,
    last_output: Instant,
    started_at: DateTime<Utc>,
    /// PR signal already acted on
    reported_pr: bool,
}

/// What one poll decided for a run.
enum RunStep {
    Running,
    Signalled {
        signal: CompletionSignal,
        status: AssignmentStatus,
        /// The run is over and can be dropped
        done: bool,
    },
    /// The assignment left `in-progress`/`in-review` without this run,
    /// e.g. through phase propagation.
    Detached(AssignmentStatus),
}

/// Schedules issues onto agent runs and watches those runs.
pub struct WorkDispatcher {
    registry: Arc<AssignmentRegistry>,
    tracker: Arc<dyn IssueTracker>,
    parser: Arc<dyn RelationshipParser>,
    vcs: Arc<dyn VersionControl>,
    launcher: Arc<dyn AgentLauncher>,
    analyzer: DependencyGraphAnalyzer,
    detector: CompletionDetector,
    repository: RepositoryConfig,
    phase_master_marker: String,
    runs: Mutex<HashMap<Uuid, ActiveRun>>,
}

impl WorkDispatcher {
    /// Dispatcher over its collaborators. `phase_master_marker` tags new assignments.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<AssignmentRegistry>,
        tracker: Arc<dyn IssueTracker>,
        parser: Arc<dyn RelationshipParser>,
        vcs: Arc<dyn VersionControl>,
        launcher: Arc<dyn AgentLauncher>,
        detector: CompletionDetector,
        repository: RepositoryConfig,
        phase_master_marker: String,
    ) -> Self {
        Self {
            registry,
            tracker,
            parser,
            vcs,
            launcher,
            analyzer: DependencyGraphAnalyzer::new(),
            detector,
            repository,
            phase_master_marker,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Number of runs being watched.
    pub async fn active_runs(&self) -> usize {
        self.runs.lock().await.len()
    }

    /// Attach parsed relationships to each issue.
    pub fn parse_relationships(&self, issues: &mut [Issue]) {
        for issue in issues.iter_mut() {
            let parsed = self.parser.parse(issue.number, &issue.body);
            for line in &parsed.malformed {
                warn!(issue = issue.number, line = %line, "unreadable relationship reference");
            }
            for reference in parsed.references {
                if !issue.relationships.contains(&reference) {
                    issue.relationships.push(reference);
                }
            }
        }
    }

    /// Launch agents for unblocked issues, highest priority first, until the
    /// provider runs out of slots.
    #[instrument(skip(self, issues), fields(provider = %provider, issues = issues.len()))]
    pub async fn schedule(&self, mut issues: Vec<Issue>, provider: &str) -> DomainResult<ScheduleReport> {
        self.registry.allocator().max_slots(provider)?;
        self.parse_relationships(&mut issues);

        let graph = self.analyzer.build_graph(&issues);
        let validation = self.analyzer.validate_graph(&graph);
        for err in &validation.errors {
            warn!(error = %err, "dependency graph error");
        }
        for warning in &validation.warnings {
            debug!(warning = %warning, "dependency graph warning");
        }

        let statuses = self.issue_statuses(&issues, &graph).await;
        let unblocked = self.analyzer.get_unblocked_issues(&graph, &statuses);
        let ordered = self.analyzer.prioritize(&graph, &unblocked);
        let by_number: HashMap<u64, &Issue> = issues.iter().map(|i| (i.number, i)).collect();

        let mut report = ScheduleReport {
            blocked: issues
                .iter()
                .filter(|i| i.is_open() && !unblocked.contains(&i.number))
                .map(|i| i.number)
                .collect(),
            ..Default::default()
        };

        let mut exhausted = false;
        for number in ordered {
            let Some(issue) = by_number.get(&number) else {
                continue;
            };
            if exhausted {
                report.deferred.push(number);
                continue;
            }

            let assignment = match self.assignment_for(issue, provider).await {
                Ok(Some(a)) => a,
                Ok(None) => {
                    report.already_active.push(number);
                    continue;
                }
                Err(DomainError::ResourceExhausted { .. }) => {
                    info!(issue = number, "no free slot, deferring remaining issues");
                    exhausted = true;
                    report.deferred.push(number);
                    continue;
                }
                Err(e) => {
                    warn!(issue = number, error = %e, "could not create assignment");
                    report.failed.push(number);
                    continue;
                }
            };

            match self.launch(&assignment, issue).await {
                Ok(()) => report.launched.push(number),
                Err(e) => {
                    let reason = DomainError::ProcessError(e.to_string()).to_string();
                    warn!(issue = number, error = %reason, "agent launch failed");
                    if let Err(e) = self.registry.reject(assignment.id, &reason).await {
                        warn!(issue = number, error = %e, "failed to reject after launch failure");
                    }
                    report.failed.push(number);
                }
            }
        }

        info!(
            launched = report.launched.len(),
            blocked = report.blocked.len(),
            deferred = report.deferred.len(),
            "scheduling finished"
        );
        Ok(report)
    }

    /// Issue states for the batch plus any dependency outside it.
    async fn issue_statuses(
        &self,
        issues: &[Issue],
        graph: &DependencyGraph,
    ) -> HashMap<u64, IssueState> {
        let mut statuses: HashMap<u64, IssueState> = issues.iter().map(|i| (i.number, i.state)).collect();
        let outside: Vec<u64> = graph
            .nodes
            .values()
            .flat_map(|n| n.depends_on.iter().copied())
            .filter(|d| !statuses.contains_key(d))
            .collect();
        for number in outside {
            if statuses.contains_key(&number) {
                continue;
            }
            match self.tracker.get_issue(number).await {
                Ok(issue) => {
                    statuses.insert(number, issue.state);
                }
                Err(e) => debug!(issue = number, error = %e, "dependency state unknown"),
            }
        }
        statuses
    }

    /// New assignment, a re-claimed rejected one, or `None` when already running.
    async fn assignment_for(&self, issue: &Issue, provider: &str) -> DomainResult<Option<Assignment>> {
        if let Some(existing) = self.registry.get_by_issue(issue.number).await? {
            let requeued = existing.status == AssignmentStatus::Assigned
                && existing.instance_id.is_none()
                && !self.runs.lock().await.contains_key(&existing.id);
            if !requeued {
                return Ok(None);
            }
            return self.registry.reclaim_slot(existing.id).await.map(Some);
        }

        let assignment = self
            .registry
            .create_assignment(NewAssignment {
                issue_number: issue.number,
                issue_title: issue.title.clone(),
                external_link_id: issue.url.clone(),
                provider: provider.to_string(),
                worktree_path: self.repository.worktree_for_issue(issue.number),
                branch_name: self.repository.branch_for_issue(issue.number),
                is_phase_master: PhaseTag::is_master_title(&issue.title, &self.phase_master_marker),
            })
            .await?;
        Ok(Some(assignment))
    }

    async fn launch(&self, assignment: &Assignment, issue: &Issue) -> DomainResult<()> {
        let worktree = PathBuf::from(&assignment.worktree_path);
        self.vcs
            .add_worktree(&worktree, &assignment.branch_name, &self.repository.main_branch)
            .await?;

        let request = LaunchRequest {
            issue_number: issue.number,
            issue_title: issue.title.clone(),
            prompt: build_agent_prompt(issue, assignment),
            worktree_path: worktree,
            instance_id: assignment.instance_id.clone().unwrap_or_default(),
        };
        let handle = self.launcher.launch(&request).await?;
        let pid = handle.pid();
        self.registry.mark_in_progress(assignment.id, Some(pid)).await?;

        self.runs.lock().await.insert(
            assignment.id,
            ActiveRun {
                issue_number: issue.number,
                handle,
                lines: Vec::new(),
                last_output: Instant::now(),
                started_at: Utc::now(),
                reported_pr: false,
            },
        );
        info!(issue = issue.number, pid, "agent launched");
        Ok(())
    }

    /// Read agent output and act on completion signals.
    ///
    /// Each run is handled on its own: an error on one run is logged and the
    /// rest are still processed. Runs whose assignment has moved past
    /// `in-progress`/`in-review` without them are stopped and dropped.
    #[instrument(skip(self))]
    pub async fn poll(&self) -> DomainResult<Vec<PollEvent>> {
        let mut runs = self.runs.lock().await;
        let mut events = Vec::new();
        let mut finished: Vec<(Uuid, Option<CompletionSignal>)> = Vec::new();

        for (id, run) in runs.iter_mut() {
            let new_lines = run.handle.drain_logs();
            if !new_lines.is_empty() {
                run.last_output = Instant::now();
                run.lines.extend(new_lines);
                if let Err(e) = self.registry.touch_activity(*id).await {
                    warn!(assignment_id = %id, error = %e, "failed to record activity");
                }
            }

            match self.step_run(*id, run).await {
                Ok(RunStep::Running) => {}
                Ok(RunStep::Detached(status)) => {
                    run.handle.terminate();
                    info!(
                        issue = run.issue_number,
                        status = %status,
                        "assignment moved on without its agent, stopping run"
                    );
                    finished.push((*id, None));
                }
                Ok(RunStep::Signalled { signal, status, done }) => {
                    info!(issue = run.issue_number, signal = %signal, status = %status, "agent signal handled");
                    if done {
                        finished.push((*id, Some(signal.clone())));
                    }
                    events.push(PollEvent {
                        assignment_id: *id,
                        issue_number: run.issue_number,
                        signal,
                        status,
                    });
                }
                Err(e) => {
                    warn!(issue = run.issue_number, error = %e, "failed to handle agent run");
                    if !run.handle.is_running() {
                        finished.push((*id, None));
                    }
                }
            }
        }

        for (id, signal) in finished {
            if let Some(run) = runs.remove(&id) {
                let session = WorkSession::new(run.started_at, summarize(&run.lines))
                    .finished(signal.map(|s| s.to_string()));
                if let Err(e) = self.registry.add_work_session(id, session).await {
                    warn!(assignment_id = %id, error = %e, "failed to record work session");
                }
            }
        }
        Ok(events)
    }

    async fn step_run(&self, id: Uuid, run: &mut ActiveRun) -> DomainResult<RunStep> {
        let current = self.registry.get(id).await?.status;
        if !matches!(current, AssignmentStatus::InProgress | AssignmentStatus::InReview) {
            return Ok(RunStep::Detached(current));
        }

        let state = run.handle.state();
        let observation = RunObservation {
            lines: &run.lines,
            state,
            idle_for: run.last_output.elapsed(),
        };
        let Some(signal) = self.detector.evaluate(&observation) else {
            return Ok(RunStep::Running);
        };

        let (status, done) = match &signal {
            CompletionSignal::PullRequestCreated(_) if state.is_running() => {
                if run.reported_pr {
                    return Ok(RunStep::Running);
                }
                let status = self.registry.mark_in_review(id).await?.status;
                run.reported_pr = true;
                (status, false)
            }
            CompletionSignal::PullRequestCreated(_) | CompletionSignal::Complete => {
                if run.handle.is_running() {
                    run.handle.terminate();
                }
                (self.registry.mark_dev_complete(id).await?.status, true)
            }
            CompletionSignal::Blocked(reason) | CompletionSignal::Failed(reason) => {
                run.handle.terminate();
                let comment = format!(
                    "## Agent stopped on #{}\n\n{signal}\n\nThe assignment has been returned to the queue.\n",
                    run.issue_number
                );
                if let Err(e) = self.tracker.post_comment(run.issue_number, &comment).await {
                    warn!(issue = run.issue_number, error = %e, "failed to post agent failure comment");
                }
                (self.registry.reject(id, reason).await?.status, true)
            }
        };
        Ok(RunStep::Signalled { signal, status, done })
    }

    /// Stop an agent run. Returns false when no run is known for the assignment.
    pub async fn terminate(&self, assignment_id: Uuid) -> bool {
        match self.runs.lock().await.get_mut(&assignment_id) {
            Some(run) => run.handle.terminate(),
            None => false,
        }
    }

    /// Ask every running agent to stop. Returns how many were signalled.
    pub async fn terminate_all(&self) -> usize {
        let mut runs = self.runs.lock().await;
        runs.values_mut()
            .map(|run| run.handle.terminate())
            .filter(|stopped| *stopped)
            .count()
    }
}

fn summarize(lines: &[String]) -> String {
    let last = lines
        .iter()
        .rev()
        .map(|l| l.trim())
        .find(|l| !l.is_empty())
        .unwrap_or("");
    last.chars().take(SUMMARY_MAX_CHARS).collect()
}

fn build_agent_prompt(issue: &Issue, assignment: &Assignment) -> String {
    let rework = assignment
        .last_rejection
        .as_deref()
        .map(|r| format!("\n## Previous attempt was rejected\n\n{r}\n"))
        .unwrap_or_default();
    format!(
        "# Issue #{number}: {title}\n\n{body}\n{rework}\n\
         ## Working agreement\n\n\
         - You are on branch `{branch}` in a dedicated worktree. Commit your work there.\n\
         - When the work is done, print `[[FOREMAN:COMPLETE]]` on its own line.\n\
         - If you opened a pull request, print `[[FOREMAN:PR_CREATED]] #<number>`.\n\
         - If you cannot continue, print `[[FOREMAN:BLOCKED]] <reason>`.\n\
         - If the task cannot be done, print `[[FOREMAN:FAILED]] <reason>`.\n",
        number = issue.number,
        title = issue.title,
        body = issue.body,
        branch = assignment.branch_name,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_uses_last_non_empty_line() {
        let lines = vec!["first".to_string(), "done with it".to_string(), "  ".to_string()];
        assert_eq!(summarize(&lines), "done with it");
        assert_eq!(summarize(&[]), "");
    }

    #[test]
    fn test_prompt_includes_markers_and_rejection() {
        let issue = Issue::new(3, "Add retries").with_body("Retry failed uploads.");
        let mut assignment = Assignment::new(
            NewAssignment {
                issue_number: 3,
                issue_title: issue.title.clone(),
                external_link_id: None,
                provider: "claude".to_string(),
                worktree_path: "/tmp/issue-3".to_string(),
                branch_name: "foreman/issue-3".to_string(),
                is_phase_master: false,
            },
            "claude-1",
        );
        assignment.note_rejection("qa-engineer: no tests");
        let prompt = build_agent_prompt(&issue, &assignment);
        assert!(prompt.contains("[[FOREMAN:COMPLETE]]"));
        assert!(prompt.contains("foreman/issue-3"));
        assert!(prompt.contains("qa-engineer: no tests"));
    }
}
