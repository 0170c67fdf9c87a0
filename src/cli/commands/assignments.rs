//! `foreman assignments`: inspect persisted assignments.

use anyhow::{anyhow, Result};
use clap::{Args, Subcommand};
use serde::Serialize;
use uuid::Uuid;

use crate::cli::context::AppContext;
use crate::cli::output::{colorize_status, list_table, output, render_list, truncate, CommandOutput};
use crate::domain::models::{Assignment, AssignmentStatus, Config};

#[derive(Args, Debug)]
pub struct AssignmentsArgs {
    #[command(subcommand)]
    pub command: AssignmentsCommands,
}

#[derive(Subcommand, Debug)]
pub enum AssignmentsCommands {
    /// List assignments
    List {
        /// Filter by status (assigned, in-progress, dev-complete, ...)
        #[arg(short, long)]
        status: Option<String>,
        /// Include merged assignments
        #[arg(long)]
        all: bool,
    },
    /// Show one assignment by issue number or assignment ID
    Show {
        /// Issue number or assignment UUID
        id: String,
    },
}

#[derive(Debug, Serialize)]
pub struct AssignmentListOutput {
    pub assignments: Vec<Assignment>,
    pub total: usize,
}

impl CommandOutput for AssignmentListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["issue", "status", "instance", "branch", "title"]);
        for a in &self.assignments {
            table.add_row(vec![
                format!("#{}", a.issue_number),
                colorize_status(a.status.as_str()).to_string(),
                a.instance_id.clone().unwrap_or_else(|| "-".to_string()),
                a.branch_name.clone(),
                truncate(&a.issue_title, 40),
            ]);
        }
        render_list("assignment", &table, self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct AssignmentDetailOutput {
    pub assignment: Assignment,
}

impl CommandOutput for AssignmentDetailOutput {
    fn to_human(&self) -> String {
        let a = &self.assignment;
        let mut lines = vec![
            format!("Assignment: {}", a.id),
            format!("Issue: #{} {}", a.issue_number, a.issue_title),
            format!("Status: {}", colorize_status(a.status.as_str())),
            format!("Provider: {}", a.provider),
            format!("Instance: {}", a.instance_id.as_deref().unwrap_or("-")),
            format!("Branch: {}", a.branch_name),
            format!("Worktree: {}", a.worktree_path),
            format!("Assigned: {}", a.assigned_at.to_rfc3339()),
            format!("Last activity: {}", a.last_activity_at.to_rfc3339()),
        ];
        if a.is_phase_master {
            lines.push("Phase master: yes".to_string());
        }
        if let Some(pid) = a.process_handle {
            lines.push(format!("Process: {pid}"));
        }
        if let Some(commit) = &a.stage_commit {
            lines.push(format!("Stage commit: {commit}"));
        }
        if let Some(commit) = &a.main_commit {
            lines.push(format!("Main commit: {commit}"));
        }
        if a.rejection_count > 0 {
            lines.push(format!("Rejections: {}", a.rejection_count));
            if let Some(reason) = &a.last_rejection {
                lines.push(format!("Last rejection: {}", truncate(reason, 200)));
            }
        }
        if let Some(review) = &a.review_result {
            lines.push(format!(
                "Review: {}",
                if review.overall_passed { "passed" } else { "failed" }
            ));
            for verdict in &review.verdicts {
                lines.push(format!(
                    "  {} {}",
                    if verdict.passed { "PASS" } else { "FAIL" },
                    verdict.persona
                ));
            }
        }
        if !a.work_sessions.is_empty() {
            lines.push(format!("Work sessions: {}", a.work_sessions.len()));
            for session in &a.work_sessions {
                lines.push(format!(
                    "  {} [{}] {}",
                    session.started_at.to_rfc3339(),
                    session.signal.as_deref().unwrap_or("-"),
                    truncate(&session.summary, 80)
                ));
            }
        }
        lines.join("\n")
    }
}

/// Select assignments for `list`. Merged ones are hidden unless asked for.
pub fn filter_assignments(
    assignments: Vec<Assignment>,
    status: Option<AssignmentStatus>,
    include_merged: bool,
) -> Vec<Assignment> {
    assignments
        .into_iter()
        .filter(|a| match status {
            Some(s) => a.status == s,
            None => include_merged || !a.status.is_terminal(),
        })
        .collect()
}

/// Find by UUID, or by issue number preferring the active assignment.
pub fn find_assignment(assignments: &[Assignment], id: &str) -> Option<Assignment> {
    let id = id.trim_start_matches('#');
    if let Ok(uuid) = Uuid::parse_str(id) {
        return assignments.iter().find(|a| a.id == uuid).cloned();
    }
    let issue: u64 = id.parse().ok()?;
    let mut matching: Vec<&Assignment> = assignments.iter().filter(|a| a.issue_number == issue).collect();
    matching.sort_by_key(|a| (!a.status.is_terminal(), a.assigned_at));
    matching.last().map(|a| (*a).clone())
}

pub async fn execute(args: AssignmentsArgs, config: Config, json_mode: bool) -> Result<()> {
    let context = AppContext::open(config).await?;
    let assignments = context.repository.list_all().await?;

    match args.command {
        AssignmentsCommands::List { status, all } => {
            let status = status
                .map(|s| AssignmentStatus::from_str(&s).ok_or_else(|| anyhow!("Invalid status: {s}")))
                .transpose()?;
            let assignments = filter_assignments(assignments, status, all);
            let out = AssignmentListOutput {
                total: assignments.len(),
                assignments,
            };
            output(&out, json_mode);
        }
        AssignmentsCommands::Show { id } => {
            let assignment =
                find_assignment(&assignments, &id).ok_or_else(|| anyhow!("Assignment not found: {id}"))?;
            output(&AssignmentDetailOutput { assignment }, json_mode);
        }
    }
    Ok(())
}
