//! `foreman dispatch`: launch agents for unblocked issues and follow them.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::cli::commands::merge::BatchOutput;
use crate::cli::context::AppContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{AssignmentStatus, Config};
use crate::domain::ports::IssueTracker;
use crate::services::{IntegrationPipeline, PollEvent, ScheduleReport, WorkDispatcher};

/// Longest wait for interrupted agents to report their exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

#[derive(Args, Debug)]
pub struct DispatchArgs {
    /// Provider to run agents on (defaults to the first configured)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Keep rescheduling open issues until interrupted
    #[arg(short, long)]
    pub watch: bool,

    /// Seconds between polls of agent output
    #[arg(long, default_value = "10")]
    pub interval: u64,

    /// Run an integration batch whenever an agent finishes
    #[arg(long)]
    pub merge: bool,
}

#[derive(Debug, Serialize)]
pub struct ScheduleOutput {
    pub provider: String,
    #[serde(flatten)]
    pub report: ScheduleReport,
}

fn issues(numbers: &[u64]) -> String {
    if numbers.is_empty() {
        return "-".to_string();
    }
    numbers.iter().map(|n| format!("#{n}")).collect::<Vec<_>>().join(", ")
}

impl CommandOutput for ScheduleOutput {
    fn to_human(&self) -> String {
        let r = &self.report;
        [
            format!("Scheduled on {}:", self.provider),
            format!("  Launched:       {}", issues(&r.launched)),
            format!("  Already active: {}", issues(&r.already_active)),
            format!("  Blocked:        {}", issues(&r.blocked)),
            format!("  Deferred:       {}", issues(&r.deferred)),
            format!("  Failed:         {}", issues(&r.failed)),
        ]
        .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PollOutput {
    pub events: Vec<PollEvent>,
}

impl CommandOutput for PollOutput {
    fn to_human(&self) -> String {
        self.events
            .iter()
            .map(|e| format!("#{} {} -> {}", e.issue_number, e.signal, e.status))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Schedule open issues. With `quiet`, only reports that launched something are printed.
async fn schedule(
    dispatcher: &WorkDispatcher,
    tracker: &dyn IssueTracker,
    provider: &str,
    quiet: bool,
    json_mode: bool,
) -> Result<()> {
    let open = tracker.list_open_issues().await.context("Failed to list open issues")?;
    let report = dispatcher.schedule(open, provider).await?;
    if !quiet || !report.launched.is_empty() {
        output(
            &ScheduleOutput {
                provider: provider.to_string(),
                report,
            },
            json_mode,
        );
    }
    Ok(())
}

async fn poll(
    dispatcher: &WorkDispatcher,
    pipeline: Option<&IntegrationPipeline>,
    json_mode: bool,
) -> Result<()> {
    let events = dispatcher.poll().await?;
    if events.is_empty() {
        return Ok(());
    }
    let finished = events.iter().any(|e| e.status == AssignmentStatus::DevComplete);
    output(&PollOutput { events }, json_mode);

    if let (true, Some(pipeline)) = (finished, pipeline) {
        let batch = pipeline.run_batch().await.context("Integration batch failed")?;
        output(&BatchOutput { batch }, json_mode);
    }
    Ok(())
}

async fn shutdown(dispatcher: &WorkDispatcher, json_mode: bool) -> Result<()> {
    let stopped = dispatcher.terminate_all().await;
    info!(stopped, "interrupted, stopping agents");
    let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
    while dispatcher.active_runs().await > 0 {
        if tokio::time::Instant::now() >= deadline {
            warn!(remaining = dispatcher.active_runs().await, "agents did not stop in time");
            break;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
        poll(dispatcher, None, json_mode).await?;
    }
    Ok(())
}

pub async fn execute(args: DispatchArgs, config: Config, json_mode: bool) -> Result<()> {
    let context = AppContext::open(config).await?;
    let provider = context.provider(args.provider.as_deref())?;
    let tracker = context.tracker()?;
    let registry = context.registry(tracker.clone()).await?;
    let dispatcher = context.dispatcher(registry.clone(), tracker.clone());
    let pipeline = if args.merge {
        Some(context.pipeline(registry, tracker.clone())?)
    } else {
        None
    };
    let interval = Duration::from_secs(args.interval.max(1));

    schedule(&dispatcher, tracker.as_ref(), &provider, false, json_mode).await?;

    loop {
        if !args.watch && dispatcher.active_runs().await == 0 {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                return shutdown(&dispatcher, json_mode).await;
            }
            () = tokio::time::sleep(interval) => {}
        }
        poll(&dispatcher, pipeline.as_ref(), json_mode).await?;
        if args.watch {
            schedule(&dispatcher, tracker.as_ref(), &provider, true, json_mode).await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_output_lists_each_bucket() {
        let out = ScheduleOutput {
            provider: "claude".to_string(),
            report: ScheduleReport {
                launched: vec![1, 2],
                deferred: vec![5],
                ..Default::default()
            },
        };
        let human = out.to_human();
        assert!(human.contains("Launched:       #1, #2"));
        assert!(human.contains("Deferred:       #5"));
        assert!(human.contains("Blocked:        -"));
        assert_eq!(out.to_json()["launched"], serde_json::json!([1, 2]));
    }
}
