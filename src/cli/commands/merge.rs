//! `foreman merge`: run one integration pipeline batch.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;

use crate::cli::context::AppContext;
use crate::cli::output::{list_table, output, CommandOutput};
use crate::domain::models::Config;
use crate::services::{BatchReport, PipelineOutcome};

#[derive(Args, Debug)]
pub struct MergeArgs {}

#[derive(Debug, Serialize)]
pub struct BatchOutput {
    /// `None` when another batch held the pipeline
    pub batch: Option<BatchReport>,
}

fn outcome_detail(outcome: &PipelineOutcome) -> String {
    match outcome {
        PipelineOutcome::StageReady { tag, .. } => format!("tagged {tag}"),
        PipelineOutcome::Merged { main_commit, .. } => format!("main at {}", short(main_commit)),
        PipelineOutcome::PromotionDeferred { reason, .. } => reason.clone(),
        PipelineOutcome::Rejected { reason } => reason.lines().next().unwrap_or_default().to_string(),
        PipelineOutcome::Errored { error } => error.clone(),
    }
}

fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

impl CommandOutput for BatchOutput {
    fn to_human(&self) -> String {
        let Some(batch) = &self.batch else {
            return "An integration batch is already running.".to_string();
        };
        if batch.results.is_empty() {
            return "Nothing to integrate.".to_string();
        }
        let mut table = list_table(&["issue", "outcome", "propagated", "detail"]);
        for result in &batch.results {
            table.add_row(vec![
                format!("#{}", result.issue_number),
                result.outcome.label().to_string(),
                result
                    .propagated
                    .iter()
                    .map(|n| format!("#{n}"))
                    .collect::<Vec<_>>()
                    .join(", "),
                outcome_detail(&result.outcome),
            ]);
        }
        let elapsed = batch.finished_at - batch.started_at;
        format!(
            "Integrated {} assignment(s) in {}s: {} merged, {} stage-ready, {} rejected\n{table}",
            batch.results.len(),
            elapsed.num_seconds(),
            batch.count("merged"),
            batch.count("stage-ready") + batch.count("promotion-deferred"),
            batch.count("rejected") + batch.count("errored"),
        )
    }
}

pub async fn execute(_args: MergeArgs, config: Config, json_mode: bool) -> Result<()> {
    let context = AppContext::open(config).await?;
    let tracker = context.tracker()?;
    let registry = context.registry(tracker.clone()).await?;
    let pipeline = context.pipeline(registry, tracker)?;
    let batch = pipeline.run_batch().await.context("Integration batch failed")?;
    output(&BatchOutput { batch }, json_mode);
    Ok(())
}
