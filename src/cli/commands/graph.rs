//! `foreman graph`: dependency analysis of the open tracker issues.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::collections::HashMap;

use crate::adapters::github::GitHubIssueTracker;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{Config, DependencyGraph, Issue};
use crate::domain::ports::{IssueTracker, RelationshipParser};
use crate::services::{DependencyGraphAnalyzer, RegexRelationshipParser};

#[derive(Args, Debug)]
pub struct GraphArgs {
    /// Print the dependency path from one issue to an issue it (transitively) blocks
    #[arg(long, num_args = 2, value_names = ["FROM", "TO"])]
    pub path: Option<Vec<u64>>,
}

#[derive(Debug, Serialize)]
pub struct GraphNodeOutput {
    pub issue: u64,
    pub title: String,
    pub depends_on: Vec<u64>,
    pub blocks: Vec<u64>,
    pub blocking_score: usize,
    pub depth: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct GraphOutput {
    pub nodes: Vec<GraphNodeOutput>,
    pub roots: Vec<u64>,
    pub leaves: Vec<u64>,
    pub cycles: Vec<Vec<u64>>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Unblocked issues in scheduling order
    pub unblocked: Vec<u64>,
    /// Dependencies first; absent when the graph is cyclic
    pub order: Option<Vec<u64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<u64>>,
}

fn join(numbers: &[u64]) -> String {
    numbers.iter().map(|n| format!("#{n}")).collect::<Vec<_>>().join(", ")
}

impl CommandOutput for GraphOutput {
    fn to_human(&self) -> String {
        if self.nodes.is_empty() {
            return "No open issues found.".to_string();
        }
        let mut table = list_table(&["issue", "title", "depends on", "blocks", "score", "depth"]);
        for node in &self.nodes {
            table.add_row(vec![
                format!("#{}", node.issue),
                truncate(&node.title, 40),
                join(&node.depends_on),
                join(&node.blocks),
                node.blocking_score.to_string(),
                node.depth.map_or_else(|| "-".to_string(), |d| d.to_string()),
            ]);
        }

        let mut lines = vec![table.to_string(), String::new()];
        lines.push(format!("Roots:     {}", join(&self.roots)));
        lines.push(format!("Leaves:    {}", join(&self.leaves)));
        lines.push(format!("Unblocked: {}", join(&self.unblocked)));
        if let Some(order) = &self.order {
            lines.push(format!("Order:     {}", join(order)));
        }
        for cycle in &self.cycles {
            lines.push(format!("Cycle:     {}", join(cycle)));
        }
        for error in &self.errors {
            lines.push(format!("error: {error}"));
        }
        for warning in &self.warnings {
            lines.push(format!("warning: {warning}"));
        }
        if let Some(path) = &self.path {
            if path.is_empty() {
                lines.push("Path:      none".to_string());
            } else {
                lines.push(format!("Path:      {}", join(path)));
            }
        }
        lines.join("\n")
    }
}

/// Assemble the report for a set of issues with relationships attached.
pub fn analyze(issues: &[Issue], path: Option<(u64, u64)>) -> GraphOutput {
    let analyzer = DependencyGraphAnalyzer::new();
    let graph: DependencyGraph = analyzer.build_graph(issues);
    let validation = analyzer.validate_graph(&graph);
    let statuses = issues.iter().map(|i| (i.number, i.state)).collect::<HashMap<_, _>>();
    let unblocked = analyzer.get_unblocked_issues(&graph, &statuses);
    let titles: HashMap<u64, &str> = issues.iter().map(|i| (i.number, i.title.as_str())).collect();

    let nodes = graph
        .nodes
        .values()
        .map(|node| GraphNodeOutput {
            issue: node.issue_number,
            title: titles.get(&node.issue_number).copied().unwrap_or_default().to_string(),
            depends_on: node.depends_on.iter().copied().collect(),
            blocks: node.blocks.iter().copied().collect(),
            blocking_score: analyzer.calculate_blocking_score(&graph, node.issue_number),
            depth: analyzer.calculate_depth_from_root(&graph, node.issue_number),
        })
        .collect();

    GraphOutput {
        nodes,
        roots: graph.roots.clone(),
        leaves: graph.leaves.clone(),
        cycles: graph.cycles.clone(),
        errors: validation.errors,
        warnings: validation.warnings,
        unblocked: analyzer.prioritize(&graph, &unblocked),
        order: analyzer.topological_order(&graph).ok(),
        path: path.map(|(from, to)| analyzer.get_dependency_path(&graph, from, to).unwrap_or_default()),
    }
}

pub async fn execute(args: GraphArgs, config: Config, json_mode: bool) -> Result<()> {
    let tracker = GitHubIssueTracker::from_config(&config.tracker)
        .with_context(|| format!("Failed to configure the issue tracker (is {} set?)", config.tracker.token_env))?;
    let mut issues = tracker
        .list_open_issues()
        .await
        .context("Failed to list open issues")?;

    let parser = RegexRelationshipParser::new();
    for issue in &mut issues {
        let parsed = parser.parse(issue.number, &issue.body);
        for line in &parsed.malformed {
            tracing::warn!(issue = issue.number, line = %line, "unreadable relationship reference");
        }
        for reference in parsed.references {
            if !issue.relationships.contains(&reference) {
                issue.relationships.push(reference);
            }
        }
    }

    let path = args.path.and_then(|p| match p.as_slice() {
        [from, to] => Some((*from, *to)),
        _ => None,
    });
    output(&analyze(&issues, path), json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::RelationKind;

    #[test]
    fn test_analyze_orders_unblocked_and_reports_path() {
        let issues = vec![
            Issue::new(1, "Schema"),
            Issue::new(2, "API").with_relationship(RelationKind::BlockedBy, 1),
            Issue::new(3, "UI").with_relationship(RelationKind::BlockedBy, 2),
            Issue::new(4, "Docs"),
        ];
        let report = analyze(&issues, Some((1, 3)));
        assert_eq!(report.nodes.len(), 4);
        assert_eq!(report.unblocked, vec![1, 4]);
        assert_eq!(report.order.as_deref().map(|o| o.len()), Some(4));
        assert_eq!(report.path, Some(vec![1, 2, 3]));
        assert!(report.to_human().contains("Roots:"));
    }

    #[test]
    fn test_analyze_cycle_has_no_order() {
        let issues = vec![
            Issue::new(1, "A").with_relationship(RelationKind::BlockedBy, 2),
            Issue::new(2, "B").with_relationship(RelationKind::BlockedBy, 1),
        ];
        let report = analyze(&issues, None);
        assert!(report.order.is_none());
        assert!(!report.cycles.is_empty());
        assert!(!report.errors.is_empty());
        assert!(report.unblocked.is_empty());
    }
}
