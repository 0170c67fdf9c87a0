//! CLI type definitions
//!
//! This module contains clap command structures that define the CLI interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::cli::commands::assignments::AssignmentsArgs;
use crate::cli::commands::dispatch::DispatchArgs;
use crate::cli::commands::graph::GraphArgs;
use crate::cli::commands::merge::MergeArgs;
use crate::cli::commands::slots::SlotsArgs;

#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(about = "Foreman - issue-to-agent assignment with a staged merge pipeline", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file (defaults to .foreman/config.yaml and .foreman/local.yaml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Analyse dependencies between open tracker issues
    Graph(GraphArgs),

    /// Show instance slot occupancy per provider
    Slots(SlotsArgs),

    /// Inspect assignments
    Assignments(AssignmentsArgs),

    /// Launch agents for unblocked issues and follow their progress
    Dispatch(DispatchArgs),

    /// Run one integration pipeline batch
    Merge(MergeArgs),
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_dispatch_with_global_flags() {
        let cli = Cli::try_parse_from([
            "foreman", "dispatch", "--provider", "claude", "--watch", "--json", "--config", "ci.yaml",
        ])
        .unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("ci.yaml")));
        match cli.command {
            Commands::Dispatch(args) => {
                assert_eq!(args.provider.as_deref(), Some("claude"));
                assert!(args.watch);
                assert_eq!(args.interval, 10);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_graph_path() {
        let cli = Cli::try_parse_from(["foreman", "graph", "--path", "3", "9"]).unwrap();
        match cli.command {
            Commands::Graph(args) => assert_eq!(args.path, Some(vec![3, 9])),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
