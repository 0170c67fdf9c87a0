//! Foreman CLI entry point.

use anyhow::Context;
use clap::Parser;

use foreman::cli::context::load_config;
use foreman::cli::{commands, Cli, Commands};
use foreman::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = run(cli.command, cli.config.as_deref(), cli.json).await;
    if let Err(err) = result {
        foreman::cli::handle_error(err, cli.json);
    }
}

async fn run(command: Commands, config_path: Option<&std::path::Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(config_path).context("Failed to load configuration")?;
    let log_config = LogConfig::from_settings(&config.logging)?;
    let _logger = LoggerImpl::init(&log_config)?;

    match command {
        Commands::Graph(args) => commands::graph::execute(args, config, json).await,
        Commands::Slots(args) => commands::slots::execute(args, config, json).await,
        Commands::Assignments(args) => commands::assignments::execute(args, config, json).await,
        Commands::Dispatch(args) => commands::dispatch::execute(args, config, json).await,
        Commands::Merge(args) => commands::merge::execute(args, config, json).await,
    }
}
