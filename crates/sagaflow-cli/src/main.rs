//! sagaflow CLI entry point.
//!
//! Binary name: `sagaflow`
//!
//! Parses CLI arguments, sets up tracing, loads engine configuration, then
//! dispatches to the command handler. Commands act on the bundled demo
//! workflows (`cancel-order`, `refund-payments`).

mod cli;
mod demo;

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use sagaflow_core::config::{default_config_path, load_config};
use sagaflow_observe::tracing_setup::{TracingOptions, init_tracing, shutdown_tracing};

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let options = TracingOptions::for_verbosity(cli.verbose, cli.quiet)
        .with_json(cli.log_json)
        .with_otel(cli.otel);
    init_tracing(&options).map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let config = load_config(&config_path)
        .await
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    match cli.command {
        Commands::Run(args) => {
            let succeeded = cli::run::handle_run(args, config, cli.json).await?;
            if !succeeded {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::List => {
            let demo = demo::setup(config, demo::FaultPlan::default())?;
            cli::list::handle_list(&demo.engine, cli.json)?;
        }
        Commands::Describe { workflow } => {
            let demo = demo::setup(config, demo::FaultPlan::default())?;
            cli::list::handle_describe(&demo.engine, &workflow, cli.json)?;
        }
        Commands::Config => {
            cli::config::handle_config(&config_path, &config, cli.json)?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
