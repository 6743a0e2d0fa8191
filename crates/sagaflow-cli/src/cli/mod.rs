//! CLI command definitions for the `sagaflow` binary.
//!
//! Uses clap derive macros for argument parsing. Every command runs against
//! the bundled demo workflows in a fresh in-memory engine.

pub mod config;
pub mod list;
pub mod run;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Run and inspect saga workflows.
#[derive(Parser)]
#[command(name = "sagaflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Engine config file (defaults to $SAGAFLOW_CONFIG, then the user config dir).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Write logs to stderr as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a workflow to completion and show how it unfolded.
    Run(RunArgs),

    /// List registered workflows.
    #[command(alias = "ls")]
    List,

    /// Show a workflow's nodes and execution waves.
    Describe {
        /// Workflow id.
        workflow: String,
    },

    /// Show the effective engine configuration.
    Config,
}

#[derive(Args)]
pub struct RunArgs {
    /// Workflow id.
    #[arg(default_value = "cancel-order")]
    pub workflow: String,

    /// Order to act on (ignored when --input is given).
    #[arg(long, default_value = "ord-1001")]
    pub order: String,

    /// Raw JSON input for the workflow.
    #[arg(long)]
    pub input: Option<String>,

    /// Make the named node's invoke fail (repeatable; hook handlers as `hook:handler`).
    #[arg(long = "fail-at", value_name = "NODE")]
    pub fail_at: Vec<String>,

    /// Make the named node's compensate fail (repeatable).
    #[arg(long = "fail-undo", value_name = "NODE")]
    pub fail_undo: Vec<String>,

    /// Deadline for the whole run, overriding the configured default.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Print the checkpointed node log after the run.
    #[arg(long)]
    pub logs: bool,

    /// Print the demo store after the run.
    #[arg(long)]
    pub show_store: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults_to_cancel_order() {
        let cli = Cli::parse_from(["sagaflow", "run"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.workflow, "cancel-order");
        assert_eq!(args.order, "ord-1001");
        assert!(args.fail_at.is_empty());
    }

    #[test]
    fn fault_flags_repeat() {
        let cli = Cli::parse_from([
            "sagaflow",
            "run",
            "--fail-at",
            "notify-customer",
            "--fail-at",
            "record-ledger",
            "--fail-undo",
            "release-inventory",
            "-vv",
            "--json",
        ]);
        assert!(cli.json);
        assert_eq!(cli.verbose, 2);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.fail_at, ["notify-customer", "record-ledger"]);
        assert_eq!(args.fail_undo, ["release-inventory"]);
    }
}
