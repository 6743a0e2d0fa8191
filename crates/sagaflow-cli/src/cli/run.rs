//! `sagaflow run`: execute a workflow and report its result, event timeline
//! and compensation outcome.

use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Value, json};
use tokio::sync::broadcast::error::TryRecvError;
use uuid::Uuid;

use sagaflow_core::repository::run::RunRepository;
use sagaflow_core::workflow::engine::WorkflowEngine;
use sagaflow_core::workflow::result::{RunOptions, RunReport, RunResult};
use sagaflow_types::config::EngineConfig;
use sagaflow_types::event::WorkflowEvent;
use sagaflow_types::workflow::{NodeLog, NodeStatus};

use super::RunArgs;
use crate::demo::{self, FaultPlan};

/// Run a workflow. Returns whether it succeeded.
pub async fn handle_run(args: RunArgs, config: EngineConfig, json: bool) -> Result<bool> {
    let input = parse_input(args.input.as_deref(), &args.order)?;
    let faults = FaultPlan::new(args.fail_at, args.fail_undo);
    let demo = demo::setup(config, faults)?;

    let mut events = demo.engine.subscribe();
    let run_id = Uuid::now_v7();
    let mut options = RunOptions::default().with_run_id(run_id);
    if let Some(secs) = args.timeout_secs {
        options = options.with_timeout(Duration::from_secs(secs));
    }

    tracing::info!(run_id = %run_id, workflow = args.workflow.as_str(), "starting run");
    let run = demo.engine.run_with(&args.workflow, input, options);
    tokio::pin!(run);

    let report = tokio::select! {
        report = &mut run => report?,
        _ = interrupted() => {
            if let Err(e) = demo.engine.cancel(run_id) {
                tracing::warn!(run_id = %run_id, "cancel failed: {e}");
            }
            run.await?
        }
    };

    let mut timeline = Vec::new();
    loop {
        match events.try_recv() {
            Ok(event) => timeline.push(event),
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event timeline lagged");
            }
            Err(_) => break,
        }
    }

    let logs = if args.logs {
        collect_logs(&demo.engine, &timeline).await?
    } else {
        Vec::new()
    };
    let store = args.show_store.then(|| demo.store.snapshot());

    if json {
        print_json(&report, &timeline, &logs, store)?;
    } else {
        print_report(&report);
        print_timeline(&timeline);
        if args.logs {
            print_logs(&logs);
        }
        if let Some(store) = store {
            println!("  {}", style("Store:").bold());
            println!("{}", indent(&serde_json::to_string_pretty(&store)?));
            println!();
        }
    }

    Ok(report.result.is_success())
}

/// Resolve once the user presses Ctrl+C.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Workflow input: `--input` when given, otherwise `{"order_id": <order>}`.
fn parse_input(raw: Option<&str>, order: &str) -> Result<Value> {
    match raw {
        Some(raw) => {
            serde_json::from_str(raw).with_context(|| format!("Invalid JSON input: '{raw}'"))
        }
        None => Ok(json!({ "order_id": order })),
    }
}

/// Node logs of the run and every sub-workflow run it started.
async fn collect_logs(
    engine: &WorkflowEngine,
    timeline: &[WorkflowEvent],
) -> Result<Vec<NodeLog>> {
    let mut logs = Vec::new();
    for event in timeline {
        if let WorkflowEvent::RunStarted { run_id, .. } = event {
            let run_logs = engine
                .repository()
                .list_node_logs(run_id)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to list node logs: {e}"))?;
            logs.extend(run_logs);
        }
    }
    logs.sort_by_key(|log| log.recorded_at);
    Ok(logs)
}

// ---------------------------------------------------------------------------
// JSON output
// ---------------------------------------------------------------------------

fn print_json(
    report: &RunReport,
    timeline: &[WorkflowEvent],
    logs: &[NodeLog],
    store: Option<Value>,
) -> Result<()> {
    let mut out = json!({
        "run_id": report.run_id.to_string(),
        "workflow": report.workflow_id,
        "status": report.status,
        "duration_ms": report.duration.as_millis() as u64,
        "events": timeline,
    });

    match &report.result {
        RunResult::Succeeded(output) => {
            out["output"] = output.clone();
        }
        RunResult::Failed(failure) => {
            out["error"] = json!({
                "kind": failure.kind(),
                "node": failure.cause.node(),
                "message": failure.to_string(),
                "concurrent": failure.concurrent.iter().map(|e| e.to_string()).collect::<Vec<_>>(),
            });
            out["compensated"] = json!(failure.compensation.compensated);
            out["compensation_failures"] = json!(failure.compensation.failures);
        }
    }
    if !logs.is_empty() {
        out["logs"] = json!(logs);
    }
    if let Some(store) = store {
        out["store"] = store;
    }

    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Styled output
// ---------------------------------------------------------------------------

fn print_report(report: &RunReport) {
    let short_id = short(report.run_id);
    println!();
    match &report.result {
        RunResult::Succeeded(output) => {
            println!(
                "  {} Workflow '{}' succeeded (run {}, {}ms)",
                style("*").green().bold(),
                style(&report.workflow_id).cyan(),
                style(&short_id).cyan(),
                report.duration.as_millis()
            );
            println!();
            println!("  {}", style("Output:").bold());
            let pretty =
                serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string());
            println!("{}", indent(&pretty));
        }
        RunResult::Failed(failure) => {
            println!(
                "  {} Workflow '{}' failed (run {}, {}ms)",
                style("x").red().bold(),
                style(&report.workflow_id).cyan(),
                style(&short_id).cyan(),
                report.duration.as_millis()
            );
            println!("  Error: {}", style(&failure.cause).red());
            println!("  Kind: {}", failure.kind());
            for other in &failure.concurrent {
                println!("  Also failed: {}", style(other).red());
            }

            let compensated = &failure.compensation.compensated;
            if compensated.is_empty() {
                println!("  Compensated: {}", style("nothing to undo").dim());
            } else {
                println!(
                    "  Compensated ({}): {}",
                    compensated.len(),
                    compensated.join(", ")
                );
            }
            for f in &failure.compensation.failures {
                println!(
                    "  {} compensation of '{}' failed: {}",
                    style("!").yellow().bold(),
                    f.node,
                    style(&f.error).red()
                );
            }
        }
    }
    println!();
}

fn print_timeline(timeline: &[WorkflowEvent]) {
    if timeline.is_empty() {
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Run"),
            Cell::new("Event"),
            Cell::new("Node"),
            Cell::new("Detail"),
        ]);

    for (i, event) in timeline.iter().enumerate() {
        let (name, detail) = describe_event(event);
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(short(event.run_id())),
            format_event(event, name),
            Cell::new(event.node().unwrap_or("-")),
            Cell::new(detail),
        ]);
    }

    println!("  {}", style("Events:").bold());
    println!("{table}");
    println!();
}

fn print_logs(logs: &[NodeLog]) {
    if logs.is_empty() {
        println!("  No node logs recorded.");
        println!();
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Run"),
            Cell::new("Status"),
            Cell::new("Attempt"),
            Cell::new("Recorded"),
            Cell::new("Error"),
        ]);

    for log in logs {
        let error = log
            .error
            .as_ref()
            .map(|e| e.chars().take(40).collect::<String>())
            .unwrap_or_else(|| "-".to_string());

        table.add_row(vec![
            Cell::new(&log.node),
            Cell::new(short(log.run_id)),
            format_node_status(log.status),
            Cell::new(log.attempt),
            Cell::new(log.recorded_at.format("%H:%M:%S%.3f").to_string()),
            Cell::new(error),
        ]);
    }

    println!("  {}", style("Node log:").bold());
    println!("{table}");
    println!();
}

/// Event name and a one-line detail.
fn describe_event(event: &WorkflowEvent) -> (&'static str, String) {
    match event {
        WorkflowEvent::RunStarted {
            workflow_id,
            parent_run_id,
            ..
        } => match parent_run_id {
            Some(parent) => (
                "run started",
                format!("{workflow_id} (child of {})", short(*parent)),
            ),
            None => ("run started", workflow_id.clone()),
        },
        WorkflowEvent::NodeStarted { kind, attempt, .. } => {
            ("node started", format!("{kind}, attempt {attempt}"))
        }
        WorkflowEvent::NodeCompleted {
            duration_ms,
            compensatable,
            ..
        } => {
            let detail = if *compensatable {
                format!("{duration_ms}ms, undoable")
            } else {
                format!("{duration_ms}ms")
            };
            ("node completed", detail)
        }
        WorkflowEvent::NodeSkipped { .. } => ("node skipped", "condition was false".to_string()),
        WorkflowEvent::NodeFailed {
            error_kind,
            error,
            will_retry,
            ..
        } => {
            let retry = if *will_retry { ", retrying" } else { "" };
            ("node failed", format!("{error_kind}: {error}{retry}"))
        }
        WorkflowEvent::CompensationStarted { entries, .. } => {
            ("unwinding", format!("{entries} entries"))
        }
        WorkflowEvent::StepCompensated { .. } => ("compensated", String::new()),
        WorkflowEvent::CompensationFailed { error, .. } => ("compensation failed", error.clone()),
        WorkflowEvent::RunSucceeded {
            duration_ms,
            nodes_completed,
            ..
        } => (
            "run succeeded",
            format!("{nodes_completed} nodes in {duration_ms}ms"),
        ),
        WorkflowEvent::RunFailed {
            error_kind,
            compensation_failures,
            ..
        } => (
            "run failed",
            format!("{error_kind}, {compensation_failures} compensation failure(s)"),
        ),
        WorkflowEvent::RunCancelRequested { .. } => ("cancel requested", String::new()),
    }
}

fn format_event(event: &WorkflowEvent, name: &str) -> Cell {
    let color = match event {
        WorkflowEvent::RunSucceeded { .. } | WorkflowEvent::StepCompensated { .. } => Color::Green,
        WorkflowEvent::NodeFailed { .. }
        | WorkflowEvent::RunFailed { .. }
        | WorkflowEvent::CompensationFailed { .. } => Color::Red,
        WorkflowEvent::CompensationStarted { .. } | WorkflowEvent::RunCancelRequested { .. } => {
            Color::Yellow
        }
        WorkflowEvent::NodeSkipped { .. } => Color::DarkGrey,
        _ => Color::Reset,
    };
    Cell::new(name).fg(color)
}

fn format_node_status(status: NodeStatus) -> Cell {
    match status {
        NodeStatus::Running => Cell::new("running").fg(Color::Blue),
        NodeStatus::Completed => Cell::new("completed").fg(Color::Green),
        NodeStatus::Failed => Cell::new("failed").fg(Color::Red),
        NodeStatus::Skipped => Cell::new("skipped").fg(Color::DarkGrey),
        NodeStatus::Compensated => Cell::new("compensated").fg(Color::Yellow),
        NodeStatus::CompensationFailed => Cell::new("compensation failed").fg(Color::Red),
    }
}

/// First eight characters of a run id.
fn short(run_id: Uuid) -> String {
    run_id.to_string().chars().take(8).collect()
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}
