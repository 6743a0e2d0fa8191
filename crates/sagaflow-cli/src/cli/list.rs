//! `sagaflow list` and `sagaflow describe`.

use anyhow::{Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use sagaflow_core::workflow::definition::WorkflowDefinition;
use sagaflow_core::workflow::engine::WorkflowEngine;
use sagaflow_types::workflow::NodeKind;

/// Registered workflows, sorted by id.
fn definitions(engine: &WorkflowEngine) -> Vec<WorkflowDefinition> {
    let mut ids = engine.registry().ids();
    ids.sort();
    ids.iter()
        .filter_map(|id| engine.registry().get(id))
        .collect()
}

pub fn handle_list(engine: &WorkflowEngine, json: bool) -> Result<()> {
    let defs = definitions(engine);

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "id": d.id(),
                    "nodes": d.node_count(),
                    "hooks": d.hooks(),
                    "output": d.output_node(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows registered.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Workflow").fg(Color::Cyan),
            Cell::new("Nodes"),
            Cell::new("Hooks"),
            Cell::new("Output"),
        ]);

    for d in &defs {
        let hooks = if d.hooks().is_empty() {
            "-".to_string()
        } else {
            d.hooks().join(", ")
        };
        table.add_row(vec![
            Cell::new(d.id()),
            Cell::new(d.node_count()),
            Cell::new(hooks),
            Cell::new(d.output_node().unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  Run one with: {}",
        style("sagaflow run <workflow> [--fail-at <node>]").dim()
    );
    println!();

    Ok(())
}

pub fn handle_describe(engine: &WorkflowEngine, workflow_id: &str, json: bool) -> Result<()> {
    let Some(def) = engine.registry().get(workflow_id) else {
        bail!(
            "Workflow '{workflow_id}' not found. Run `sagaflow list` to see available workflows."
        );
    };

    if json {
        let out = serde_json::json!({
            "id": def.id(),
            "output": def.output_node(),
            "hooks": def.hooks(),
            "nodes": def.outline(),
            "waves": def.waves(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Kind"),
            Cell::new("Reads"),
        ]);

    for node in def.outline() {
        let name = format!("{}{}", "  ".repeat(node.depth), node.name);
        let reads = if node.reads.is_empty() {
            "-".to_string()
        } else {
            node.reads.join(", ")
        };
        table.add_row(vec![Cell::new(name), format_kind(node.kind), Cell::new(reads)]);
    }

    println!();
    println!("  {} {}", style("Workflow:").bold(), style(def.id()).cyan());
    if let Some(output) = def.output_node() {
        println!("  Output: {output}");
    }
    println!();
    println!("{table}");
    println!();
    println!("  {}", style("Waves:").bold());
    for (i, wave) in def.waves().iter().enumerate() {
        println!("  {}. {}", i + 1, wave.join(" | "));
    }
    println!();

    Ok(())
}

fn format_kind(kind: NodeKind) -> Cell {
    let cell = Cell::new(kind.to_string());
    match kind {
        NodeKind::Step => cell.fg(Color::Green),
        NodeKind::SubWorkflow => cell.fg(Color::Blue),
        NodeKind::Hook => cell.fg(Color::Magenta),
        NodeKind::Conditional | NodeKind::Parallel => cell.fg(Color::Yellow),
        NodeKind::Transform => cell,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::{self, FaultPlan};
    use sagaflow_types::config::EngineConfig;

    #[test]
    fn definitions_are_sorted() {
        let demo = demo::setup(EngineConfig::default(), FaultPlan::default()).unwrap();
        let ids: Vec<String> = definitions(&demo.engine)
            .iter()
            .map(|d| d.id().to_string())
            .collect();
        assert_eq!(ids, ["cancel-order", "refund-payments"]);
    }

    #[test]
    fn describe_unknown_workflow_fails() {
        let demo = demo::setup(EngineConfig::default(), FaultPlan::default()).unwrap();
        let err = handle_describe(&demo.engine, "nope", true).unwrap_err();
        assert!(err.to_string().contains("'nope' not found"));
    }
}
