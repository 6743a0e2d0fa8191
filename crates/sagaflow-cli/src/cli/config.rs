//! `sagaflow config`: show where configuration is read from and what it resolves to.

use std::path::Path;

use anyhow::Result;
use console::style;
use sagaflow_types::config::EngineConfig;

pub fn handle_config(path: &Path, config: &EngineConfig, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "path": path.display().to_string(),
            "exists": path.exists(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let source = if path.exists() {
        style("loaded").green()
    } else {
        style("not found, using defaults").dim()
    };

    println!();
    println!(
        "  {} {} ({})",
        style("Config:").bold(),
        path.display(),
        source
    );
    println!();
    println!(
        "  run_timeout_secs:       {}",
        or_none(config.run_timeout_secs)
    );
    println!(
        "  step_timeout_secs:      {}",
        or_none(config.step_timeout_secs)
    );
    println!(
        "  max_sub_workflow_depth: {}",
        config.max_sub_workflow_depth
    );
    println!(
        "  max_concurrent_nodes:   {}",
        or_none(config.max_concurrent_nodes)
    );
    println!("  event_bus_capacity:     {}", config.event_bus_capacity);
    println!();

    Ok(())
}

fn or_none<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "none".to_string(), |v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_limits_render_as_none() {
        assert_eq!(or_none::<u64>(None), "none");
        assert_eq!(or_none(Some(30u64)), "30");
    }
}
