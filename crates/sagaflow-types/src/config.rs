//! Engine configuration types for sagaflow.
//!
//! `EngineConfig` represents the `sagaflow.toml` file that controls default
//! deadlines, nesting depth and concurrency limits. All fields have defaults,
//! so an empty file (or no file at all) is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for a workflow engine instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default per-run deadline in seconds (None = no deadline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_timeout_secs: Option<u64>,

    /// Default per-attempt step deadline in seconds (None = no deadline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_timeout_secs: Option<u64>,

    /// Maximum sub-workflow nesting depth.
    #[serde(default = "default_max_sub_workflow_depth")]
    pub max_sub_workflow_depth: u32,

    /// Maximum node tasks executing concurrently within one run (None = unlimited).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_nodes: Option<usize>,

    /// Capacity of the engine's broadcast event channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

fn default_max_sub_workflow_depth() -> u32 {
    8
}

fn default_event_bus_capacity() -> usize {
    1024
}

impl EngineConfig {
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn step_timeout(&self) -> Option<Duration> {
        self.step_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: None,
            step_timeout_secs: None,
            max_sub_workflow_depth: default_max_sub_workflow_depth(),
            max_concurrent_nodes: None,
            event_bus_capacity: default_event_bus_capacity(),
        }
    }
}
