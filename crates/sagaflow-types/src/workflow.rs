//! Workflow domain types for sagaflow.
//!
//! Everything in here is plain data: the closed set of node kinds, per-step
//! options (retry, timeout, compensation declaration), run and node status,
//! and the run/node records written by the checkpoint layer. The executable
//! pieces (steps, closures, compiled graphs) live in `sagaflow-core`.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved context key under which the workflow input is recorded.
pub const INPUT_NODE: &str = "input";

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

/// The closed set of node kinds a workflow graph is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Step,
    Transform,
    Conditional,
    Parallel,
    SubWorkflow,
    Hook,
}

impl NodeKind {
    /// Whether nodes of this kind may cause external side effects.
    ///
    /// Only these kinds ever contribute entries to a compensation log.
    pub fn is_side_effecting(&self) -> bool {
        matches!(self, NodeKind::Step | NodeKind::SubWorkflow | NodeKind::Hook)
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeKind::Step => "step",
            NodeKind::Transform => "transform",
            NodeKind::Conditional => "conditional",
            NodeKind::Parallel => "parallel",
            NodeKind::SubWorkflow => "sub_workflow",
            NodeKind::Hook => "hook",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Step options
// ---------------------------------------------------------------------------

/// How a step declares its undo behaviour.
///
/// A step must make this choice explicitly; `Undeclared` only exists so that
/// definition validation can reject steps that never made it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompensationMode {
    /// The step has a compensate function and is recorded in the compensation log.
    Compensatable,
    /// The step intentionally has no undo (reads, notifications).
    NonCompensatable,
    /// No choice was made. Rejected at definition time.
    Undeclared,
}

/// Retry configuration for a step.
///
/// Retries are always explicit: a step without a `RetryConfig` is invoked
/// exactly once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first (default 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed delay between attempts in milliseconds.
    #[serde(default)]
    pub interval_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

impl RetryConfig {
    /// Retry up to `max_attempts` total attempts with no delay.
    pub fn attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            interval_ms: 0,
        }
    }

    /// Set the delay between attempts.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::attempts(default_max_attempts())
    }
}

/// Per-step execution options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOptions {
    /// Explicit retry policy. `None` means a single attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Per-attempt timeout in milliseconds (overrides the engine default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl StepOptions {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Run / node status
// ---------------------------------------------------------------------------

/// Lifecycle state of a single workflow run.
///
/// `Pending -> Running -> Succeeded`, or
/// `Pending -> Running -> Compensating -> Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Compensating,
    Succeeded,
    Failed,
}

impl RunStatus {
    /// Whether the run has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Succeeded | RunStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Running, RunStatus::Succeeded)
                | (RunStatus::Running, RunStatus::Compensating)
                | (RunStatus::Compensating, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Compensating => "compensating",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Status of an individual node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Running,
    Completed,
    Failed,
    Skipped,
    Compensated,
    CompensationFailed,
}

// ---------------------------------------------------------------------------
// Run / node records (checkpoint audit)
// ---------------------------------------------------------------------------

/// A single execution of a workflow, as recorded by the checkpoint layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    /// UUIDv7 run ID.
    pub id: Uuid,
    /// Identifier of the workflow definition being executed.
    pub workflow_id: String,
    /// Parent run when this run is a sub-workflow invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_run_id: Option<Uuid>,
    /// Current status.
    pub status: RunStatus,
    /// Workflow input.
    pub input: serde_json::Value,
    /// Snapshot of recorded node outputs, updated at terminal state.
    pub context: serde_json::Value,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Error message if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Log entry for one node transition within a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLog {
    /// UUIDv7 log ID.
    pub id: Uuid,
    pub run_id: Uuid,
    pub node: String,
    pub kind: NodeKind,
    pub status: NodeStatus,
    /// Attempt number (1-based); 0 for nodes that were never invoked.
    pub attempt: u32,
    /// Idempotency key for side-effecting nodes (`{run_id}-{node}-{attempt}`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_transitions_follow_state_machine() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Succeeded));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Compensating));
        assert!(RunStatus::Compensating.can_transition_to(RunStatus::Failed));

        assert!(!RunStatus::Running.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Succeeded));
        assert!(!RunStatus::Succeeded.can_transition_to(RunStatus::Compensating));
        assert!(!RunStatus::Compensating.can_transition_to(RunStatus::Succeeded));
    }

    #[test]
    fn terminal_states() {
        assert!(RunStatus::Succeeded.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Compensating.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn only_step_like_kinds_are_side_effecting() {
        assert!(NodeKind::Step.is_side_effecting());
        assert!(NodeKind::SubWorkflow.is_side_effecting());
        assert!(NodeKind::Hook.is_side_effecting());
        assert!(!NodeKind::Transform.is_side_effecting());
        assert!(!NodeKind::Conditional.is_side_effecting());
        assert!(!NodeKind::Parallel.is_side_effecting());
    }

    #[test]
    fn node_kind_serializes_snake_case() {
        let json = serde_json::to_string(&NodeKind::SubWorkflow).unwrap();
        assert_eq!(json, "\"sub_workflow\"");
        assert_eq!(NodeKind::SubWorkflow.to_string(), "sub_workflow");
    }

    #[test]
    fn retry_config_defaults_when_fields_missing() {
        let config: RetryConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.interval(), Duration::ZERO);

        let config = RetryConfig::attempts(5).with_interval(Duration::from_millis(250));
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.interval_ms, 250);
    }

    #[test]
    fn step_options_skip_empty_fields() {
        let opts = StepOptions::default();
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json, serde_json::json!({}));
        assert!(opts.timeout().is_none());

        let opts = StepOptions {
            retry: None,
            timeout_ms: Some(1500),
        };
        assert_eq!(opts.timeout(), Some(Duration::from_millis(1500)));
    }
}
