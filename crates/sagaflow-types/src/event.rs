//! Event types for the sagaflow engine event bus.
//!
//! `WorkflowEvent` is the unified event type broadcast while runs execute.
//! All variants are Clone + Send + Sync for use with tokio broadcast channels.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::workflow::NodeKind;

/// Events emitted during workflow execution.
///
/// Subscribers (loggers, UIs, durable journals) observe run lifecycle, node
/// transitions and the compensation unwind through these.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run has started.
    RunStarted {
        run_id: Uuid,
        workflow_id: String,
        /// Set when the run is a sub-workflow invocation.
        parent_run_id: Option<Uuid>,
    },

    /// A node has started executing.
    NodeStarted {
        run_id: Uuid,
        node: String,
        kind: NodeKind,
        attempt: u32,
    },

    /// A node recorded its output.
    NodeCompleted {
        run_id: Uuid,
        node: String,
        kind: NodeKind,
        duration_ms: u64,
        /// Whether the node was appended to the compensation log.
        compensatable: bool,
    },

    /// A node was skipped because an enclosing condition was false.
    NodeSkipped { run_id: Uuid, node: String },

    /// A node failed.
    NodeFailed {
        run_id: Uuid,
        node: String,
        error_kind: ErrorKind,
        error: String,
        will_retry: bool,
    },

    /// The run switched to unwinding its compensation log.
    CompensationStarted { run_id: Uuid, entries: usize },

    /// A committed step was compensated.
    StepCompensated { run_id: Uuid, node: String },

    /// A compensate function failed. The unwind continues.
    CompensationFailed {
        run_id: Uuid,
        node: String,
        error: String,
    },

    /// The run finished successfully.
    RunSucceeded {
        run_id: Uuid,
        workflow_id: String,
        duration_ms: u64,
        nodes_completed: u32,
    },

    /// The run finished after unwinding.
    RunFailed {
        run_id: Uuid,
        workflow_id: String,
        error_kind: ErrorKind,
        error: String,
        compensation_failures: u32,
    },

    /// Cancellation was requested for a running run.
    RunCancelRequested { run_id: Uuid },
}

impl WorkflowEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> Uuid {
        match self {
            WorkflowEvent::RunStarted { run_id, .. }
            | WorkflowEvent::NodeStarted { run_id, .. }
            | WorkflowEvent::NodeCompleted { run_id, .. }
            | WorkflowEvent::NodeSkipped { run_id, .. }
            | WorkflowEvent::NodeFailed { run_id, .. }
            | WorkflowEvent::CompensationStarted { run_id, .. }
            | WorkflowEvent::StepCompensated { run_id, .. }
            | WorkflowEvent::CompensationFailed { run_id, .. }
            | WorkflowEvent::RunSucceeded { run_id, .. }
            | WorkflowEvent::RunFailed { run_id, .. }
            | WorkflowEvent::RunCancelRequested { run_id } => *run_id,
        }
    }

    /// The node this event concerns, for node-scoped variants.
    pub fn node(&self) -> Option<&str> {
        match self {
            WorkflowEvent::NodeStarted { node, .. }
            | WorkflowEvent::NodeCompleted { node, .. }
            | WorkflowEvent::NodeSkipped { node, .. }
            | WorkflowEvent::NodeFailed { node, .. }
            | WorkflowEvent::StepCompensated { node, .. }
            | WorkflowEvent::CompensationFailed { node, .. } => Some(node),

            WorkflowEvent::RunStarted { .. }
            | WorkflowEvent::CompensationStarted { .. }
            | WorkflowEvent::RunSucceeded { .. }
            | WorkflowEvent::RunFailed { .. }
            | WorkflowEvent::RunCancelRequested { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_failed_serde_roundtrip() {
        let event = WorkflowEvent::NodeFailed {
            run_id: Uuid::now_v7(),
            node: "cancel-payment".to_string(),
            error_kind: ErrorKind::NotAllowed,
            error: "payment already captured".to_string(),
            will_retry: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"node_failed\""));
        assert!(json.contains("\"error_kind\":\"not_allowed\""));

        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            parsed,
            WorkflowEvent::NodeFailed { will_retry: false, .. }
        ));
    }

    #[test]
    fn test_run_id_and_node_accessors() {
        let run_id = Uuid::now_v7();
        let event = WorkflowEvent::StepCompensated {
            run_id,
            node: "reserve".to_string(),
        };
        assert_eq!(event.run_id(), run_id);
        assert_eq!(event.node(), Some("reserve"));

        let event = WorkflowEvent::CompensationStarted { run_id, entries: 3 };
        assert_eq!(event.run_id(), run_id);
        assert!(event.node().is_none());
    }
}
