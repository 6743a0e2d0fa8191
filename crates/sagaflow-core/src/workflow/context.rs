//! Per-run execution context.
//!
//! `ExecutionContext` records the outcome of every node that ran (its output)
//! or was skipped, keyed by node name. Entries are write-once: a second write
//! for the same node is an error. The workflow input lives under `input`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use sagaflow_types::workflow::INPUT_NODE;

use super::node::Inputs;

/// Outcome recorded for a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "output", rename_all = "snake_case")]
pub enum NodeRecord {
    Completed(Value),
    Skipped,
}

/// Mutable, per-run record of node outcomes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub run_id: Uuid,
    pub workflow_id: String,
    records: HashMap<String, NodeRecord>,
    /// Record order, for stable snapshots.
    order: Vec<String>,
}

impl ExecutionContext {
    /// Create a context for a run with `input` already recorded.
    pub fn new(run_id: Uuid, workflow_id: impl Into<String>, input: Value) -> Self {
        let mut records = HashMap::new();
        records.insert(INPUT_NODE.to_string(), NodeRecord::Completed(input));
        Self {
            run_id,
            workflow_id: workflow_id.into(),
            records,
            order: vec![INPUT_NODE.to_string()],
        }
    }

    /// Record a node's output.
    pub fn record_output(&mut self, node: &str, output: Value) -> Result<(), ContextError> {
        self.insert(node, NodeRecord::Completed(output))
    }

    /// Record that a node was skipped.
    pub fn record_skipped(&mut self, node: &str) -> Result<(), ContextError> {
        self.insert(node, NodeRecord::Skipped)
    }

    fn insert(&mut self, node: &str, record: NodeRecord) -> Result<(), ContextError> {
        if self.records.contains_key(node) {
            return Err(ContextError::AlreadyRecorded(node.to_string()));
        }
        self.records.insert(node.to_string(), record);
        self.order.push(node.to_string());
        Ok(())
    }

    pub fn get(&self, node: &str) -> Option<&NodeRecord> {
        self.records.get(node)
    }

    /// Output of a completed node. `None` for skipped or unknown nodes.
    pub fn output(&self, node: &str) -> Option<&Value> {
        match self.records.get(node) {
            Some(NodeRecord::Completed(value)) => Some(value),
            _ => None,
        }
    }

    /// Value a reader of `node` sees: the output, or `null` when skipped or absent.
    pub fn resolve(&self, node: &str) -> Value {
        self.output(node).cloned().unwrap_or(Value::Null)
    }

    pub fn input(&self) -> Value {
        self.resolve(INPUT_NODE)
    }

    pub fn is_skipped(&self, node: &str) -> bool {
        matches!(self.records.get(node), Some(NodeRecord::Skipped))
    }

    /// Nodes that recorded an output, excluding the workflow input.
    pub fn completed_count(&self) -> usize {
        self.records
            .iter()
            .filter(|(name, record)| {
                name.as_str() != INPUT_NODE && matches!(record, NodeRecord::Completed(_))
            })
            .count()
    }

    pub fn skipped_nodes(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|name| self.is_skipped(name))
            .map(String::as_str)
            .collect()
    }

    /// Build the `Inputs` for a node reading `reads`.
    pub(crate) fn inputs_for(&self, reads: &[String]) -> Inputs {
        let mut inputs = Inputs::new(self.input());
        for read in reads {
            inputs.insert(read, self.resolve(read));
        }
        inputs
    }

    /// Snapshot as a JSON object: node name -> output (`null` when skipped).
    pub fn to_json(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .order
            .iter()
            .map(|name| (name.clone(), self.resolve(name)))
            .collect();
        Value::Object(map)
    }
}

/// Errors raised when writing to the execution context.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("node '{0}' already has a recorded outcome")]
    AlreadyRecorded(String),
}
