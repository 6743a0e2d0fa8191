//! The per-run compensation log and the outcome of unwinding it.
//!
//! Entries are appended in commit order as compensatable steps succeed and
//! are consumed newest-first during unwind. Nothing else removes or reorders
//! them.

use sagaflow_types::workflow::NodeKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::step::{BoxStep, StepContext};

/// How a committed entry is undone.
pub(crate) enum Compensator {
    /// Call the step's compensate function.
    Step(BoxStep),
    /// Unwind a successful child run's own log as one unit.
    SubWorkflow { run_id: Uuid, log: CompensationLog },
}

pub(crate) struct CompensationEntry {
    pub node: String,
    pub kind: NodeKind,
    pub compensator: Compensator,
    /// Recorded output of the committed invoke.
    pub output: Value,
    /// Input the invoke was called with.
    pub input: Value,
    pub ctx: StepContext,
}

/// LIFO record of undoable work committed by one run.
#[derive(Default)]
pub struct CompensationLog {
    entries: Vec<CompensationEntry>,
}

impl CompensationLog {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Node names in commit order.
    pub fn node_names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.node.as_str()).collect()
    }

    pub(crate) fn push(&mut self, entry: CompensationEntry) {
        self.entries.push(entry);
    }

    /// Move every entry out, leaving the log empty.
    pub(crate) fn take(&mut self) -> CompensationLog {
        CompensationLog {
            entries: std::mem::take(&mut self.entries),
        }
    }

    /// Consume the log newest-first.
    pub(crate) fn into_unwind_order(self) -> impl Iterator<Item = CompensationEntry> {
        self.entries.into_iter().rev()
    }
}

impl std::fmt::Debug for CompensationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.node_names()).finish()
    }
}

/// A compensate call that failed. The unwind continued past it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailure {
    pub node: String,
    pub error: String,
}

/// What happened while unwinding a run's compensation log.
///
/// Node names of entries that came from a sub-workflow are qualified as
/// `{sub_workflow_node}/{child_node}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationOutcome {
    /// Successfully compensated nodes, in the order they were compensated.
    pub compensated: Vec<String>,
    pub failures: Vec<CompensationFailure>,
}

impl CompensationOutcome {
    /// Whether every entry was undone.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn merge(&mut self, other: CompensationOutcome) {
        self.compensated.extend(other.compensated);
        self.failures.extend(other.failures);
    }
}
