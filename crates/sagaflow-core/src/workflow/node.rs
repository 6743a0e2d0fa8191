//! Builder functions for workflow nodes.
//!
//! Every node is one of a closed set of kinds (step, transform, conditional,
//! parallel group, sub-workflow call, hook call). Builders return typed
//! values; wiring happens through the node names each node `reads`.
//!
//! ```ignore
//! let wf = WorkflowBuilder::new("cancel-order")
//!     .then(step("fetch-order", fetch).reads(&["input"]))
//!     .then(transform("order-id", &["fetch-order"], |i| Ok(i.get("fetch-order")["id"].clone())))
//!     .then(when("has-payments", &["fetch-order"], |i| Ok(!i.get("fetch-order")["payments"].is_null()))
//!         .then(vec![step("refund", refund).reads(&["order-id"]).into()]))
//!     .build()?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use sagaflow_types::workflow::{INPUT_NODE, NodeKind, RetryConfig, StepOptions};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::definition::WorkflowDefinition;
use super::step::{BoxStep, Step};

static NULL: Value = Value::Null;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Resolved upstream values handed to mappers, transforms and predicates.
///
/// Only the nodes a node declared in `reads` are present. A read of a
/// skipped node resolves to `null`.
#[derive(Debug, Clone, Default)]
pub struct Inputs {
    values: BTreeMap<String, Value>,
    order: Vec<String>,
    input: Value,
}

impl Inputs {
    pub(crate) fn new(input: Value) -> Self {
        Self {
            values: BTreeMap::new(),
            order: Vec::new(),
            input,
        }
    }

    pub(crate) fn insert(&mut self, name: &str, value: Value) {
        if self.values.insert(name.to_string(), value).is_none() {
            self.order.push(name.to_string());
        }
    }

    /// Value recorded for `name`, or `null` when absent or skipped.
    pub fn get(&self, name: &str) -> &Value {
        self.values.get(name).unwrap_or(&NULL)
    }

    /// Deserialize the value recorded for `name`.
    pub fn parse<T: DeserializeOwned>(&self, name: &str) -> Result<T, TransformError> {
        serde_json::from_value(self.get(name).clone())
            .map_err(|e| TransformError::new(format!("cannot read '{name}': {e}")))
    }

    /// The workflow input, whether or not it was declared as a read.
    pub fn workflow_input(&self) -> &Value {
        &self.input
    }

    /// Names of the resolved reads, in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All resolved reads as a JSON object keyed by node name.
    pub fn to_object(&self) -> Value {
        let map: serde_json::Map<String, Value> = self
            .order
            .iter()
            .map(|name| (name.clone(), self.get(name).clone()))
            .collect();
        Value::Object(map)
    }

    /// Input used when a node has no explicit mapper: a single read passes
    /// its value through, several reads become an object keyed by node name,
    /// and no reads fall back to the workflow input.
    pub fn default_input(&self) -> Value {
        match self.order.as_slice() {
            [] => self.input.clone(),
            [only] => self.get(only).clone(),
            _ => self.to_object(),
        }
    }
}

/// Failure of a transform, predicate or input mapper. Always fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransformError(pub String);

impl TransformError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<serde_json::Error> for TransformError {
    fn from(e: serde_json::Error) -> Self {
        Self(e.to_string())
    }
}

pub(crate) type InputMapper = Arc<dyn Fn(&Inputs) -> Result<Value, TransformError> + Send + Sync>;
pub(crate) type Predicate = Arc<dyn Fn(&Inputs) -> Result<bool, TransformError> + Send + Sync>;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A node of a workflow graph, ready to be added to a builder.
pub struct Node {
    pub(crate) name: String,
    pub(crate) reads: Vec<String>,
    pub(crate) body: NodeBody,
}

pub(crate) enum NodeBody {
    Step {
        step: BoxStep,
        input: Option<InputMapper>,
        options: StepOptions,
    },
    Transform {
        compute: InputMapper,
    },
    Conditional {
        predicate: Predicate,
        then: Vec<Node>,
    },
    Parallel {
        members: Vec<Node>,
    },
    SubWorkflow {
        workflow: WorkflowDefinition,
        input: Option<InputMapper>,
    },
    Hook {
        payload: Option<InputMapper>,
    },
}

impl Node {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> NodeKind {
        match &self.body {
            NodeBody::Step { .. } => NodeKind::Step,
            NodeBody::Transform { .. } => NodeKind::Transform,
            NodeBody::Conditional { .. } => NodeKind::Conditional,
            NodeBody::Parallel { .. } => NodeKind::Parallel,
            NodeBody::SubWorkflow { .. } => NodeKind::SubWorkflow,
            NodeBody::Hook { .. } => NodeKind::Hook,
        }
    }

    /// Names this node reads directly (not counting nested nodes).
    pub fn reads(&self) -> &[String] {
        &self.reads
    }

    /// Rename the node.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Nested nodes of a conditional or parallel group.
    pub(crate) fn children(&self) -> &[Node] {
        match &self.body {
            NodeBody::Conditional { then, .. } => then,
            NodeBody::Parallel { members } => members,
            _ => &[],
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("kind", &self.kind())
            .field("reads", &self.reads)
            .field("children", &self.children())
            .finish()
    }
}

fn to_names(reads: &[&str]) -> Vec<String> {
    reads.iter().map(|r| r.to_string()).collect()
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A step node under construction.
pub struct StepNode {
    name: String,
    reads: Vec<String>,
    step: BoxStep,
    input: Option<InputMapper>,
    options: StepOptions,
}

/// Declare a step node.
pub fn step(name: impl Into<String>, step: impl Step) -> StepNode {
    StepNode {
        name: name.into(),
        reads: Vec::new(),
        step: BoxStep::new(step),
        input: None,
        options: StepOptions::default(),
    }
}

impl StepNode {
    pub fn reads(mut self, reads: &[&str]) -> Self {
        self.reads = to_names(reads);
        self
    }

    /// Build the invoke input from the resolved reads.
    pub fn map_input<F>(mut self, f: F) -> Self
    where
        F: Fn(&Inputs) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(f));
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = Some(retry);
        self
    }

    /// Per-attempt deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn options(mut self, options: StepOptions) -> Self {
        self.options = options;
        self
    }
}

impl From<StepNode> for Node {
    fn from(s: StepNode) -> Self {
        Node {
            name: s.name,
            reads: s.reads,
            body: NodeBody::Step {
                step: s.step,
                input: s.input,
                options: s.options,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Declare a pure, synchronous derivation over `reads`.
pub fn transform<F>(name: impl Into<String>, reads: &[&str], compute: F) -> Node
where
    F: Fn(&Inputs) -> Result<Value, TransformError> + Send + Sync + 'static,
{
    Node {
        name: name.into(),
        reads: to_names(reads),
        body: NodeBody::Transform {
            compute: Arc::new(compute),
        },
    }
}

// ---------------------------------------------------------------------------
// Conditional
// ---------------------------------------------------------------------------

/// A conditional awaiting its subgraph.
pub struct When {
    name: String,
    reads: Vec<String>,
    predicate: Predicate,
}

/// Gate a subgraph on `predicate` evaluated over `reads`.
pub fn when<F>(name: impl Into<String>, reads: &[&str], predicate: F) -> When
where
    F: Fn(&Inputs) -> Result<bool, TransformError> + Send + Sync + 'static,
{
    When {
        name: name.into(),
        reads: to_names(reads),
        predicate: Arc::new(predicate),
    }
}

impl When {
    /// Attach the nodes that run when the predicate holds.
    pub fn then(self, nodes: Vec<Node>) -> Node {
        Node {
            name: self.name,
            reads: self.reads,
            body: NodeBody::Conditional {
                predicate: self.predicate,
                then: nodes,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Parallel group
// ---------------------------------------------------------------------------

/// Group sibling nodes that do not read each other so they run concurrently.
///
/// The group's output is an object of member outputs keyed by member name.
pub fn parallelize(name: impl Into<String>, members: Vec<Node>) -> Node {
    Node {
        name: name.into(),
        reads: Vec::new(),
        body: NodeBody::Parallel { members },
    }
}

// ---------------------------------------------------------------------------
// Sub-workflow
// ---------------------------------------------------------------------------

/// A sub-workflow call under construction.
pub struct SubWorkflowNode {
    name: String,
    reads: Vec<String>,
    workflow: WorkflowDefinition,
    input: Option<InputMapper>,
}

/// Run another workflow definition to completion as a single step.
pub fn run_as_step(name: impl Into<String>, workflow: &WorkflowDefinition) -> SubWorkflowNode {
    SubWorkflowNode {
        name: name.into(),
        reads: Vec::new(),
        workflow: workflow.clone(),
        input: None,
    }
}

impl SubWorkflowNode {
    pub fn reads(mut self, reads: &[&str]) -> Self {
        self.reads = to_names(reads);
        self
    }

    /// Build the child workflow input from the resolved reads.
    pub fn map_input<F>(mut self, f: F) -> Self
    where
        F: Fn(&Inputs) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        self.input = Some(Arc::new(f));
        self
    }
}

impl From<SubWorkflowNode> for Node {
    fn from(s: SubWorkflowNode) -> Self {
        Node {
            name: s.name,
            reads: s.reads,
            body: NodeBody::SubWorkflow {
                workflow: s.workflow,
                input: s.input,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Hook
// ---------------------------------------------------------------------------

/// A hook point under construction. The node name is the hook name.
pub struct HookNode {
    name: String,
    reads: Vec<String>,
    payload: Option<InputMapper>,
}

/// Declare a named extension point at this position in the graph.
pub fn hook(name: impl Into<String>) -> HookNode {
    HookNode {
        name: name.into(),
        reads: Vec::new(),
        payload: None,
    }
}

impl HookNode {
    pub fn reads(mut self, reads: &[&str]) -> Self {
        self.reads = to_names(reads);
        self
    }

    /// Build the payload handed to every handler.
    pub fn payload<F>(mut self, f: F) -> Self
    where
        F: Fn(&Inputs) -> Result<Value, TransformError> + Send + Sync + 'static,
    {
        self.payload = Some(Arc::new(f));
        self
    }
}

impl From<HookNode> for Node {
    fn from(h: HookNode) -> Self {
        Node {
            name: h.name,
            reads: h.reads,
            body: NodeBody::Hook { payload: h.payload },
        }
    }
}

/// Whether `name` is reserved for the workflow input.
pub(crate) fn is_reserved(name: &str) -> bool {
    name == INPUT_NODE
}
