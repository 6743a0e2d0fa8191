//! Workflow definitions: eager validation and compilation.
//!
//! [`WorkflowBuilder`] collects nodes in order; [`WorkflowBuilder::build`]
//! validates every rule that can be checked without running anything and
//! compiles the node tree into [`Scope`]s. The result is immutable and cheap
//! to clone, so one definition serves any number of concurrent runs.
//!
//! Visibility rules for `reads`:
//! - `input` is always visible
//! - in a sequential scope, a node sees every earlier sibling and everything
//!   nested inside earlier siblings
//! - nested nodes additionally see whatever their container sees
//! - members of a parallel group never see each other

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use sagaflow_types::workflow::{CompensationMode, INPUT_NODE, NodeKind};

use super::dag::{CompiledBody, CompiledNode, Scope, ensure_acyclic, plan_waves};
use super::node::{Node, NodeBody, is_reserved};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors detected while building a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DefinitionError {
    /// The workflow identifier is empty.
    #[error("workflow id must not be empty")]
    EmptyId,

    /// A node has an empty name.
    #[error("node names must not be empty")]
    EmptyName,

    /// A node uses the name reserved for the workflow input.
    #[error("node name '{0}' is reserved")]
    ReservedName(String),

    /// Two nodes share a name.
    #[error("duplicate node name '{0}'")]
    DuplicateNode(String),

    /// A read names a node that does not exist.
    #[error("node '{node}' reads unknown node '{dependency}'")]
    UnknownDependency { node: String, dependency: String },

    /// A read names a node defined later or outside the reader's visibility.
    #[error("node '{node}' reads '{dependency}' before it is defined")]
    ForwardReference { node: String, dependency: String },

    /// A parallel group member reads another member of the same group.
    #[error("parallel member '{node}' reads sibling '{dependency}'")]
    SiblingDependency { node: String, dependency: String },

    /// The dependency graph contains a cycle.
    #[error("cycle detected involving node '{node}'")]
    Cycle { node: String },

    /// A step declared neither a compensate function nor `NonCompensatable`.
    #[error("step '{0}' must declare compensation or be marked non-compensatable")]
    UndeclaredCompensation(String),

    /// The declared output node does not exist.
    #[error("output node '{0}' is not defined")]
    UnknownOutput(String),

    /// A conditional or parallel group has no nodes.
    #[error("'{0}' contains no nodes")]
    EmptyGroup(String),
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects nodes for a workflow in definition order.
pub struct WorkflowBuilder {
    id: String,
    nodes: Vec<Node>,
    output: Option<String>,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            nodes: Vec::new(),
            output: None,
        }
    }

    /// Append a node after everything added so far.
    pub fn then(mut self, node: impl Into<Node>) -> Self {
        self.nodes.push(node.into());
        self
    }

    /// Declare which node's recorded value is the workflow output.
    pub fn output(mut self, node: impl Into<String>) -> Self {
        self.output = Some(node.into());
        self
    }

    /// Validate and compile the definition.
    pub fn build(self) -> Result<WorkflowDefinition, DefinitionError> {
        if self.id.trim().is_empty() {
            return Err(DefinitionError::EmptyId);
        }

        let mut all = Vec::new();
        collect_names(&self.nodes, 0, &mut all)?;
        let kinds: HashMap<String, NodeKind> =
            all.iter().map(|o| (o.name.clone(), o.kind)).collect();

        if let Some(output) = self.output.as_ref().filter(|o| !kinds.contains_key(*o)) {
            return Err(DefinitionError::UnknownOutput(output.clone()));
        }

        let compiler = Compiler { kinds: &kinds };
        let (root, _) = compiler.compile_scope(self.nodes, &HashSet::new(), false)?;

        let hooks = all
            .iter()
            .filter(|o| o.kind == NodeKind::Hook)
            .map(|o| o.name.clone())
            .collect();
        tracing::debug!(
            workflow = self.id.as_str(),
            nodes = all.len(),
            "compiled workflow definition"
        );

        Ok(WorkflowDefinition {
            inner: Arc::new(CompiledWorkflow {
                id: self.id,
                root: Arc::new(root),
                hooks,
                output: self.output,
                kinds,
                outline: all,
            }),
        })
    }
}

/// Walk the node tree once: reject empty, reserved and duplicate names,
/// undeclared compensation and empty groups, and record an outline.
fn collect_names(
    nodes: &[Node],
    depth: usize,
    out: &mut Vec<NodeOutline>,
) -> Result<(), DefinitionError> {
    for node in nodes {
        if node.name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if is_reserved(&node.name) {
            return Err(DefinitionError::ReservedName(node.name.clone()));
        }
        if out.iter().any(|o| o.name == node.name) {
            return Err(DefinitionError::DuplicateNode(node.name.clone()));
        }

        match &node.body {
            NodeBody::Step { step, .. } => {
                if step.compensation_mode() == CompensationMode::Undeclared {
                    return Err(DefinitionError::UndeclaredCompensation(node.name.clone()));
                }
            }
            NodeBody::Conditional { then, .. } if then.is_empty() => {
                return Err(DefinitionError::EmptyGroup(node.name.clone()));
            }
            NodeBody::Parallel { members } if members.is_empty() => {
                return Err(DefinitionError::EmptyGroup(node.name.clone()));
            }
            _ => {}
        }

        out.push(NodeOutline {
            name: node.name.clone(),
            kind: node.kind(),
            depth,
            reads: node.reads.clone(),
        });
        collect_names(node.children(), depth + 1, out)?;
    }
    Ok(())
}

/// Every name defined by `node`: itself first, then its descendants.
fn subtree_names(node: &Node, out: &mut Vec<String>) {
    out.push(node.name.clone());
    for child in node.children() {
        subtree_names(child, out);
    }
}

struct Compiler<'a> {
    kinds: &'a HashMap<String, NodeKind>,
}

impl Compiler<'_> {
    /// Compile one scope.
    ///
    /// `outer` is everything visible to the enclosing container. Returns the
    /// scope and the set of names it reads from outside itself.
    fn compile_scope(
        &self,
        nodes: Vec<Node>,
        outer: &HashSet<String>,
        parallel: bool,
    ) -> Result<(Scope, HashSet<String>), DefinitionError> {
        // Name -> index of the sibling that defines it (itself or as a descendant).
        let mut owner: HashMap<String, usize> = HashMap::new();
        let mut subtrees: Vec<Vec<String>> = Vec::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            let mut names = Vec::new();
            subtree_names(node, &mut names);
            for name in &names {
                owner.insert(name.clone(), i);
            }
            subtrees.push(names);
        }

        let mut compiled = Vec::with_capacity(nodes.len());
        let mut deps = Vec::with_capacity(nodes.len());
        let mut external: HashSet<String> = HashSet::new();

        for (i, node) in nodes.into_iter().enumerate() {
            let mut visible = outer.clone();
            if !parallel {
                for names in &subtrees[..i] {
                    visible.extend(names.iter().cloned());
                }
            }

            for read in &node.reads {
                self.check_read(&node.name, read, &visible, parallel, &owner)?;
            }

            let Node { name, reads, body } = node;
            let mut all_reads: Vec<String> = reads.clone();

            let (kind, body) = match body {
                NodeBody::Step {
                    step,
                    input,
                    options,
                } => (
                    NodeKind::Step,
                    CompiledBody::Step {
                        step,
                        input,
                        options,
                    },
                ),
                NodeBody::Transform { compute } => {
                    (NodeKind::Transform, CompiledBody::Transform { compute })
                }
                NodeBody::Conditional { predicate, then } => {
                    let (scope, nested) = self.compile_scope(then, &visible, false)?;
                    all_reads.extend(nested);
                    (
                        NodeKind::Conditional,
                        CompiledBody::Conditional {
                            predicate,
                            scope: Arc::new(scope),
                        },
                    )
                }
                NodeBody::Parallel { members } => {
                    let (scope, nested) = self.compile_scope(members, &visible, true)?;
                    all_reads.extend(nested);
                    (
                        NodeKind::Parallel,
                        CompiledBody::Parallel {
                            scope: Arc::new(scope),
                        },
                    )
                }
                NodeBody::SubWorkflow { workflow, input } => (
                    NodeKind::SubWorkflow,
                    CompiledBody::SubWorkflow { workflow, input },
                ),
                NodeBody::Hook { payload } => (NodeKind::Hook, CompiledBody::Hook { payload }),
            };

            let mut node_deps = Vec::new();
            for read in &all_reads {
                match owner.get(read) {
                    Some(&j) if j < i && !parallel => {
                        if !node_deps.contains(&j) {
                            node_deps.push(j);
                        }
                    }
                    _ => {
                        external.insert(read.clone());
                    }
                }
            }

            let descendants = subtrees[i][1..]
                .iter()
                .filter_map(|n| self.kinds.get(n).map(|k| (n.clone(), *k)))
                .collect();

            compiled.push(CompiledNode {
                name,
                kind,
                reads,
                descendants,
                body,
            });
            deps.push(node_deps);
        }

        let names: Vec<&str> = compiled.iter().map(|n| n.name.as_str()).collect();
        ensure_acyclic(&names, &deps)?;

        external.remove(INPUT_NODE);
        Ok((
            Scope {
                nodes: compiled,
                deps,
            },
            external,
        ))
    }

    fn check_read(
        &self,
        node: &str,
        read: &str,
        visible: &HashSet<String>,
        parallel: bool,
        owner: &HashMap<String, usize>,
    ) -> Result<(), DefinitionError> {
        if read == INPUT_NODE || visible.contains(read) {
            return Ok(());
        }
        if read == node {
            return Err(DefinitionError::Cycle {
                node: node.to_string(),
            });
        }
        if !self.kinds.contains_key(read) {
            return Err(DefinitionError::UnknownDependency {
                node: node.to_string(),
                dependency: read.to_string(),
            });
        }
        if parallel && owner.contains_key(read) {
            return Err(DefinitionError::SiblingDependency {
                node: node.to_string(),
                dependency: read.to_string(),
            });
        }
        Err(DefinitionError::ForwardReference {
            node: node.to_string(),
            dependency: read.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// One row of a definition outline, in definition order.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct NodeOutline {
    pub name: String,
    pub kind: NodeKind,
    /// Nesting depth (0 = top level).
    pub depth: usize,
    pub reads: Vec<String>,
}

struct CompiledWorkflow {
    id: String,
    root: Arc<Scope>,
    hooks: Vec<String>,
    output: Option<String>,
    kinds: HashMap<String, NodeKind>,
    outline: Vec<NodeOutline>,
}

/// A validated, immutable workflow. Clones share the compiled graph.
#[derive(Clone)]
pub struct WorkflowDefinition {
    inner: Arc<CompiledWorkflow>,
}

impl WorkflowDefinition {
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Hook points declared anywhere in the graph, in definition order.
    pub fn hooks(&self) -> &[String] {
        &self.inner.hooks
    }

    pub fn has_hook(&self, name: &str) -> bool {
        self.inner.hooks.iter().any(|h| h == name)
    }

    pub fn output_node(&self) -> Option<&str> {
        self.inner.output.as_deref()
    }

    pub fn node_kind(&self, name: &str) -> Option<NodeKind> {
        self.inner.kinds.get(name).copied()
    }

    pub fn node_count(&self) -> usize {
        self.inner.outline.len()
    }

    /// Every node with its kind, depth and reads, in definition order.
    pub fn outline(&self) -> &[NodeOutline] {
        &self.inner.outline
    }

    /// Top-level nodes grouped into waves of nodes that may run together.
    pub fn waves(&self) -> Vec<Vec<String>> {
        let root = &self.inner.root;
        plan_waves(&root.deps)
            .into_iter()
            .map(|wave| {
                wave.into_iter()
                    .map(|i| root.nodes[i].name.clone())
                    .collect()
            })
            .collect()
    }

    pub(crate) fn root(&self) -> &Arc<Scope> {
        &self.inner.root
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("id", &self.inner.id)
            .field("nodes", &self.inner.outline.len())
            .field("hooks", &self.inner.hooks)
            .field("output", &self.inner.output)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::node::{hook, parallelize, run_as_step, step, transform, when};
    use crate::workflow::step::StepFn;
    use serde_json::Value;

    fn noop() -> StepFn {
        StepFn::new(|input, _| async move { Ok(input) }).non_compensatable()
    }

    fn undoable() -> StepFn {
        StepFn::new(|input, _| async move { Ok(input) })
            .with_compensation(|_, _, _| async { Ok(()) })
    }

    fn pass(name: &str, reads: &[&str]) -> Node {
        transform(name, reads, |_| Ok(Value::Null))
    }

    #[test]
    fn builds_linear_workflow() {
        let wf = WorkflowBuilder::new("wf")
            .then(step("a", undoable()).reads(&["input"]))
            .then(pass("b", &["a"]))
            .then(step("c", noop()).reads(&["b"]))
            .output("c")
            .build()
            .unwrap();

        assert_eq!(wf.id(), "wf");
        assert_eq!(wf.output_node(), Some("c"));
        assert_eq!(wf.node_count(), 3);
        assert_eq!(wf.node_kind("b"), Some(NodeKind::Transform));
        assert_eq!(wf.waves(), vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert_eq!(wf.root().deps, vec![vec![], vec![0], vec![1]]);
    }

    #[test]
    fn independent_nodes_share_a_wave() {
        let wf = WorkflowBuilder::new("wf")
            .then(pass("a", &["input"]))
            .then(pass("b", &["input"]))
            .then(pass("c", &["a", "b"]))
            .build()
            .unwrap();
        assert_eq!(wf.waves(), vec![vec!["a", "b"], vec!["c"]]);
    }

    #[test]
    fn rejects_empty_id() {
        let err = WorkflowBuilder::new("  ").build().unwrap_err();
        assert_eq!(err, DefinitionError::EmptyId);
    }

    #[test]
    fn rejects_reserved_and_duplicate_names() {
        let err = WorkflowBuilder::new("wf")
            .then(pass("input", &[]))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::ReservedName("input".to_string()));

        let err = WorkflowBuilder::new("wf")
            .then(pass("a", &[]))
            .then(when("gate", &[], |_| Ok(true)).then(vec![pass("a", &[])]))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::DuplicateNode("a".to_string()));

        let err = WorkflowBuilder::new("wf")
            .then(pass("", &[]))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::EmptyName);
    }

    #[test]
    fn rejects_unknown_and_forward_reads() {
        let err = WorkflowBuilder::new("wf")
            .then(pass("a", &["missing"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownDependency { .. }));

        let err = WorkflowBuilder::new("wf")
            .then(pass("a", &["b"]))
            .then(pass("b", &[]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::ForwardReference {
                node: "a".to_string(),
                dependency: "b".to_string()
            }
        );
    }

    #[test]
    fn rejects_self_read_as_cycle() {
        let err = WorkflowBuilder::new("wf")
            .then(pass("a", &["a"]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::Cycle {
                node: "a".to_string()
            }
        );
    }

    #[test]
    fn nested_node_cannot_read_its_container() {
        let err = WorkflowBuilder::new("wf")
            .then(when("gate", &[], |_| Ok(true)).then(vec![pass("inner", &["gate"])]))
            .build()
            .unwrap_err();
        assert!(matches!(err, DefinitionError::ForwardReference { .. }));
    }

    #[test]
    fn parallel_members_cannot_read_each_other() {
        let err = WorkflowBuilder::new("wf")
            .then(parallelize("group", vec![pass("c", &[]), pass("d", &["c"])]))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::SiblingDependency {
                node: "d".to_string(),
                dependency: "c".to_string()
            }
        );
    }

    #[test]
    fn nested_reads_become_container_dependencies() {
        let wf = WorkflowBuilder::new("wf")
            .then(pass("a", &[]))
            .then(pass("b", &[]))
            .then(when("gate", &["a"], |_| Ok(true)).then(vec![pass("inner", &["b"])]))
            .then(pass("after", &["inner"]))
            .build()
            .unwrap();

        let root = wf.root();
        // gate waits for a (its own read) and b (read by a nested node)
        assert_eq!(root.deps[2], vec![0, 1]);
        // after reads a node nested in gate, so it waits for gate
        assert_eq!(root.deps[3], vec![2]);
        assert_eq!(
            root.nodes[2].descendants,
            vec![("inner".to_string(), NodeKind::Transform)]
        );
    }

    #[test]
    fn rejects_undeclared_compensation() {
        let undeclared = StepFn::new(|input, _| async move { Ok(input) });
        let err = WorkflowBuilder::new("wf")
            .then(step("charge", undeclared))
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            DefinitionError::UndeclaredCompensation("charge".to_string())
        );
    }

    #[test]
    fn rejects_unknown_output_and_empty_groups() {
        let err = WorkflowBuilder::new("wf")
            .then(pass("a", &[]))
            .output("zzz")
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::UnknownOutput("zzz".to_string()));

        let err = WorkflowBuilder::new("wf")
            .then(parallelize("empty", vec![]))
            .build()
            .unwrap_err();
        assert_eq!(err, DefinitionError::EmptyGroup("empty".to_string()));
    }

    #[test]
    fn collects_hooks_and_outline() {
        let child = WorkflowBuilder::new("child")
            .then(step("inner", noop()))
            .build()
            .unwrap();

        let wf = WorkflowBuilder::new("wf")
            .then(step("a", noop()))
            .then(parallelize(
                "group",
                vec![
                    run_as_step("sub", &child).reads(&["a"]).into(),
                    hook("notified").reads(&["a"]).into(),
                ],
            ))
            .then(hook("finished"))
            .build()
            .unwrap();

        assert_eq!(wf.hooks(), ["notified".to_string(), "finished".to_string()]);
        assert!(wf.has_hook("finished"));
        assert!(!wf.has_hook("inner"));
        // child nodes live in their own namespace
        assert_eq!(wf.node_kind("inner"), None);

        let depths: Vec<(&str, usize)> = wf
            .outline()
            .iter()
            .map(|o| (o.name.as_str(), o.depth))
            .collect();
        assert_eq!(
            depths,
            vec![("a", 0), ("group", 0), ("sub", 1), ("notified", 1), ("finished", 0)]
        );
    }
}
