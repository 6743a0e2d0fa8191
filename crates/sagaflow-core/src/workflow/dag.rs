//! Compiled graph scopes, cycle detection and wave planning.
//!
//! A workflow compiles into a tree of [`Scope`]s: the top-level node list,
//! and one nested scope per conditional subgraph or parallel group. Within a
//! scope, `deps[i]` lists the indices of siblings node `i` must wait for.
//! Uses `petgraph` to verify acyclicity; depth-based grouping produces the
//! waves shown by planning tools (execution itself is ready-based).

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use sagaflow_types::workflow::{NodeKind, StepOptions};

use super::definition::{DefinitionError, WorkflowDefinition};
use super::node::{InputMapper, Predicate};
use super::step::BoxStep;

// ---------------------------------------------------------------------------
// Compiled structures
// ---------------------------------------------------------------------------

/// One level of a compiled workflow graph.
pub(crate) struct Scope {
    pub nodes: Vec<CompiledNode>,
    pub deps: Vec<Vec<usize>>,
}

pub(crate) struct CompiledNode {
    pub name: String,
    pub kind: NodeKind,
    /// Direct reads, used to build this node's `Inputs`.
    pub reads: Vec<String>,
    /// Every node nested below this one, in definition order.
    pub descendants: Vec<(String, NodeKind)>,
    pub body: CompiledBody,
}

pub(crate) enum CompiledBody {
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
        scope: Arc<Scope>,
    },
    Parallel {
        scope: Arc<Scope>,
    },
    SubWorkflow {
        workflow: WorkflowDefinition,
        input: Option<InputMapper>,
    },
    Hook {
        payload: Option<InputMapper>,
    },
}

impl Scope {
    /// Direct dependents of each node (reverse of `deps`).
    pub fn dependents(&self) -> Vec<Vec<usize>> {
        let mut dependents = vec![Vec::new(); self.nodes.len()];
        for (i, deps) in self.deps.iter().enumerate() {
            for &d in deps {
                dependents[d].push(i);
            }
        }
        dependents
    }
}

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Verify that `deps` over `names` form a DAG.
///
/// Builds a `DiGraph` with an edge from each dependency to its dependent and
/// runs `petgraph::algo::toposort`.
pub(crate) fn ensure_acyclic(names: &[&str], deps: &[Vec<usize>]) -> Result<(), DefinitionError> {
    let mut graph = DiGraph::<&str, ()>::new();
    let indices: Vec<_> = names.iter().map(|n| graph.add_node(*n)).collect();

    for (to, node_deps) in deps.iter().enumerate() {
        for &from in node_deps {
            graph.add_edge(indices[from], indices[to], ());
        }
    }

    toposort(&graph, None).map_err(|cycle| DefinitionError::Cycle {
        node: graph[cycle.node_id()].to_string(),
    })?;

    Ok(())
}

// ---------------------------------------------------------------------------
// Wave planning
// ---------------------------------------------------------------------------

/// Group node indices into waves: each node's depth is one more than the
/// deepest of its dependencies, and every node in a wave may run concurrently
/// once the previous waves completed.
///
/// Assumes `deps` is acyclic and only points backwards (guaranteed for
/// compiled scopes).
pub(crate) fn plan_waves(deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    if deps.is_empty() {
        return vec![];
    }

    let mut depths: HashMap<usize, usize> = HashMap::new();
    for (i, node_deps) in deps.iter().enumerate() {
        let depth = node_deps
            .iter()
            .map(|d| depths.get(d).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        depths.insert(i, depth);
    }

    let max_depth = depths.values().copied().max().unwrap_or(0);
    let mut waves: Vec<Vec<usize>> = vec![vec![]; max_depth + 1];
    for i in 0..deps.len() {
        waves[depths[&i]].push(i);
    }
    waves
}
