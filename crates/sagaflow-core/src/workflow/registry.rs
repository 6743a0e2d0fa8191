//! Process-scoped workflow registry.
//!
//! Holds registered [`WorkflowDefinition`]s keyed by id. Owned by the engine
//! (or shared by cloning); explicit registration, lookup and teardown replace
//! any global state.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::definition::WorkflowDefinition;

/// Registered workflow definitions keyed by id. Clones share the same map.
#[derive(Clone, Default)]
pub struct WorkflowRegistry {
    workflows: Arc<DashMap<String, WorkflowDefinition>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Ids are unique; re-registering is an error.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<String, RegistryError> {
        let id = definition.id().to_string();
        match self.workflows.entry(id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateWorkflow(id)),
            Entry::Vacant(slot) => {
                slot.insert(definition);
                tracing::debug!(workflow = id.as_str(), "registered workflow");
                Ok(id)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<WorkflowDefinition> {
        self.workflows.get(id).map(|d| d.clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.workflows.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.workflows.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn unregister(&self, id: &str) -> Option<WorkflowDefinition> {
        self.workflows.remove(id).map(|(_, d)| d)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    pub fn clear(&self) {
        self.workflows.clear();
    }
}

impl std::fmt::Debug for WorkflowRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowRegistry")
            .field("workflows", &self.ids())
            .finish()
    }
}

/// Errors raised by workflow and hook registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A workflow with this id is already registered.
    #[error("workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    /// Hook registration named a workflow that is not registered.
    #[error("workflow '{0}' is not registered")]
    UnknownWorkflow(String),

    /// Hook registration named a hook the workflow does not declare.
    #[error("workflow '{workflow_id}' declares no hook '{hook}'")]
    UnknownHook { workflow_id: String, hook: String },

    /// A handler with this name is already attached to the hook.
    #[error("hook '{hook}' of workflow '{workflow_id}' already has handler '{handler}'")]
    DuplicateHandler {
        workflow_id: String,
        hook: String,
        handler: String,
    },

    /// The handler step never declared its compensation choice.
    #[error("handler '{handler}' for hook '{hook}' must declare compensation or be marked non-compensatable")]
    UndeclaredCompensation { hook: String, handler: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definition::WorkflowBuilder;
    use crate::workflow::node::transform;

    fn workflow(id: &str) -> WorkflowDefinition {
        WorkflowBuilder::new(id)
            .then(transform("t", &[], |_| Ok(serde_json::Value::Null)))
            .build()
            .unwrap()
    }

    #[test]
    fn register_and_lookup() {
        let registry = WorkflowRegistry::new();
        let id = registry.register(workflow("cancel-order")).unwrap();
        assert_eq!(id, "cancel-order");
        assert!(registry.contains("cancel-order"));
        assert_eq!(registry.get("cancel-order").unwrap().id(), "cancel-order");
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn duplicate_id_is_rejected() {
        let registry = WorkflowRegistry::new();
        registry.register(workflow("wf")).unwrap();
        let err = registry.register(workflow("wf")).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateWorkflow("wf".to_string()));
    }

    #[test]
    fn ids_are_sorted_and_teardown_clears() {
        let registry = WorkflowRegistry::new();
        registry.register(workflow("refund-payments")).unwrap();
        registry.register(workflow("cancel-order")).unwrap();
        assert_eq!(registry.ids(), vec!["cancel-order", "refund-payments"]);
        assert_eq!(registry.len(), 2);

        assert!(registry.unregister("cancel-order").is_some());
        assert_eq!(registry.len(), 1);

        let clone = registry.clone();
        clone.clear();
        assert!(registry.is_empty());
    }
}
