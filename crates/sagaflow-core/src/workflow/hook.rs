//! Hook handler registry.
//!
//! External code attaches handler steps to a hook point declared by a
//! workflow, without modifying the workflow. Handlers for one
//! `(workflow, hook)` pair run in registration order. The executor reads the
//! handler list when the hook node executes, so registrations made before a
//! run reaches the hook take effect in that run.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use sagaflow_types::workflow::{CompensationMode, RetryConfig, StepOptions};

use super::registry::RegistryError;
use super::step::{BoxStep, Step};

/// A named step attached to a hook point.
#[derive(Clone, Debug)]
pub struct HookHandler {
    pub name: String,
    pub(crate) step: BoxStep,
    pub options: StepOptions,
}

/// Create a hook handler.
pub fn handler(name: impl Into<String>, step: impl Step) -> HookHandler {
    HookHandler {
        name: name.into(),
        step: BoxStep::new(step),
        options: StepOptions::default(),
    }
}

impl HookHandler {
    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.options.retry = Some(retry);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn compensation_mode(&self) -> CompensationMode {
        self.step.compensation_mode()
    }
}

/// Handlers keyed by `(workflow id, hook name)`.
#[derive(Clone, Default)]
pub struct HookRegistry {
    handlers: Arc<DashMap<(String, String), Vec<HookHandler>>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler. Names must be unique per hook and the handler must
    /// declare its compensation choice.
    pub fn register(
        &self,
        workflow_id: &str,
        hook: &str,
        handler: HookHandler,
    ) -> Result<(), RegistryError> {
        if handler.compensation_mode() == CompensationMode::Undeclared {
            return Err(RegistryError::UndeclaredCompensation {
                hook: hook.to_string(),
                handler: handler.name,
            });
        }

        let mut entry = self
            .handlers
            .entry((workflow_id.to_string(), hook.to_string()))
            .or_default();
        if entry.iter().any(|h| h.name == handler.name) {
            return Err(RegistryError::DuplicateHandler {
                workflow_id: workflow_id.to_string(),
                hook: hook.to_string(),
                handler: handler.name,
            });
        }

        tracing::debug!(
            workflow = workflow_id,
            hook,
            handler = handler.name.as_str(),
            "registered hook handler"
        );
        entry.push(handler);
        Ok(())
    }

    /// Snapshot of the handlers for a hook, in registration order.
    pub fn handlers(&self, workflow_id: &str, hook: &str) -> Vec<HookHandler> {
        self.handlers
            .get(&(workflow_id.to_string(), hook.to_string()))
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    /// Drop every handler registered for a workflow.
    pub fn clear_workflow(&self, workflow_id: &str) {
        self.handlers.retain(|(wf, _), _| wf != workflow_id);
    }

    pub fn clear(&self) {
        self.handlers.clear();
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.handlers.len())
            .finish()
    }
}
