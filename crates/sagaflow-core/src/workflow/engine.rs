//! The workflow engine: registration, runs, hooks and cancellation.
//!
//! `WorkflowEngine` owns the workflow registry, the hook registry, the event
//! bus and the checkpoint layer. Runs are independent: each one gets its own
//! execution context, compensation log and halt signal. The engine is cheap
//! to clone and safe to share across tasks.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sagaflow_types::config::EngineConfig;
use sagaflow_types::event::WorkflowEvent;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::repository::memory::InMemoryRunRepository;
use crate::repository::run::RunRepository;

use super::checkpoint::CheckpointManager;
use super::definition::{DefinitionError, WorkflowDefinition};
use super::executor::{self, EngineShared, RunSignal, RunState};
use super::hook::{HookHandler, HookRegistry};
use super::registry::{RegistryError, WorkflowRegistry};
use super::result::{RunError, RunOptions, RunReport, RunResult};

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Runs registered workflows with saga semantics.
///
/// Generic over `R: RunRepository` for the checkpoint store; defaults to the
/// in-memory repository.
pub struct WorkflowEngine<R: RunRepository = InMemoryRunRepository> {
    shared: Arc<EngineShared<R>>,
    registry: WorkflowRegistry,
    /// Halt signals of in-progress runs keyed by run_id.
    active: Arc<DashMap<Uuid, RunSignal>>,
}

impl<R: RunRepository> Clone for WorkflowEngine<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            registry: self.registry.clone(),
            active: Arc::clone(&self.active),
        }
    }
}

impl WorkflowEngine<InMemoryRunRepository> {
    /// Create an engine that checkpoints into memory.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_repository(config, InMemoryRunRepository::new())
    }
}

impl Default for WorkflowEngine<InMemoryRunRepository> {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl<R: RunRepository> WorkflowEngine<R> {
    /// Create an engine that checkpoints through `repo`.
    pub fn with_repository(config: EngineConfig, repo: R) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity);
        Self {
            shared: Arc::new(EngineShared {
                config,
                hooks: HookRegistry::new(),
                event_bus,
                checkpoint: CheckpointManager::new(repo),
            }),
            registry: WorkflowRegistry::new(),
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &WorkflowRegistry {
        &self.registry
    }

    /// The checkpoint store.
    pub fn repository(&self) -> &R {
        self.shared.checkpoint.repo()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.shared.event_bus
    }

    /// Subscribe to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.shared.event_bus.subscribe()
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    /// Register a workflow definition. Returns its identifier.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<String, EngineError> {
        Ok(self.registry.register(definition)?)
    }

    /// Remove a workflow and every hook handler attached to it.
    pub fn unregister(&self, workflow_id: &str) -> Option<WorkflowDefinition> {
        self.shared.hooks.clear_workflow(workflow_id);
        self.registry.unregister(workflow_id)
    }

    /// Attach a handler to a hook declared by a registered workflow.
    ///
    /// The handler takes effect for every run that reaches the hook after
    /// this call returns.
    pub fn register_hook(
        &self,
        workflow_id: &str,
        hook: &str,
        handler: HookHandler,
    ) -> Result<(), EngineError> {
        let definition = self
            .registry
            .get(workflow_id)
            .ok_or_else(|| RegistryError::UnknownWorkflow(workflow_id.to_string()))?;
        if !definition.has_hook(hook) {
            return Err(RegistryError::UnknownHook {
                workflow_id: workflow_id.to_string(),
                hook: hook.to_string(),
            }
            .into());
        }

        self.shared.hooks.register(workflow_id, hook, handler)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Runs
    // -----------------------------------------------------------------------

    /// Run a registered workflow to its terminal state.
    pub async fn run(&self, workflow_id: &str, input: Value) -> Result<RunResult, EngineError> {
        let report = self
            .run_with(workflow_id, input, RunOptions::default())
            .await?;
        Ok(report.result)
    }

    /// Run a registered workflow with explicit options, returning the full report.
    pub async fn run_with(
        &self,
        workflow_id: &str,
        input: Value,
        options: RunOptions,
    ) -> Result<RunReport, EngineError> {
        let definition = self
            .registry
            .get(workflow_id)
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;
        self.run_definition(&definition, input, options).await
    }

    /// Run a definition that need not be registered.
    ///
    /// Hook handlers are looked up by the definition's id, so hooks only fire
    /// for definitions whose id has handlers attached.
    pub async fn run_definition(
        &self,
        definition: &WorkflowDefinition,
        input: Value,
        options: RunOptions,
    ) -> Result<RunReport, EngineError> {
        let run_id = options.run_id.unwrap_or_else(Uuid::now_v7);
        let signal = RunSignal::new();

        match self.active.entry(run_id) {
            Entry::Occupied(_) => return Err(EngineError::DuplicateRun(run_id)),
            Entry::Vacant(slot) => {
                slot.insert(signal.clone());
            }
        }
        let _guard = ActiveRunGuard {
            active: Arc::clone(&self.active),
            run_id,
        };

        let timeout = options.timeout.or(self.shared.config.run_timeout());
        let state = Arc::new(RunState::new(
            Arc::clone(&self.shared),
            definition.clone(),
            run_id,
            input,
            signal,
        ));

        Ok(executor::execute(state, timeout).await)
    }

    /// Request cancellation of an in-progress run.
    ///
    /// No new node is started; in-flight nodes finish, then the run unwinds
    /// and fails with [`RunError::Cancelled`].
    pub fn cancel(&self, run_id: Uuid) -> Result<(), EngineError> {
        let signal = self
            .active
            .get(&run_id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::RunNotFound(run_id))?;

        if signal.interrupt(RunError::Cancelled) {
            self.shared
                .event_bus
                .publish(WorkflowEvent::RunCancelRequested { run_id });
            tracing::info!(run_id = %run_id, "workflow run cancel requested");
        }
        Ok(())
    }

    /// Ids of runs currently in progress.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    /// Cancel every in-progress run and drop all registrations.
    pub fn teardown(&self) {
        for entry in self.active.iter() {
            entry.value().interrupt(RunError::Cancelled);
        }
        self.registry.clear();
        self.shared.hooks.clear();
        tracing::info!("workflow engine torn down");
    }
}

impl<R: RunRepository> std::fmt::Debug for WorkflowEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("workflows", &self.registry.ids())
            .field("hooks", &self.shared.hooks)
            .field("active_runs", &self.active.len())
            .finish()
    }
}

/// Removes a run from the active set when the run future completes or is dropped.
struct ActiveRunGuard {
    active: Arc<DashMap<Uuid, RunSignal>>,
    run_id: Uuid,
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        self.active.remove(&self.run_id);
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Errors raised before a run starts, or by registration and cancel calls.
///
/// A run that started always produces a [`RunResult`]; its failures are
/// reported there, not here.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No workflow with this id is registered.
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow or hook registration failed.
    #[error("registration error: {0}")]
    Registry(#[from] RegistryError),

    /// The workflow definition is invalid.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// No in-progress run with this id.
    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// A run with this id is already in progress.
    #[error("workflow run already in progress: {0}")]
    DuplicateRun(Uuid),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
