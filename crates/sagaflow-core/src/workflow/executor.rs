//! Run executor: ready-based concurrent execution and LIFO unwind.
//!
//! # Execution flow
//!
//! 1. Record the run (`Pending`, then `Running`) and publish `RunStarted`.
//! 2. Walk the root scope: every node whose in-scope dependencies completed
//!    is spawned onto a `JoinSet`. Containers (conditionals, parallel groups)
//!    run their nested scope the same way.
//! 3. The first failure, timeout or cancel request halts the run: nothing new
//!    is launched, in-flight nodes are drained, and every failure is recorded
//!    in the order it happened.
//! 4. A halted run moves to `Compensating`, unwinds its compensation log
//!    newest-first (collecting compensation failures without stopping), and
//!    ends `Failed` with the first failure as the cause.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use sagaflow_types::config::EngineConfig;
use sagaflow_types::event::WorkflowEvent;
use sagaflow_types::workflow::{CompensationMode, NodeKind, NodeStatus, RunStatus, StepOptions};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::repository::run::RunRepository;

use super::checkpoint::{CheckpointError, CheckpointManager, NodeTransition};
use super::compensation::{
    CompensationEntry, CompensationFailure, CompensationLog, CompensationOutcome, Compensator,
};
use super::context::ExecutionContext;
use super::dag::{CompiledBody, CompiledNode, Scope};
use super::definition::WorkflowDefinition;
use super::hook::HookRegistry;
use super::node::{InputMapper, Inputs};
use super::result::{RunError, RunFailure, RunReport, RunResult};
use super::retry::RetryHandler;
use super::step::{BoxStep, StepContext, StepError};

// ---------------------------------------------------------------------------
// Shared engine state
// ---------------------------------------------------------------------------

/// Engine-wide collaborators shared by every run.
pub(crate) struct EngineShared<R: RunRepository> {
    pub config: EngineConfig,
    pub hooks: HookRegistry,
    pub event_bus: EventBus,
    pub checkpoint: CheckpointManager<R>,
}

impl<R: RunRepository> EngineShared<R> {
    fn log_checkpoint<T>(&self, run_id: Uuid, result: Result<T, CheckpointError>) {
        if let Err(e) = result {
            tracing::warn!(run_id = %run_id, error = %e, "checkpoint write failed");
        }
    }
}

// ---------------------------------------------------------------------------
// RunSignal
// ---------------------------------------------------------------------------

/// Halt and interrupt state of one run.
///
/// `halt` fires on the first failure of any kind and stops new launches.
/// `interrupt` fires only for timeouts and cancel requests; a child run's
/// interrupt token is a child of its parent's, so interrupting a parent also
/// stops launches in nested runs.
#[derive(Clone)]
pub(crate) struct RunSignal {
    halt: CancellationToken,
    interrupt: CancellationToken,
    errors: Arc<Mutex<Vec<RunError>>>,
}

impl RunSignal {
    pub fn new() -> Self {
        Self {
            halt: CancellationToken::new(),
            interrupt: CancellationToken::new(),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn child(&self) -> Self {
        Self {
            halt: CancellationToken::new(),
            interrupt: self.interrupt.child_token(),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Record a node failure and halt the run.
    fn fail(&self, error: RunError) {
        self.errors
            .lock()
            .expect("run errors lock poisoned")
            .push(error);
        self.halt.cancel();
    }

    /// Interrupt the run (timeout or cancel). Returns `false` if it was
    /// already interrupted.
    pub fn interrupt(&self, reason: RunError) -> bool {
        let mut errors = self.errors.lock().expect("run errors lock poisoned");
        if self.interrupt.is_cancelled() {
            return false;
        }
        errors.push(reason);
        self.interrupt.cancel();
        self.halt.cancel();
        true
    }

    /// Whether a timeout or cancel request reached this run.
    fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    fn should_stop(&self) -> bool {
        self.halt.is_cancelled() || self.interrupt.is_cancelled()
    }

    fn take_errors(&self) -> Vec<RunError> {
        std::mem::take(&mut *self.errors.lock().expect("run errors lock poisoned"))
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Marker returned when a scope stopped because the run halted. The reason
/// lives in the run's `RunSignal`.
struct Halt;

/// Everything owned by one run.
pub(crate) struct RunState<R: RunRepository> {
    shared: Arc<EngineShared<R>>,
    run_id: Uuid,
    workflow: WorkflowDefinition,
    parent_run_id: Option<Uuid>,
    depth: u32,
    context: Mutex<ExecutionContext>,
    log: Mutex<CompensationLog>,
    signal: RunSignal,
    permits: Option<Arc<Semaphore>>,
}

impl<R: RunRepository> RunState<R> {
    /// State for a top-level run.
    pub fn new(
        shared: Arc<EngineShared<R>>,
        workflow: WorkflowDefinition,
        run_id: Uuid,
        input: Value,
        signal: RunSignal,
    ) -> Self {
        let permits = shared
            .config
            .max_concurrent_nodes
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            context: Mutex::new(ExecutionContext::new(run_id, workflow.id(), input)),
            log: Mutex::new(CompensationLog::default()),
            shared,
            run_id,
            workflow,
            parent_run_id: None,
            depth: 0,
            signal,
            permits,
        }
    }

    /// State for a sub-workflow run nested under `self`.
    fn child(&self, workflow: WorkflowDefinition, run_id: Uuid, input: Value) -> Self {
        Self {
            context: Mutex::new(ExecutionContext::new(run_id, workflow.id(), input)),
            log: Mutex::new(CompensationLog::default()),
            shared: Arc::clone(&self.shared),
            run_id,
            workflow,
            parent_run_id: Some(self.run_id),
            depth: self.depth + 1,
            signal: self.signal.child(),
            permits: self.permits.clone(),
        }
    }

    fn publish(&self, event: WorkflowEvent) {
        self.shared.event_bus.publish(event);
    }

    async fn checkpoint_node(&self, transition: NodeTransition<'_>) {
        let result = self.shared.checkpoint.checkpoint_node(transition).await;
        self.shared.log_checkpoint(transition.run_id, result);
    }

    async fn checkpoint_status(&self, status: RunStatus, error: Option<&str>, with_context: bool) {
        let context = with_context.then(|| self.context_json());
        let result = self
            .shared
            .checkpoint
            .checkpoint_run_status(self.run_id, status, error, context.as_ref())
            .await;
        self.shared.log_checkpoint(self.run_id, result);
    }

    fn context(&self) -> std::sync::MutexGuard<'_, ExecutionContext> {
        self.context
            .lock()
            .expect("execution context lock poisoned")
    }

    fn context_json(&self) -> Value {
        self.context().to_json()
    }

    fn inputs_for(&self, node: &CompiledNode) -> Inputs {
        self.context().inputs_for(&node.reads)
    }

    fn step_context(&self, node: &str, attempt: u32) -> StepContext {
        StepContext {
            run_id: self.run_id,
            workflow_id: self.workflow.id().to_string(),
            node: node.to_string(),
            attempt,
        }
    }

    /// Record a node's output and publish its completion.
    async fn record(
        &self,
        node: &CompiledNode,
        output: Value,
        started: Instant,
        compensatable: bool,
    ) -> Result<(), Halt> {
        let recorded = self.context().record_output(&node.name, output.clone());
        if let Err(e) = recorded {
            return Err(self.fail(RunError::Context {
                node: node.name.clone(),
                message: e.to_string(),
            }));
        }

        self.publish(WorkflowEvent::NodeCompleted {
            run_id: self.run_id,
            node: node.name.clone(),
            kind: node.kind,
            duration_ms: started.elapsed().as_millis() as u64,
            compensatable,
        });
        self.checkpoint_node(
            NodeTransition::new(self.run_id, &node.name, node.kind, NodeStatus::Completed)
                .output(&output),
        )
        .await;
        Ok(())
    }

    /// Append a committed entry to the compensation log.
    fn commit(&self, entry: CompensationEntry) {
        tracing::debug!(
            run_id = %self.run_id,
            node = entry.node.as_str(),
            "committed compensatable node"
        );
        self.log
            .lock()
            .expect("compensation log lock poisoned")
            .push(entry);
    }

    fn take_log(&self) -> CompensationLog {
        self.log
            .lock()
            .expect("compensation log lock poisoned")
            .take()
    }

    fn fail(&self, error: RunError) -> Halt {
        tracing::debug!(run_id = %self.run_id, error = %error, "node failed, halting run");
        self.signal.fail(error);
        Halt
    }

    /// Apply an input mapper (or the default shape) to resolved reads.
    fn map_input(&self, node: &CompiledNode, mapper: Option<&InputMapper>) -> Result<Value, Halt> {
        let inputs = self.inputs_for(node);
        let Some(mapper) = mapper else {
            return Ok(inputs.default_input());
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| mapper(&inputs))) {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.fail(RunError::Transform {
                node: node.name.clone(),
                message: e.to_string(),
            })),
            Err(panic) => Err(self.fail(RunError::Transform {
                node: node.name.clone(),
                message: format!("input mapper panicked: {}", panic_message(panic.as_ref())),
            })),
        }
    }
}

// ---------------------------------------------------------------------------
// Run lifecycle
// ---------------------------------------------------------------------------

/// Execute a run to its terminal state.
pub(crate) async fn execute<R: RunRepository>(
    state: Arc<RunState<R>>,
    timeout: Option<Duration>,
) -> RunReport {
    let started = Instant::now();
    let run_id = state.run_id;
    let workflow_id = state.workflow.id().to_string();
    let input = state.context().input();

    let created = state
        .shared
        .checkpoint
        .checkpoint_run_created(run_id, &workflow_id, state.parent_run_id, &input)
        .await;
    state.shared.log_checkpoint(run_id, created);
    state
        .checkpoint_status(RunStatus::Running, None, false)
        .await;

    state.publish(WorkflowEvent::RunStarted {
        run_id,
        workflow_id: workflow_id.clone(),
        parent_run_id: state.parent_run_id,
    });
    tracing::info!(
        run_id = %run_id,
        workflow = workflow_id.as_str(),
        parent_run_id = ?state.parent_run_id,
        "starting workflow run"
    );

    let timer = timeout.map(|deadline| {
        let signal = state.signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            if signal.interrupt(RunError::TimedOut(deadline)) {
                tracing::warn!(run_id = %run_id, ?deadline, "run deadline reached");
            }
        })
    });

    let outcome = run_scope(Arc::clone(&state), Arc::clone(state.workflow.root())).await;

    if let Some(timer) = timer {
        timer.abort();
    }

    // An interrupt that lands while the last nodes are in flight still fails the run.
    let outcome = match outcome {
        Ok(()) if state.signal.is_interrupted() => Err(Halt),
        other => other,
    };

    let (status, result) = match outcome {
        Ok(()) => {
            let output = state
                .workflow
                .output_node()
                .map(|node| state.context().resolve(node))
                .unwrap_or(Value::Null);
            let nodes_completed = state.context().completed_count() as u32;
            let duration_ms = started.elapsed().as_millis() as u64;

            state
                .checkpoint_status(RunStatus::Succeeded, None, true)
                .await;
            state.publish(WorkflowEvent::RunSucceeded {
                run_id,
                workflow_id: workflow_id.clone(),
                duration_ms,
                nodes_completed,
            });
            tracing::info!(
                run_id = %run_id,
                workflow = workflow_id.as_str(),
                duration_ms,
                nodes_completed,
                "workflow run succeeded"
            );

            (RunStatus::Succeeded, RunResult::Succeeded(output))
        }
        Err(Halt) => {
            let mut errors = state.signal.take_errors();
            let cause = if errors.is_empty() {
                RunError::Cancelled
            } else {
                errors.remove(0)
            };

            state
                .checkpoint_status(RunStatus::Compensating, None, false)
                .await;
            let log = state.take_log();
            state.publish(WorkflowEvent::CompensationStarted {
                run_id,
                entries: log.len(),
            });
            tracing::info!(
                run_id = %run_id,
                cause = %cause,
                entries = log.len(),
                "compensating workflow run"
            );

            let compensation = unwind(Arc::clone(&state.shared), log, None).await;
            let failure = RunFailure {
                cause,
                concurrent: errors,
                compensation,
            };
            let message = failure.to_string();

            state
                .checkpoint_status(RunStatus::Failed, Some(&message), true)
                .await;
            state.publish(WorkflowEvent::RunFailed {
                run_id,
                workflow_id: workflow_id.clone(),
                error_kind: failure.kind(),
                error: message.clone(),
                compensation_failures: failure.compensation.failures.len() as u32,
            });
            tracing::error!(
                run_id = %run_id,
                workflow = workflow_id.as_str(),
                error_kind = %failure.kind(),
                compensated = failure.compensation.compensated.len(),
                compensation_failures = failure.compensation.failures.len(),
                "workflow run failed: {message}"
            );

            (RunStatus::Failed, RunResult::Failed(failure))
        }
    };

    let context = state.context().clone();
    RunReport {
        run_id,
        workflow_id,
        status,
        result,
        context,
        duration: started.elapsed(),
    }
}

// ---------------------------------------------------------------------------
// Scope execution
// ---------------------------------------------------------------------------

/// Run every node of `scope`, launching each as soon as its in-scope
/// dependencies completed. Returns `Err(Halt)` if the run halted before the
/// scope finished.
fn run_scope<R: RunRepository>(
    state: Arc<RunState<R>>,
    scope: Arc<Scope>,
) -> BoxFuture<'static, Result<(), Halt>> {
    Box::pin(async move {
        let total = scope.nodes.len();
        let dependents = scope.dependents();
        let mut pending: Vec<usize> = scope.deps.iter().map(Vec::len).collect();
        let mut ready: Vec<usize> = (0..total).filter(|&i| pending[i] == 0).collect();
        let mut tasks: JoinSet<(usize, Result<(), Halt>)> = JoinSet::new();
        let mut completed = 0usize;
        let mut halted = false;

        loop {
            if !halted && state.signal.should_stop() {
                halted = true;
            }
            if !halted {
                // Launch in definition order.
                ready.sort_unstable();
                for i in ready.drain(..) {
                    let state = Arc::clone(&state);
                    let scope = Arc::clone(&scope);
                    tasks.spawn(async move {
                        let node = execute_node(Arc::clone(&state), Arc::clone(&scope), i);
                        let result = AssertUnwindSafe(node)
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|panic| {
                                Err(state.fail(RunError::Panicked {
                                    node: scope.nodes[i].name.clone(),
                                    message: panic_message(panic.as_ref()),
                                }))
                            });
                        (i, result)
                    });
                }
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((i, Ok(()))) => {
                    completed += 1;
                    for &d in &dependents[i] {
                        pending[d] -= 1;
                        if pending[d] == 0 {
                            ready.push(d);
                        }
                    }
                }
                Ok((_, Err(Halt))) => halted = true,
                Err(join_err) => {
                    // Panics are caught inside the task; only runtime shutdown lands here.
                    state.fail(RunError::Panicked {
                        node: "unknown".to_string(),
                        message: join_err.to_string(),
                    });
                    halted = true;
                }
            }
        }

        if completed == total { Ok(()) } else { Err(Halt) }
    })
}

/// Execute a single node of `scope`.
async fn execute_node<R: RunRepository>(
    state: Arc<RunState<R>>,
    scope: Arc<Scope>,
    index: usize,
) -> Result<(), Halt> {
    let node = &scope.nodes[index];
    let started = Instant::now();

    tracing::debug!(
        run_id = %state.run_id,
        node = node.name.as_str(),
        kind = %node.kind,
        "executing node"
    );

    match &node.body {
        CompiledBody::Transform { compute } => {
            let output = state.map_input(node, Some(compute))?;
            state.record(node, output, started, false).await
        }

        CompiledBody::Conditional {
            predicate,
            scope: nested,
        } => {
            let inputs = state.inputs_for(node);
            let evaluated = std::panic::catch_unwind(AssertUnwindSafe(|| predicate(&inputs)));
            let matched = match evaluated {
                Ok(Ok(matched)) => matched,
                Ok(Err(e)) => {
                    return Err(state.fail(RunError::Transform {
                        node: node.name.clone(),
                        message: e.to_string(),
                    }));
                }
                Err(panic) => {
                    return Err(state.fail(RunError::Transform {
                        node: node.name.clone(),
                        message: format!("predicate panicked: {}", panic_message(panic.as_ref())),
                    }));
                }
            };

            if matched {
                run_scope(Arc::clone(&state), Arc::clone(nested)).await?;
            } else {
                skip_descendants(&state, node).await?;
            }
            state
                .record(
                    node,
                    serde_json::json!({ "matched": matched }),
                    started,
                    false,
                )
                .await
        }

        CompiledBody::Parallel { scope: nested } => {
            run_scope(Arc::clone(&state), Arc::clone(nested)).await?;
            let members: serde_json::Map<String, Value> = {
                let ctx = state.context();
                nested
                    .nodes
                    .iter()
                    .map(|m| (m.name.clone(), ctx.resolve(&m.name)))
                    .collect()
            };
            state
                .record(node, Value::Object(members), started, false)
                .await
        }

        CompiledBody::Step {
            step,
            input,
            options,
        } => {
            let input = state.map_input(node, input.as_ref())?;
            let (output, ctx) =
                invoke_with_policy(&state, &node.name, node.kind, step, options, input.clone())
                    .await?;

            let compensatable = step.compensation_mode() == CompensationMode::Compensatable;
            if compensatable {
                state.commit(CompensationEntry {
                    node: node.name.clone(),
                    kind: node.kind,
                    compensator: Compensator::Step(step.clone()),
                    output: output.clone(),
                    input,
                    ctx,
                });
            }
            state.record(node, output, started, compensatable).await
        }

        CompiledBody::SubWorkflow { workflow, input } => {
            execute_sub_workflow(&state, node, workflow, input.as_ref(), started).await
        }

        CompiledBody::Hook { payload } => {
            let payload = state.map_input(node, payload.as_ref())?;
            let handlers = state.shared.hooks.handlers(state.workflow.id(), &node.name);

            let mut outputs = Vec::with_capacity(handlers.len());
            let mut any_compensatable = false;
            for handler in handlers {
                let label = format!("{}:{}", node.name, handler.name);
                let (output, ctx) = invoke_with_policy(
                    &state,
                    &label,
                    NodeKind::Hook,
                    &handler.step,
                    &handler.options,
                    payload.clone(),
                )
                .await?;

                if handler.compensation_mode() == CompensationMode::Compensatable {
                    any_compensatable = true;
                    state.commit(CompensationEntry {
                        node: label,
                        kind: NodeKind::Hook,
                        compensator: Compensator::Step(handler.step.clone()),
                        output: output.clone(),
                        input: payload.clone(),
                        ctx,
                    });
                }
                outputs.push(output);
            }

            let output = if outputs.is_empty() {
                Value::Null
            } else {
                Value::Array(outputs)
            };
            state.record(node, output, started, any_compensatable).await
        }
    }
}

/// Record every node nested under a false conditional as skipped.
async fn skip_descendants<R: RunRepository>(
    state: &RunState<R>,
    node: &CompiledNode,
) -> Result<(), Halt> {
    for (name, kind) in &node.descendants {
        let recorded = state.context().record_skipped(name);
        if let Err(e) = recorded {
            return Err(state.fail(RunError::Context {
                node: name.clone(),
                message: e.to_string(),
            }));
        }
        state.publish(WorkflowEvent::NodeSkipped {
            run_id: state.run_id,
            node: name.clone(),
        });
        state
            .checkpoint_node(NodeTransition::new(state.run_id, name, *kind, NodeStatus::Skipped))
            .await;
    }
    tracing::debug!(
        run_id = %state.run_id,
        node = node.name.as_str(),
        skipped = node.descendants.len(),
        "condition false, subgraph skipped"
    );
    Ok(())
}

/// Invoke a step under its retry policy and per-attempt timeout.
///
/// Returns the output and the context of the successful attempt. A new
/// attempt is not started once the run is halting.
async fn invoke_with_policy<R: RunRepository>(
    state: &RunState<R>,
    label: &str,
    kind: NodeKind,
    step: &BoxStep,
    options: &StepOptions,
    input: Value,
) -> Result<(Value, StepContext), Halt> {
    let timeout = options.timeout().or(state.shared.config.step_timeout());
    let mut attempt = 1;

    loop {
        let ctx = state.step_context(label, attempt);
        state.publish(WorkflowEvent::NodeStarted {
            run_id: state.run_id,
            node: label.to_string(),
            kind,
            attempt,
        });
        state
            .checkpoint_node(
                NodeTransition::new(state.run_id, label, kind, NodeStatus::Running)
                    .attempt(attempt),
            )
            .await;

        let result = {
            let _permit = match &state.permits {
                Some(permits) => Some(permits.acquire().await.map_err(|_| {
                    state.fail(step_error(label, StepError::failed("concurrency limiter closed")))
                })?),
                None => None,
            };

            match timeout {
                Some(limit) => tokio::time::timeout(limit, step.invoke(input.clone(), &ctx))
                    .await
                    .unwrap_or(Err(StepError::Timeout(limit))),
                None => step.invoke(input.clone(), &ctx).await,
            }
        };

        let error = match result {
            Ok(output) => return Ok((output, ctx)),
            Err(error) => error,
        };

        let will_retry = RetryHandler::should_retry(options.retry.as_ref(), attempt, &error)
            && !state.signal.should_stop();

        state.publish(WorkflowEvent::NodeFailed {
            run_id: state.run_id,
            node: label.to_string(),
            error_kind: error.kind(),
            error: error.to_string(),
            will_retry,
        });
        let message = error.to_string();
        state
            .checkpoint_node(
                NodeTransition::new(state.run_id, label, kind, NodeStatus::Failed)
                    .attempt(attempt)
                    .error(&message),
            )
            .await;

        if !will_retry {
            return Err(state.fail(step_error(label, error)));
        }

        tracing::debug!(
            run_id = %state.run_id,
            node = label,
            attempt,
            error = %message,
            "retrying step"
        );
        tokio::time::sleep(RetryHandler::delay(options.retry.as_ref())).await;
        if state.signal.should_stop() {
            return Err(state.fail(step_error(label, error)));
        }
        attempt += 1;
    }
}

fn step_error(node: &str, error: StepError) -> RunError {
    RunError::Step {
        node: node.to_string(),
        error,
    }
}

/// Run a nested workflow as one step of `state`.
async fn execute_sub_workflow<R: RunRepository>(
    state: &Arc<RunState<R>>,
    node: &CompiledNode,
    workflow: &WorkflowDefinition,
    mapper: Option<&InputMapper>,
    started: Instant,
) -> Result<(), Halt> {
    let max = state.shared.config.max_sub_workflow_depth;
    let depth = state.depth + 1;
    if depth > max {
        let error = StepError::DepthExceeded { depth, max };
        return Err(state.fail(step_error(&node.name, error)));
    }

    let input = state.map_input(node, mapper)?;
    let ctx = state.step_context(&node.name, 1);
    state.publish(WorkflowEvent::NodeStarted {
        run_id: state.run_id,
        node: node.name.clone(),
        kind: node.kind,
        attempt: 1,
    });
    state
        .checkpoint_node(
            NodeTransition::new(state.run_id, &node.name, node.kind, NodeStatus::Running)
                .attempt(1),
        )
        .await;

    let child_run_id = Uuid::now_v7();
    let child = Arc::new(state.child(workflow.clone(), child_run_id, input.clone()));
    let report = execute(Arc::clone(&child), None).await;

    match report.result {
        RunResult::Succeeded(output) => {
            let child_log = child.take_log();
            let compensatable = !child_log.is_empty();
            if compensatable {
                state.commit(CompensationEntry {
                    node: node.name.clone(),
                    kind: node.kind,
                    compensator: Compensator::SubWorkflow {
                        run_id: child_run_id,
                        log: child_log,
                    },
                    output: output.clone(),
                    input,
                    ctx,
                });
            }
            state.record(node, output, started, compensatable).await
        }
        RunResult::Failed(failure) => {
            let error = StepError::SubWorkflow {
                workflow_id: workflow.id().to_string(),
                failure: Box::new(failure),
            };
            let message = error.to_string();
            state.publish(WorkflowEvent::NodeFailed {
                run_id: state.run_id,
                node: node.name.clone(),
                error_kind: error.kind(),
                error: message.clone(),
                will_retry: false,
            });
            state
                .checkpoint_node(
                    NodeTransition::new(state.run_id, &node.name, node.kind, NodeStatus::Failed)
                        .attempt(1)
                        .error(&message),
                )
                .await;
            Err(state.fail(step_error(&node.name, error)))
        }
    }
}

// ---------------------------------------------------------------------------
// Unwind
// ---------------------------------------------------------------------------

/// Compensate every entry of `log`, newest first.
///
/// Compensation failures (errors or panics) are collected and the unwind
/// continues. A sub-workflow entry unwinds the child's own log in place, with
/// node names qualified by `prefix`.
fn unwind<R: RunRepository>(
    shared: Arc<EngineShared<R>>,
    log: CompensationLog,
    prefix: Option<String>,
) -> BoxFuture<'static, CompensationOutcome> {
    Box::pin(async move {
        let mut outcome = CompensationOutcome::default();

        for entry in log.into_unwind_order() {
            let label = match &prefix {
                Some(prefix) => format!("{prefix}/{}", entry.node),
                None => entry.node.clone(),
            };
            let run_id = entry.ctx.run_id;

            match entry.compensator {
                Compensator::SubWorkflow {
                    run_id: child_run_id,
                    log,
                } => {
                    tracing::debug!(
                        run_id = %run_id,
                        child_run_id = %child_run_id,
                        node = label.as_str(),
                        entries = log.len(),
                        "unwinding sub-workflow"
                    );
                    let nested = unwind(Arc::clone(&shared), log, Some(label)).await;
                    outcome.merge(nested);
                }
                Compensator::Step(step) => {
                    let undo = step.compensate(entry.output, entry.input, &entry.ctx);
                    let result = AssertUnwindSafe(undo)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            Err(StepError::failed(format!(
                                "compensate panicked: {}",
                                panic_message(panic.as_ref())
                            )))
                        });

                    match result {
                        Ok(()) => {
                            tracing::debug!(run_id = %run_id, node = label.as_str(), "compensated");
                            shared.event_bus.publish(WorkflowEvent::StepCompensated {
                                run_id,
                                node: label.clone(),
                            });
                            let recorded = shared
                                .checkpoint
                                .checkpoint_node(
                                    NodeTransition::new(
                                        run_id,
                                        &entry.ctx.node,
                                        entry.kind,
                                        NodeStatus::Compensated,
                                    )
                                    .attempt(entry.ctx.attempt),
                                )
                                .await;
                            shared.log_checkpoint(run_id, recorded);
                            outcome.compensated.push(label);
                        }
                        Err(e) => {
                            let message = e.to_string();
                            tracing::warn!(
                                run_id = %run_id,
                                node = label.as_str(),
                                error = %message,
                                "compensation failed, continuing unwind"
                            );
                            shared.event_bus.publish(WorkflowEvent::CompensationFailed {
                                run_id,
                                node: label.clone(),
                                error: message.clone(),
                            });
                            let recorded = shared
                                .checkpoint
                                .checkpoint_node(
                                    NodeTransition::new(
                                        run_id,
                                        &entry.ctx.node,
                                        entry.kind,
                                        NodeStatus::CompensationFailed,
                                    )
                                    .attempt(entry.ctx.attempt)
                                    .error(&message),
                                )
                                .await;
                            shared.log_checkpoint(run_id, recorded);
                            outcome.failures.push(CompensationFailure {
                                node: label,
                                error: message,
                            });
                        }
                    }
                }
            }
        }

        outcome
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
