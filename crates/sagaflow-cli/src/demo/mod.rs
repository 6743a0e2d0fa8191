//! Demo workflows run by the CLI.
//!
//! `cancel-order` cancels an order against a [`DemoStore`]: it marks the
//! order cancelled, releases inventory and voids card holds in parallel,
//! refunds captured payments through the `refund-payments` sub-workflow,
//! fires the `order-cancelled` hook and notifies the customer. Faults can be
//! injected by node name to watch the compensation unwind restore the store.

pub mod cancel_order;
pub mod refund_payments;
pub mod store;

use std::collections::HashSet;
use std::sync::Arc;

use sagaflow_core::workflow::engine::WorkflowEngine;
use sagaflow_core::workflow::hook::handler;
use sagaflow_core::workflow::step::{Step, StepContext, StepError};
use sagaflow_types::config::EngineConfig;
use sagaflow_types::workflow::CompensationMode;
use serde_json::Value;

use self::store::DemoStore;

// ---------------------------------------------------------------------------
// Fault injection
// ---------------------------------------------------------------------------

/// Node names whose invoke or compensate should fail.
///
/// Hook handlers are matched by their `{hook}:{handler}` label.
#[derive(Debug, Clone, Default)]
pub struct FaultPlan {
    invoke: Arc<HashSet<String>>,
    compensate: Arc<HashSet<String>>,
}

impl FaultPlan {
    pub fn new(
        invoke: impl IntoIterator<Item = String>,
        compensate: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            invoke: Arc::new(invoke.into_iter().collect()),
            compensate: Arc::new(compensate.into_iter().collect()),
        }
    }

    fn check_invoke(&self, ctx: &StepContext) -> Result<(), StepError> {
        if self.invoke.contains(&ctx.node) {
            return Err(StepError::failed(format!(
                "injected fault at '{}' (attempt {})",
                ctx.node, ctx.attempt
            )));
        }
        Ok(())
    }

    fn check_compensate(&self, ctx: &StepContext) -> Result<(), StepError> {
        if self.compensate.contains(&ctx.node) {
            return Err(StepError::failed(format!("injected compensation fault at '{}'", ctx.node)));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StoreStep
// ---------------------------------------------------------------------------

type Action = fn(&DemoStore, Value) -> Result<Value, StepError>;
/// Receives the invoke's output, then its input.
type Undo = fn(&DemoStore, Value, Value) -> Result<(), StepError>;

/// A step backed by a plain function over the demo store.
pub struct StoreStep {
    store: DemoStore,
    faults: FaultPlan,
    action: Action,
    undo: Option<Undo>,
}

impl StoreStep {
    /// A step with no undo.
    pub fn new(store: &DemoStore, faults: &FaultPlan, action: Action) -> Self {
        Self {
            store: store.clone(),
            faults: faults.clone(),
            action,
            undo: None,
        }
    }

    pub fn with_undo(store: &DemoStore, faults: &FaultPlan, action: Action, undo: Undo) -> Self {
        Self {
            undo: Some(undo),
            ..Self::new(store, faults, action)
        }
    }
}

impl Step for StoreStep {
    fn compensation_mode(&self) -> CompensationMode {
        if self.undo.is_some() {
            CompensationMode::Compensatable
        } else {
            CompensationMode::NonCompensatable
        }
    }

    async fn invoke(&self, input: Value, ctx: &StepContext) -> Result<Value, StepError> {
        self.faults.check_invoke(ctx)?;
        (self.action)(&self.store, input)
    }

    async fn compensate(
        &self,
        output: Value,
        input: Value,
        ctx: &StepContext,
    ) -> Result<(), StepError> {
        let Some(undo) = self.undo else {
            return Err(StepError::NotCompensatable);
        };
        self.faults.check_compensate(ctx)?;
        tracing::debug!(node = ctx.node.as_str(), "undoing demo step");
        undo(&self.store, output, input)
    }
}

// ---------------------------------------------------------------------------
// Field helpers
// ---------------------------------------------------------------------------

/// Read a required string field from a step input or output.
pub(crate) fn str_field<'a>(value: &'a Value, field: &str) -> Result<&'a str, StepError> {
    value[field]
        .as_str()
        .ok_or_else(|| StepError::invalid_data(format!("missing string field '{field}'")))
}

/// Deserialize a required field from a step input or output.
pub(crate) fn parse_field<T: serde::de::DeserializeOwned>(
    value: &Value,
    field: &str,
) -> Result<T, StepError> {
    serde_json::from_value(value[field].clone())
        .map_err(|e| StepError::invalid_data(format!("field '{field}': {e}")))
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> Result<Value, StepError> {
    serde_json::to_value(value).map_err(|e| StepError::failed(e.to_string()))
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

/// An engine with the demo workflows registered, and the store they act on.
pub struct Demo {
    pub engine: WorkflowEngine,
    pub store: DemoStore,
}

/// Register `refund-payments`, `cancel-order` and the `audit-log` handler
/// for the `order-cancelled` hook against a freshly seeded store.
pub fn setup(config: EngineConfig, faults: FaultPlan) -> anyhow::Result<Demo> {
    let store = DemoStore::seeded();
    let engine = WorkflowEngine::new(config);

    let refund = refund_payments::definition(&store, &faults)?;
    engine.register(refund.clone())?;
    engine.register(cancel_order::definition(&store, &faults, &refund)?)?;
    engine.register_hook(
        cancel_order::WORKFLOW_ID,
        cancel_order::ORDER_CANCELLED_HOOK,
        handler(
            "audit-log",
            StoreStep::with_undo(
                &store,
                &faults,
                cancel_order::audit_log,
                cancel_order::retract_audit,
            ),
        ),
    )?;

    tracing::debug!(
        workflows = engine.registry().len(),
        "demo workflows registered"
    );
    Ok(Demo { engine, store })
}
