//! The `cancel-order` workflow.
//!
//! ```text
//! load-order
//!   -> mark-cancelled
//!     -> release { release-inventory | void-authorization }
//!     -> was-paid? -> refund (refund-payments)
//!     -> order-cancelled (hook)
//!       -> notify-customer (after release and was-paid)
//! summary (output)
//! ```

use std::time::Duration;

use sagaflow_core::workflow::definition::{DefinitionError, WorkflowBuilder, WorkflowDefinition};
use sagaflow_core::workflow::node::{
    Inputs, TransformError, hook, parallelize, run_as_step, step, transform, when,
};
use sagaflow_core::workflow::step::StepError;
use sagaflow_types::workflow::RetryConfig;
use serde_json::{Value, json};

use super::store::{DemoStore, LineItem, OrderStatus};
use super::{FaultPlan, StoreStep, parse_field, str_field, to_json};

pub const WORKFLOW_ID: &str = "cancel-order";

/// Hook fired once the order is marked cancelled. Payload: the
/// `mark-cancelled` output.
pub const ORDER_CANCELLED_HOOK: &str = "order-cancelled";

pub fn definition(
    store: &DemoStore,
    faults: &FaultPlan,
    refund: &WorkflowDefinition,
) -> Result<WorkflowDefinition, DefinitionError> {
    let order_for_release =
        |i: &Inputs| -> Result<Value, TransformError> { Ok(i.get("load-order").clone()) };

    WorkflowBuilder::new(WORKFLOW_ID)
        .then(step("load-order", StoreStep::new(store, faults, load_order)))
        .then(
            step(
                "mark-cancelled",
                StoreStep::with_undo(store, faults, mark_cancelled, restore_status),
            )
            .reads(&["load-order"]),
        )
        .then(parallelize(
            "release",
            vec![
                step(
                    "release-inventory",
                    StoreStep::with_undo(store, faults, release_inventory, reserve_inventory),
                )
                .reads(&["load-order", "mark-cancelled"])
                .map_input(order_for_release)
                .into(),
                step(
                    "void-authorization",
                    StoreStep::with_undo(store, faults, void_authorization, restore_hold),
                )
                .reads(&["load-order", "mark-cancelled"])
                .map_input(order_for_release)
                .into(),
            ],
        ))
        .then(
            when("was-paid", &["load-order", "mark-cancelled"], |i| {
                Ok(i.get("load-order")["paid"].as_bool().unwrap_or(false))
            })
            .then(vec![
                run_as_step("refund", refund)
                    .reads(&["load-order"])
                    .map_input(|i| Ok(json!({ "order_id": i.get("load-order")["id"] })))
                    .into(),
            ]),
        )
        .then(hook(ORDER_CANCELLED_HOOK).reads(&["mark-cancelled"]))
        .then(
            step(
                "notify-customer",
                StoreStep::new(store, faults, notify_customer),
            )
            .reads(&["mark-cancelled", "release", "was-paid"])
            .map_input(|i| Ok(i.get("mark-cancelled").clone()))
            .retry(RetryConfig::attempts(3).with_interval(Duration::from_millis(50))),
        )
        .then(transform(
            "summary",
            &["load-order", "release-inventory", "refund"],
            summarize,
        ))
        .output("summary")
        .build()
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

fn load_order(store: &DemoStore, input: Value) -> Result<Value, StepError> {
    let id = str_field(&input, "order_id")?;
    let order = store.order(id)?;
    match order.status {
        OrderStatus::Shipped => {
            return Err(StepError::not_allowed(format!("order '{id}' has already shipped")));
        }
        OrderStatus::Cancelled => {
            return Err(StepError::not_allowed(format!("order '{id}' is already cancelled")));
        }
        OrderStatus::Placed => {}
    }
    to_json(&order)
}

fn mark_cancelled(store: &DemoStore, order: Value) -> Result<Value, StepError> {
    let id = str_field(&order, "id")?;
    let previous = store.set_order_status(id, OrderStatus::Cancelled)?;
    Ok(json!({ "order_id": id, "previous": previous }))
}

fn restore_status(store: &DemoStore, output: Value, _input: Value) -> Result<(), StepError> {
    let id = str_field(&output, "order_id")?;
    let previous: OrderStatus = parse_field(&output, "previous")?;
    store.set_order_status(id, previous)?;
    Ok(())
}

fn release_inventory(store: &DemoStore, order: Value) -> Result<Value, StepError> {
    let id = str_field(&order, "id")?;
    let items: Vec<LineItem> = parse_field(&order, "items")?;
    for item in &items {
        store.release_stock(&item.sku, item.quantity);
    }
    Ok(json!({ "order_id": id, "released": items }))
}

fn reserve_inventory(store: &DemoStore, output: Value, _input: Value) -> Result<(), StepError> {
    let items: Vec<LineItem> = parse_field(&output, "released")?;
    for item in &items {
        store.reserve_stock(&item.sku, item.quantity)?;
    }
    Ok(())
}

fn void_authorization(store: &DemoStore, order: Value) -> Result<Value, StepError> {
    let id = str_field(&order, "id")?;
    let voided = store.set_hold(id, false)?;
    Ok(json!({ "order_id": id, "voided": voided }))
}

fn restore_hold(store: &DemoStore, output: Value, _input: Value) -> Result<(), StepError> {
    if output["voided"].as_bool().unwrap_or(false) {
        store.set_hold(str_field(&output, "order_id")?, true)?;
    }
    Ok(())
}

fn notify_customer(store: &DemoStore, cancelled: Value) -> Result<Value, StepError> {
    let id = str_field(&cancelled, "order_id")?;
    let message = format!("order {id} has been cancelled");
    store.send(message.clone());
    Ok(json!({ "order_id": id, "message": message }))
}

/// `audit-log` handler for [`ORDER_CANCELLED_HOOK`].
pub(crate) fn audit_log(store: &DemoStore, cancelled: Value) -> Result<Value, StepError> {
    let id = str_field(&cancelled, "order_id")?;
    let previous = cancelled["previous"].as_str().unwrap_or("unknown");
    let entry = format!("audit: order {id} cancelled (was {previous})");
    store.send(entry.clone());
    Ok(json!({ "entry": entry }))
}

pub(crate) fn retract_audit(
    store: &DemoStore,
    output: Value,
    _input: Value,
) -> Result<(), StepError> {
    let entry = str_field(&output, "entry")?;
    if !store.retract(entry) {
        return Err(StepError::not_found(format!("audit entry '{entry}'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn summarize(i: &Inputs) -> Result<Value, TransformError> {
    let order = i.get("load-order");
    let released: Vec<LineItem> =
        serde_json::from_value(i.get("release-inventory")["released"].clone())?;
    let units: u32 = released.iter().map(|item| item.quantity).sum();
    // `refund` resolves to null when the order was never paid.
    let refunded = i.get("refund")["amount_cents"].as_u64().unwrap_or(0);

    Ok(json!({
        "order_id": order["id"],
        "status": OrderStatus::Cancelled,
        "released_units": units,
        "refunded_cents": refunded,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sagaflow_types::workflow::NodeKind;

    fn build() -> WorkflowDefinition {
        let store = DemoStore::seeded();
        let faults = FaultPlan::default();
        let refund = super::super::refund_payments::definition(&store, &faults).unwrap();
        definition(&store, &faults, &refund).unwrap()
    }

    #[test]
    fn declares_hook_and_output() {
        let wf = build();
        assert_eq!(wf.id(), WORKFLOW_ID);
        assert_eq!(wf.hooks(), [ORDER_CANCELLED_HOOK.to_string()]);
        assert_eq!(wf.output_node(), Some("summary"));
        assert_eq!(wf.node_kind("refund"), Some(NodeKind::SubWorkflow));
        assert_eq!(wf.node_kind("was-paid"), Some(NodeKind::Conditional));
        assert_eq!(wf.node_kind("release"), Some(NodeKind::Parallel));
    }

    #[test]
    fn cancellation_precedes_every_undoable_node() {
        let waves = build().waves();
        assert_eq!(waves[0], ["load-order"]);
        assert_eq!(waves[1], ["mark-cancelled"]);
        assert!(waves[2].contains(&"release".to_string()));
        assert!(waves[2].contains(&"was-paid".to_string()));
        assert!(waves[2].contains(&"order-cancelled".to_string()));
        assert_eq!(waves[2].len(), 3);
        assert!(waves[3].contains(&"notify-customer".to_string()));
        assert!(waves[3].contains(&"summary".to_string()));
        assert_eq!(waves.len(), 4);
    }

    #[test]
    fn load_order_rejects_unknown_and_shipped_orders() {
        let store = DemoStore::seeded();
        let err = load_order(&store, json!({"order_id": "ord-0"})).unwrap_err();
        assert!(matches!(err, StepError::NotFound(_)));
        let err = load_order(&store, json!({"order_id": "ord-1003"})).unwrap_err();
        assert!(matches!(err, StepError::NotAllowed(_)));
        let err = load_order(&store, json!({})).unwrap_err();
        assert!(matches!(err, StepError::InvalidData(_)));
    }
}
