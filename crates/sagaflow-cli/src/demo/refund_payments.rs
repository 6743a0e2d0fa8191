//! The `refund-payments` workflow, run by `cancel-order` as its `refund` node.
//!
//! Card payments and store credit are refunded concurrently, then the total
//! is written to the ledger. Input: `{"order_id": ...}`.

use sagaflow_core::workflow::definition::{DefinitionError, WorkflowBuilder, WorkflowDefinition};
use sagaflow_core::workflow::node::step;
use sagaflow_core::workflow::step::StepError;
use serde_json::{Value, json};
use uuid::Uuid;

use super::store::{DemoStore, Payment, PaymentMethod, PaymentStatus};
use super::{FaultPlan, StoreStep, parse_field, str_field};

pub const WORKFLOW_ID: &str = "refund-payments";

pub fn definition(
    store: &DemoStore,
    faults: &FaultPlan,
) -> Result<WorkflowDefinition, DefinitionError> {
    WorkflowBuilder::new(WORKFLOW_ID)
        .then(step("load-payments", StoreStep::new(store, faults, load_payments)))
        .then(
            step(
                "refund-card",
                StoreStep::with_undo(store, faults, refund_card, recapture),
            )
            .reads(&["load-payments"]),
        )
        .then(
            step(
                "restore-credit",
                StoreStep::with_undo(store, faults, restore_credit, recapture),
            )
            .reads(&["load-payments"]),
        )
        .then(
            step(
                "record-ledger",
                StoreStep::with_undo(store, faults, record_ledger, remove_ledger),
            )
            .reads(&["refund-card", "restore-credit"]),
        )
        .output("record-ledger")
        .build()
}

fn load_payments(store: &DemoStore, input: Value) -> Result<Value, StepError> {
    let order_id = str_field(&input, "order_id")?;
    let captured: Vec<Payment> = store
        .payments_for(order_id)
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Captured)
        .collect();
    if captured.is_empty() {
        return Err(StepError::not_found(format!("no captured payments for order '{order_id}'")));
    }
    Ok(json!({ "order_id": order_id, "payments": captured }))
}

fn refund_card(store: &DemoStore, loaded: Value) -> Result<Value, StepError> {
    refund_by_method(store, &loaded, PaymentMethod::Card)
}

fn restore_credit(store: &DemoStore, loaded: Value) -> Result<Value, StepError> {
    refund_by_method(store, &loaded, PaymentMethod::StoreCredit)
}

fn refund_by_method(
    store: &DemoStore,
    loaded: &Value,
    method: PaymentMethod,
) -> Result<Value, StepError> {
    let order_id = str_field(loaded, "order_id")?;
    let payments: Vec<Payment> = parse_field(loaded, "payments")?;

    let mut refunded = Vec::new();
    let mut amount_cents = 0;
    for payment in payments.iter().filter(|p| p.method == method) {
        store.set_payment_status(&payment.id, PaymentStatus::Refunded)?;
        refunded.push(payment.id.clone());
        amount_cents += payment.amount_cents;
    }

    Ok(json!({
        "order_id": order_id,
        "refunded": refunded,
        "amount_cents": amount_cents,
    }))
}

fn recapture(store: &DemoStore, output: Value, _input: Value) -> Result<(), StepError> {
    let refunded: Vec<String> = parse_field(&output, "refunded")?;
    for id in &refunded {
        store.set_payment_status(id, PaymentStatus::Captured)?;
    }
    Ok(())
}

fn record_ledger(store: &DemoStore, refunds: Value) -> Result<Value, StepError> {
    let card = &refunds["refund-card"];
    let credit = &refunds["restore-credit"];
    let order_id = str_field(card, "order_id")?;
    let amount_cents = card["amount_cents"].as_u64().unwrap_or(0)
        + credit["amount_cents"].as_u64().unwrap_or(0);

    let entry = store.append_ledger(order_id, amount_cents);
    Ok(json!({
        "order_id": order_id,
        "amount_cents": amount_cents,
        "entry_id": entry.id,
    }))
}

fn remove_ledger(store: &DemoStore, output: Value, _input: Value) -> Result<(), StepError> {
    let entry_id: Uuid = parse_field(&output, "entry_id")?;
    store.remove_ledger(entry_id)?;
    Ok(())
}
