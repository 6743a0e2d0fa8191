//! In-memory order, inventory and payment store backing the demo workflows.
//!
//! Every mutation the demo steps perform has an inverse here, so a failed run
//! can be checked to leave the store exactly as it found it.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sagaflow_core::workflow::step::StepError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Placed,
    Shipped,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub status: OrderStatus,
    /// Whether payment was captured.
    pub paid: bool,
    /// Whether an uncaptured card authorization is held.
    pub hold: bool,
    pub items: Vec<LineItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    StoreCredit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Captured,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub amount_cents: u64,
    pub status: PaymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub order_id: String,
    pub amount_cents: u64,
    pub recorded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("order '{0}' not found")]
    OrderNotFound(String),

    #[error("payment '{0}' not found")]
    PaymentNotFound(String),

    #[error("ledger entry {0} not found")]
    LedgerEntryNotFound(Uuid),

    #[error("insufficient stock for '{sku}': {available} available, {requested} requested")]
    InsufficientStock {
        sku: String,
        available: u32,
        requested: u32,
    },
}

impl From<StoreError> for StepError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::OrderNotFound(_)
            | StoreError::PaymentNotFound(_)
            | StoreError::LedgerEntryNotFound(_) => StepError::not_found(err.to_string()),
            StoreError::InsufficientStock { .. } => StepError::not_allowed(err.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// DemoStore
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Inner {
    orders: DashMap<String, Order>,
    /// Available units per SKU.
    stock: DashMap<String, u32>,
    payments: DashMap<String, Payment>,
    ledger: DashMap<Uuid, LedgerEntry>,
    outbox: Mutex<Vec<String>>,
}

/// Shared handle to the demo data. Clones see the same data.
#[derive(Clone, Default)]
pub struct DemoStore {
    inner: Arc<Inner>,
}

impl DemoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store with a few orders in different states.
    ///
    /// - `ord-1001`: placed, paid by card and store credit
    /// - `ord-1002`: placed, card authorization held
    /// - `ord-1003`: already shipped
    pub fn seeded() -> Self {
        let store = Self::new();
        for (sku, available) in [("sku-kettle", 10), ("sku-mug", 25), ("sku-teapot", 4)] {
            store.inner.stock.insert(sku.to_string(), available);
        }

        store.insert_order(Order {
            id: "ord-1001".to_string(),
            status: OrderStatus::Placed,
            paid: true,
            hold: false,
            items: vec![item("sku-kettle", 1), item("sku-mug", 2)],
        });
        store.insert_order(Order {
            id: "ord-1002".to_string(),
            status: OrderStatus::Placed,
            paid: false,
            hold: true,
            items: vec![item("sku-teapot", 1)],
        });
        store.insert_order(Order {
            id: "ord-1003".to_string(),
            status: OrderStatus::Shipped,
            paid: true,
            hold: false,
            items: vec![item("sku-mug", 4)],
        });

        store.insert_payment(payment("pay-1", "ord-1001", PaymentMethod::Card, 4999));
        store.insert_payment(payment("pay-2", "ord-1001", PaymentMethod::StoreCredit, 1000));
        store.insert_payment(payment("pay-3", "ord-1003", PaymentMethod::Card, 2400));
        store
    }

    pub fn insert_order(&self, order: Order) {
        self.inner.orders.insert(order.id.clone(), order);
    }

    pub fn insert_payment(&self, payment: Payment) {
        self.inner.payments.insert(payment.id.clone(), payment);
    }

    // -- Orders --------------------------------------------------------------

    pub fn order(&self, id: &str) -> Result<Order, StoreError> {
        self.inner
            .orders
            .get(id)
            .map(|o| o.clone())
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))
    }

    /// Set an order's status, returning the previous one.
    pub fn set_order_status(
        &self,
        id: &str,
        status: OrderStatus,
    ) -> Result<OrderStatus, StoreError> {
        let mut order = self
            .inner
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))?;
        Ok(std::mem::replace(&mut order.status, status))
    }

    /// Set whether an order holds a card authorization, returning the previous value.
    pub fn set_hold(&self, id: &str, hold: bool) -> Result<bool, StoreError> {
        let mut order = self
            .inner
            .orders
            .get_mut(id)
            .ok_or_else(|| StoreError::OrderNotFound(id.to_string()))?;
        Ok(std::mem::replace(&mut order.hold, hold))
    }

    // -- Inventory -----------------------------------------------------------

    #[cfg(test)]
    pub fn stock(&self, sku: &str) -> u32 {
        self.inner.stock.get(sku).map(|s| *s).unwrap_or(0)
    }

    /// Return units to available stock.
    pub fn release_stock(&self, sku: &str, quantity: u32) {
        *self.inner.stock.entry(sku.to_string()).or_insert(0) += quantity;
    }

    /// Take units out of available stock.
    pub fn reserve_stock(&self, sku: &str, quantity: u32) -> Result<(), StoreError> {
        let mut available = self.inner.stock.entry(sku.to_string()).or_insert(0);
        if *available < quantity {
            return Err(StoreError::InsufficientStock {
                sku: sku.to_string(),
                available: *available,
                requested: quantity,
            });
        }
        *available -= quantity;
        Ok(())
    }

    // -- Payments ------------------------------------------------------------

    /// Payments of an order, ordered by id.
    pub fn payments_for(&self, order_id: &str) -> Vec<Payment> {
        let mut payments: Vec<Payment> = self
            .inner
            .payments
            .iter()
            .filter(|p| p.order_id == order_id)
            .map(|p| p.clone())
            .collect();
        payments.sort_by(|a, b| a.id.cmp(&b.id));
        payments
    }

    #[cfg(test)]
    pub fn payment(&self, id: &str) -> Result<Payment, StoreError> {
        self.inner
            .payments
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::PaymentNotFound(id.to_string()))
    }

    /// Set a payment's status, returning the previous one.
    pub fn set_payment_status(
        &self,
        id: &str,
        status: PaymentStatus,
    ) -> Result<PaymentStatus, StoreError> {
        let mut payment = self
            .inner
            .payments
            .get_mut(id)
            .ok_or_else(|| StoreError::PaymentNotFound(id.to_string()))?;
        Ok(std::mem::replace(&mut payment.status, status))
    }

    // -- Ledger --------------------------------------------------------------

    pub fn append_ledger(&self, order_id: &str, amount_cents: u64) -> LedgerEntry {
        let entry = LedgerEntry {
            id: Uuid::now_v7(),
            order_id: order_id.to_string(),
            amount_cents,
            recorded_at: Utc::now(),
        };
        self.inner.ledger.insert(entry.id, entry.clone());
        entry
    }

    pub fn remove_ledger(&self, id: Uuid) -> Result<LedgerEntry, StoreError> {
        self.inner
            .ledger
            .remove(&id)
            .map(|(_, entry)| entry)
            .ok_or(StoreError::LedgerEntryNotFound(id))
    }

    pub fn ledger(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .inner
            .ledger
            .iter()
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    // -- Outbox --------------------------------------------------------------

    /// Queue an outgoing message.
    pub fn send(&self, message: impl Into<String>) {
        self.inner
            .outbox
            .lock()
            .expect("outbox lock poisoned")
            .push(message.into());
    }

    /// Remove the most recent copy of `message`. Returns whether one was found.
    pub fn retract(&self, message: &str) -> bool {
        let mut outbox = self.inner.outbox.lock().expect("outbox lock poisoned");
        match outbox.iter().rposition(|m| m == message) {
            Some(pos) => {
                outbox.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn outbox(&self) -> Vec<String> {
        self.inner
            .outbox
            .lock()
            .expect("outbox lock poisoned")
            .clone()
    }

    /// Whole store as JSON, with every collection sorted for stable output.
    pub fn snapshot(&self) -> serde_json::Value {
        let mut orders: Vec<Order> = self.inner.orders.iter().map(|o| o.clone()).collect();
        orders.sort_by(|a, b| a.id.cmp(&b.id));

        let mut payments: Vec<Payment> = self.inner.payments.iter().map(|p| p.clone()).collect();
        payments.sort_by(|a, b| a.id.cmp(&b.id));

        let stock: std::collections::BTreeMap<String, u32> = self
            .inner
            .stock
            .iter()
            .map(|s| (s.key().clone(), *s.value()))
            .collect();

        serde_json::json!({
            "orders": orders,
            "stock": stock,
            "payments": payments,
            "ledger": self.ledger(),
            "outbox": self.outbox(),
        })
    }
}

fn item(sku: &str, quantity: u32) -> LineItem {
    LineItem {
        sku: sku.to_string(),
        quantity,
    }
}

fn payment(id: &str, order_id: &str, method: PaymentMethod, amount_cents: u64) -> Payment {
    Payment {
        id: id.to_string(),
        order_id: order_id.to_string(),
        method,
        amount_cents,
        status: PaymentStatus::Captured,
    }
}
