use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Fulfilled,
}

/// Ledger entry for a confirmed payment. Keyed by the gateway's checkout session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub session_id: String,
    /// Gateway event id that created this order (unique)
    pub event_id: String,
    pub product_key: String,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub customer_email: Option<String>,
    /// Failure kind recorded when fulfillment degraded (e.g. "oversold")
    pub fulfillment_error: Option<String>,
    /// Snapshot of the gateway event that produced the order
    #[serde(skip_serializing)]
    pub raw_event: String,
    pub created_at: i64,
    pub fulfilled_at: Option<i64>,
}

impl Order {
    pub fn is_fulfilled(&self) -> bool {
        self.status == OrderStatus::Fulfilled
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub session_id: String,
    pub event_id: String,
    pub product_key: String,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub raw_event: String,
}
