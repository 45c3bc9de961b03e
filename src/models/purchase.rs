use serde::{Deserialize, Serialize};

/// Entitlement to delivery, derived from exactly one order (one per session).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub session_id: String,
    pub product_key: String,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    pub created_at: i64,
}
