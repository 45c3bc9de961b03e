use serde::{Deserialize, Serialize};

/// Shipping destination captured once for a merchandise purchase. Never updated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub id: String,
    pub purchase_id: String,
    pub product_key: String,
    pub full_name: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippingDetails {
    pub full_name: String,
    pub address_line1: String,
    pub address_line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}
