mod stripe;

pub use stripe::*;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Authenticates an inbound gateway callback against its raw, unparsed body.
///
/// Returns `Ok(false)` for a well-formed but wrong signature and `Err` for a
/// header that cannot be parsed at all.
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, payload: &[u8], signature: &str) -> Result<bool>;
}

/// A confirmed payment, reduced to what the pipeline needs.
///
/// `event_id` is the deduplication key; `session_id` identifies the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub event_id: String,
    pub session_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub customer_email: Option<String>,
    /// Checkout metadata: productKey, type and type-specific fields
    pub metadata: HashMap<String, String>,
}

impl PaymentEvent {
    /// Metadata value with empty strings treated as absent.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

/// Provider-agnostic result of parsing a verified callback body.
#[derive(Debug)]
pub enum GatewayEvent {
    /// Payment confirmed - drives order creation
    PaymentConfirmed(PaymentEvent),
    /// Anything else; acknowledged without side effects
    Ignored { event_type: String },
}
