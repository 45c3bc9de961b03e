use std::collections::HashMap;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result, msg};

use super::{GatewayEvent, PaymentEvent, SignatureVerifier};

type HmacSha256 = Hmac<Sha256>;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Verifies `stripe-signature` headers with the endpoint's signing secret.
#[derive(Clone)]
pub struct StripeVerifier {
    webhook_secret: String,
}

impl StripeVerifier {
    /// Maximum age of a webhook timestamp before it's rejected (in seconds).
    const WEBHOOK_TIMESTAMP_TOLERANCE_SECS: i64 = 300;

    /// Allowed clock skew for timestamps from the future.
    const FUTURE_SKEW_SECS: i64 = 60;

    pub fn new(webhook_secret: impl Into<String>) -> Self {
        Self {
            webhook_secret: webhook_secret.into(),
        }
    }

    pub fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> Result<bool> {
        // Stripe signature format: t=timestamp,v1=signature
        let mut timestamp = None;
        let mut sig_v1 = None;

        for part in signature.split(',') {
            if let Some(t) = part.trim().strip_prefix("t=") {
                timestamp = Some(t);
            } else if let Some(s) = part.trim().strip_prefix("v1=") {
                sig_v1 = Some(s);
            }
        }

        let timestamp_str =
            timestamp.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;
        let sig_v1 =
            sig_v1.ok_or_else(|| AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into()))?;

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| AppError::BadRequest(msg::INVALID_TIMESTAMP_IN_SIGNATURE.into()))?;

        let age = chrono::Utc::now().timestamp() - timestamp;

        if age > Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS {
            tracing::warn!(
                "Stripe webhook rejected: timestamp too old (age={}s, max={}s)",
                age,
                Self::WEBHOOK_TIMESTAMP_TOLERANCE_SECS
            );
            return Ok(false);
        }

        if age < -Self::FUTURE_SKEW_SECS {
            tracing::warn!("Stripe webhook rejected: timestamp in the future (age={}s)", age);
            return Ok(false);
        }

        // Signed payload is "<timestamp>.<raw body>" - bytes exactly as received
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())
            .map_err(|_| AppError::Internal(msg::INVALID_WEBHOOK_SECRET.into()))?;
        mac.update(timestamp_str.as_bytes());
        mac.update(b".");
        mac.update(payload);
        let expected = hex::encode(mac.finalize().into_bytes());

        // Length is not secret (always 64 hex chars for SHA-256)
        let expected_bytes = expected.as_bytes();
        let provided_bytes = sig_v1.as_bytes();
        if expected_bytes.len() != provided_bytes.len() {
            return Ok(false);
        }

        Ok(expected_bytes.ct_eq(provided_bytes).into())
    }
}

impl SignatureVerifier for StripeVerifier {
    fn verify(&self, payload: &[u8], signature: &str) -> Result<bool> {
        self.verify_webhook_signature(payload, signature)
    }
}

/// Generic Stripe webhook event - object is parsed based on event_type
#[derive(Debug, Deserialize)]
pub struct StripeWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: StripeEventData,
}

#[derive(Debug, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

// ============ checkout.session.completed ============

#[derive(Debug, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    pub payment_status: String,
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
    pub customer_email: Option<String>,
    pub customer_details: Option<StripeCustomerDetails>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
pub struct StripeCustomerDetails {
    pub email: Option<String>,
}

/// Parse a verified Stripe callback body.
///
/// Only paid `checkout.session.completed` events become payments; every other
/// event type (and unpaid sessions) is `Ignored`.
pub fn parse_stripe_event(body: &[u8]) -> Result<GatewayEvent> {
    let event: StripeWebhookEvent = serde_json::from_slice(body)?;

    if event.event_type != CHECKOUT_COMPLETED {
        return Ok(GatewayEvent::Ignored {
            event_type: event.event_type,
        });
    }

    let session: StripeCheckoutSession = serde_json::from_value(event.data.object)?;

    if session.payment_status != "paid" {
        tracing::info!(
            "Checkout session {} completed with payment_status={}, ignoring",
            session.id,
            session.payment_status
        );
        return Ok(GatewayEvent::Ignored {
            event_type: event.event_type,
        });
    }

    let amount_cents = session
        .amount_total
        .ok_or_else(|| AppError::BadRequest("Checkout session has no amount_total".into()))?;
    let currency = session
        .currency
        .ok_or_else(|| AppError::BadRequest("Checkout session has no currency".into()))?;

    // Email entered during checkout wins over the prefilled one
    let customer_email = session
        .customer_details
        .and_then(|d| d.email)
        .or(session.customer_email)
        .filter(|e| !e.trim().is_empty());

    Ok(GatewayEvent::PaymentConfirmed(PaymentEvent {
        event_id: event.id,
        session_id: session.id,
        amount_cents,
        currency: currency.to_lowercase(),
        customer_email,
        metadata: session.metadata,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkout_body(payment_status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "sess_1",
                    "payment_status": payment_status,
                    "amount_total": 500,
                    "currency": "USD",
                    "customer_email": "prefill@example.com",
                    "customer_details": { "email": "buyer@example.com" },
                    "metadata": { "productKey": "BLACK_CANYON_GUIDE", "type": "digital" }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_parse_paid_checkout() {
        let event = parse_stripe_event(&checkout_body("paid")).unwrap();
        let GatewayEvent::PaymentConfirmed(payment) = event else {
            panic!("expected a confirmed payment");
        };
        assert_eq!(payment.event_id, "evt_1");
        assert_eq!(payment.session_id, "sess_1");
        assert_eq!(payment.amount_cents, 500);
        assert_eq!(payment.currency, "usd");
        assert_eq!(payment.customer_email.as_deref(), Some("buyer@example.com"));
        assert_eq!(payment.meta("productKey"), Some("BLACK_CANYON_GUIDE"));
    }

    #[test]
    fn test_unpaid_checkout_is_ignored() {
        let event = parse_stripe_event(&checkout_body("unpaid")).unwrap();
        assert!(matches!(event, GatewayEvent::Ignored { .. }));
    }

    #[test]
    fn test_other_event_types_are_ignored() {
        let body = json!({
            "id": "evt_2",
            "type": "payment_intent.created",
            "data": { "object": {} }
        });
        let event = parse_stripe_event(&serde_json::to_vec(&body).unwrap()).unwrap();
        match event {
            GatewayEvent::Ignored { event_type } => assert_eq!(event_type, "payment_intent.created"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_body_is_error() {
        assert!(parse_stripe_event(b"not json").is_err());
    }
}
