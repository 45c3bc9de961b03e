use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::HeaderMap,
};

use crate::db::AppState;
use crate::email::spawn_order_confirmation;
use crate::error::{AppError, Result, msg};
use crate::fulfillment::{PaymentOutcome, process_payment};
use crate::payments::{GatewayEvent, parse_stripe_event};

use super::WebhookAck;

const SIGNATURE_HEADER: &str = "stripe-signature";

fn extract_signature(headers: &HeaderMap) -> Result<&str> {
    headers
        .get(SIGNATURE_HEADER)
        .ok_or_else(|| AppError::BadRequest(msg::MISSING_SIGNATURE.into()))?
        .to_str()
        .map_err(|e| {
            tracing::debug!("Invalid UTF-8 in Stripe signature header: {}", e);
            AppError::BadRequest(msg::INVALID_SIGNATURE_FORMAT.into())
        })
}

/// Axum handler for Stripe webhooks.
///
/// The signature is checked against the raw bytes before anything parses
/// them. After that, every delivery that reaches the ledger is acknowledged
/// with the same body whether it created the order or was a duplicate.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>> {
    let signature = extract_signature(&headers)?;

    if !state.signature_verifier.verify(&body, signature)? {
        tracing::warn!("Stripe webhook rejected: invalid signature");
        return Err(AppError::Unauthorized);
    }

    let payment = match parse_stripe_event(&body)? {
        GatewayEvent::PaymentConfirmed(payment) => payment,
        GatewayEvent::Ignored { event_type } => {
            tracing::debug!("Ignoring Stripe event type {}", event_type);
            return Ok(Json(WebhookAck::received()));
        }
    };

    let mut conn = state.db.get()?;
    let outcome = process_payment(&mut conn, &state.object_keys, &payment).map_err(|e| {
        if e.is_rejection() {
            tracing::warn!(
                "Rejected checkout event {} (session {}): {}",
                payment.event_id,
                payment.session_id,
                e
            );
        }
        AppError::from(e)
    })?;
    drop(conn);

    match outcome {
        PaymentOutcome::Fulfilled {
            order, purchases, ..
        } => {
            spawn_order_confirmation(state.notifier.clone(), order, purchases);
        }
        PaymentOutcome::Pending { order, error } => {
            tracing::warn!(
                "Order {} acknowledged with degraded fulfillment ({})",
                order.session_id,
                error.kind()
            );
        }
        PaymentOutcome::Duplicate { .. } => {}
    }

    Ok(Json(WebhookAck::received()))
}
