//! Idempotency guard and order ledger.
//!
//! Gateways deliver at least once, possibly concurrently. The only thing that
//! makes that safe is the unique keys on `orders` (session id, event id) and
//! `purchases` (session id): the insert either creates the row or conflicts,
//! and a conflict means another delivery already owns this payment.

use rusqlite::{Connection, TransactionBehavior};

use crate::db::queries;
use crate::error::{AppError, Result};
use crate::models::{CreateOrder, Order, Purchase};
use crate::payments::PaymentEvent;

/// Outcome of recording a confirmed payment.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    /// True only for the delivery that inserted the order. Everyone else must
    /// skip fulfillment side effects.
    pub created: bool,
    pub order: Order,
    pub purchase: Purchase,
}

/// Record the order and its purchase for a confirmed payment, exactly once.
pub fn record_order(
    conn: &mut Connection,
    event: &PaymentEvent,
    product_key: &str,
) -> Result<RecordedOrder> {
    let input = CreateOrder {
        session_id: event.session_id.clone(),
        event_id: event.event_id.clone(),
        product_key: product_key.to_string(),
        amount_cents: event.amount_cents,
        currency: event.currency.clone(),
        customer_email: event.customer_email.clone(),
        raw_event: serde_json::to_string(event)?,
    };

    // Write lock up front; concurrent deliveries queue on busy_timeout here.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let created = queries::insert_order_ignore_conflict(&tx, &input)?;

    // Conflict may be on either key: same event redelivered, or a different
    // event for a session that already has an order.
    let order = match queries::get_order_by_event_id(&tx, &input.event_id)? {
        Some(order) => order,
        None => queries::get_order(&tx, &input.session_id)?.ok_or_else(|| {
            AppError::Internal(format!("Order for session {} vanished", input.session_id))
        })?,
    };

    queries::insert_purchase_ignore_conflict(&tx, &input)?;
    let purchase = queries::get_purchase_by_session(&tx, &order.session_id)?.ok_or_else(|| {
        AppError::Internal(format!("Purchase for session {} vanished", order.session_id))
    })?;

    tx.commit()?;

    if created {
        tracing::info!(
            "Order recorded: session={} event={} product={}",
            order.session_id,
            order.event_id,
            order.product_key
        );
    } else {
        tracing::info!(
            "Duplicate delivery ignored: event={} (order {} already recorded)",
            event.event_id,
            order.session_id
        );
    }

    Ok(RecordedOrder {
        created,
        order,
        purchase,
    })
}
