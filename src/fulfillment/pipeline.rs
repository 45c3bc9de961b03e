use rusqlite::Connection;

use crate::catalog::ObjectKeyMap;
use crate::db::queries;
use crate::error::AppError;
use crate::ledger::record_order;
use crate::models::{Order, Purchase};
use crate::payments::PaymentEvent;

use super::{FulfillmentArtifacts, FulfillmentError, FulfillmentRequest, dispatch};

/// What happened to one confirmed payment.
#[derive(Debug)]
pub enum PaymentOutcome {
    /// Order recorded and its artifact created.
    Fulfilled {
        order: Order,
        purchases: Vec<Purchase>,
        artifacts: FulfillmentArtifacts,
    },
    /// Order recorded but the branch failed. Left pending for an operator.
    Pending { order: Order, error: FulfillmentError },
    /// This payment was already recorded. Nothing was done.
    Duplicate { order: Order },
}

/// Validate, record, and fulfill a confirmed payment.
///
/// `Err` means nothing was written: either the metadata was rejected or
/// storage failed before the order existed.
pub fn process_payment(
    conn: &mut Connection,
    object_keys: &ObjectKeyMap,
    event: &PaymentEvent,
) -> Result<PaymentOutcome, FulfillmentError> {
    // A recorded payment is acknowledged as-is, whatever the catalog says now.
    // The conflict-ignoring insert below still decides concurrent races.
    if let Some(order) = find_recorded(conn, event)? {
        tracing::info!(
            "Duplicate delivery ignored: event={} (order {} already recorded)",
            event.event_id,
            order.session_id
        );
        return Ok(PaymentOutcome::Duplicate { order });
    }

    let request = FulfillmentRequest::from_event(conn, event)?;

    let recorded = record_order(conn, event, &request.product_key)?;
    if !recorded.created {
        return Ok(PaymentOutcome::Duplicate {
            order: recorded.order,
        });
    }

    complete(conn, object_keys, recorded.order, recorded.purchase, &request)
}

/// Re-run fulfillment for an order left pending by a failed branch.
///
/// Uses the event snapshot stored with the order. A fulfilled order is
/// reported as `Duplicate`.
pub fn retry_fulfillment(
    conn: &mut Connection,
    object_keys: &ObjectKeyMap,
    session_id: &str,
) -> Result<PaymentOutcome, FulfillmentError> {
    let order = queries::get_order(conn, session_id)?
        .ok_or_else(|| AppError::NotFound(format!("Order {} not found", session_id)))?;

    if order.is_fulfilled() {
        return Ok(PaymentOutcome::Duplicate { order });
    }

    let event: PaymentEvent = serde_json::from_str(&order.raw_event).map_err(AppError::from)?;
    let request = FulfillmentRequest::from_event(conn, &event)?;
    let purchase = queries::get_purchase_by_session(conn, session_id)?
        .ok_or_else(|| AppError::Internal(format!("Order {} has no purchase", session_id)))?;

    tracing::info!(
        "Retrying fulfillment: order={} previous_error={:?}",
        session_id,
        order.fulfillment_error
    );

    complete(conn, object_keys, order, purchase, &request)
}

fn find_recorded(conn: &Connection, event: &PaymentEvent) -> Result<Option<Order>, FulfillmentError> {
    if let Some(order) = queries::get_order_by_event_id(conn, &event.event_id)? {
        return Ok(Some(order));
    }
    Ok(queries::get_order(conn, &event.session_id)?)
}

fn complete(
    conn: &mut Connection,
    object_keys: &ObjectKeyMap,
    order: Order,
    purchase: Purchase,
    request: &FulfillmentRequest,
) -> Result<PaymentOutcome, FulfillmentError> {
    match dispatch(conn, object_keys, &order, &purchase, request) {
        Ok(artifacts) => {
            queries::mark_order_fulfilled(conn, &order.session_id)?;
            let order = queries::get_order(conn, &order.session_id)?.ok_or_else(|| {
                AppError::Internal(format!("Order {} vanished", order.session_id))
            })?;
            let purchases = queries::list_purchases_for_session(conn, &order.session_id)?;
            tracing::info!(
                "Order fulfilled: session={} product={} artifact={}",
                order.session_id,
                order.product_key,
                artifacts.label()
            );
            Ok(PaymentOutcome::Fulfilled {
                order,
                purchases,
                artifacts,
            })
        }
        Err(error) => {
            // Money is captured and the order exists; redelivery is a no-op,
            // so the failure has to live on the order row.
            queries::set_order_fulfillment_error(conn, &order.session_id, error.kind())?;
            tracing::error!(
                "Fulfillment failed: order={} product={} kind={} error={}",
                order.session_id,
                order.product_key,
                error.kind(),
                error
            );
            let order = queries::get_order(conn, &order.session_id)?.unwrap_or(order);
            Ok(PaymentOutcome::Pending { order, error })
        }
    }
}
