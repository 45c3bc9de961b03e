use rusqlite::{Connection, TransactionBehavior};

use crate::catalog::ObjectKeyMap;
use crate::db::queries;
use crate::error::AppError;
use crate::models::{
    DownloadToken, GiftCertificate, GiftRecipient, Order, Purchase, SeatReservation,
    ShippingAddress, ShippingDetails,
};

use super::codes;
use super::{FulfillmentArtifacts, FulfillmentError, FulfillmentRequest, ProductFulfillment};

/// Attempts at drawing an unused gift code before giving up.
const GIFT_CODE_ATTEMPTS: usize = 5;

/// Run the branch for the request's product type.
///
/// Every branch is keyed by purchase id: running it again for the same
/// purchase returns the artifact created the first time and changes nothing.
pub fn dispatch(
    conn: &mut Connection,
    object_keys: &ObjectKeyMap,
    order: &Order,
    purchase: &Purchase,
    request: &FulfillmentRequest,
) -> Result<FulfillmentArtifacts, FulfillmentError> {
    match &request.fulfillment {
        ProductFulfillment::Digital => {
            issue_download_token(conn, object_keys, purchase).map(FulfillmentArtifacts::DownloadToken)
        }
        ProductFulfillment::Gift(recipient) => {
            issue_gift_certificate(conn, purchase, recipient).map(FulfillmentArtifacts::GiftCertificate)
        }
        ProductFulfillment::Merch(details) => {
            store_shipping_address(conn, purchase, details).map(FulfillmentArtifacts::ShippingAddress)
        }
        ProductFulfillment::Class {
            class_session_id,
            quantity,
        } => reserve_seats(conn, order, purchase, *class_session_id, *quantity)
            .map(FulfillmentArtifacts::SeatReservation),
    }
}

fn issue_download_token(
    conn: &Connection,
    object_keys: &ObjectKeyMap,
    purchase: &Purchase,
) -> Result<DownloadToken, FulfillmentError> {
    let object_key = object_keys
        .resolve(&purchase.product_key)
        .ok_or_else(|| FulfillmentError::ConfigurationGap(purchase.product_key.clone()))?;

    let now = queries::now();
    let token = DownloadToken {
        token: codes::download_token(),
        purchase_id: purchase.id.clone(),
        session_id: purchase.session_id.clone(),
        product_key: purchase.product_key.clone(),
        object_key: object_key.to_string(),
        expires_at: now + codes::DOWNLOAD_TOKEN_TTL_SECS,
        used_at: None,
        created_at: now,
    };

    if queries::insert_download_token_ignore_conflict(conn, &token)? {
        tracing::info!(
            "Download token issued: purchase={} object={} expires_at={}",
            purchase.id,
            token.object_key,
            token.expires_at
        );
        return Ok(token);
    }

    stored(queries::get_download_token_for_purchase(conn, &purchase.id)?, "download token", purchase)
}

fn issue_gift_certificate(
    conn: &Connection,
    purchase: &Purchase,
    recipient: &GiftRecipient,
) -> Result<GiftCertificate, FulfillmentError> {
    for _ in 0..GIFT_CODE_ATTEMPTS {
        let code = codes::gift_code();
        let inserted = queries::insert_gift_certificate_ignore_conflict(
            conn,
            &purchase.id,
            &purchase.product_key,
            &code,
            recipient,
        )?;

        // Either ours, or the purchase already had one from an earlier run
        if let Some(cert) = queries::get_gift_certificate_for_purchase(conn, &purchase.id)? {
            if inserted {
                tracing::info!("Gift certificate issued: purchase={}", purchase.id);
            }
            return Ok(cert);
        }

        tracing::warn!("Gift code collision for purchase {}, drawing again", purchase.id);
    }

    Err(AppError::Internal(format!(
        "Could not allocate a unique gift code for purchase {}",
        purchase.id
    ))
    .into())
}

fn store_shipping_address(
    conn: &Connection,
    purchase: &Purchase,
    details: &ShippingDetails,
) -> Result<ShippingAddress, FulfillmentError> {
    if queries::insert_shipping_address_ignore_conflict(conn, &purchase.id, &purchase.product_key, details)? {
        tracing::info!("Shipping address stored: purchase={}", purchase.id);
    }
    stored(
        queries::get_shipping_address_for_purchase(conn, &purchase.id)?,
        "shipping address",
        purchase,
    )
}

/// Take seats for a class purchase.
///
/// The reservation row and the decrement commit together: the row proves the
/// seats were taken for this purchase, and a failed decrement rolls it back.
fn reserve_seats(
    conn: &mut Connection,
    order: &Order,
    purchase: &Purchase,
    class_session_id: i64,
    quantity: i64,
) -> Result<SeatReservation, FulfillmentError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    if !queries::insert_seat_reservation_ignore_conflict(&tx, &purchase.id, class_session_id, quantity)? {
        let existing = queries::get_seat_reservation(&tx, &purchase.id)?;
        tx.commit()?;
        return stored(existing, "seat reservation", purchase);
    }

    if !queries::try_decrement_seats(&tx, class_session_id, quantity)? {
        let session = queries::get_class_session(&tx, class_session_id)?;
        // Dropping tx rolls back the reservation row
        drop(tx);
        let Some(session) = session else {
            return Err(FulfillmentError::ClassSessionNotFound(class_session_id));
        };
        tracing::error!(
            "OVERSOLD: order={} class_session={} product={} requested={} available={}",
            order.session_id,
            class_session_id,
            purchase.product_key,
            quantity,
            session.seats_available
        );
        return Err(FulfillmentError::Oversold {
            class_session_id,
            requested: quantity,
            available: session.seats_available,
        });
    }

    let reservation = queries::get_seat_reservation(&tx, &purchase.id)?;
    tx.commit()?;

    tracing::info!(
        "Seats reserved: purchase={} class_session={} quantity={}",
        purchase.id,
        class_session_id,
        quantity
    );
    stored(reservation, "seat reservation", purchase)
}

fn stored<T>(row: Option<T>, what: &str, purchase: &Purchase) -> Result<T, FulfillmentError> {
    row.ok_or_else(|| {
        AppError::Internal(format!("{} for purchase {} vanished", what, purchase.id)).into()
    })
}
