use chrono::Utc;
use rusqlite::{Connection, params};

use crate::error::Result;
use crate::id::EntityType;
use crate::models::*;

use super::from_row::{
    CLASS_SESSION_COLS, DOWNLOAD_TOKEN_COLS, GIFT_CERTIFICATE_COLS, ORDER_COLS, PRODUCT_COLS,
    PURCHASE_COLS, SEAT_RESERVATION_COLS, SHIPPING_ADDRESS_COLS, query_all, query_one,
};

pub fn now() -> i64 {
    Utc::now().timestamp()
}

// ============ Catalog (read-only for the pipeline) ============

pub fn create_product(conn: &Connection, product: &Product) -> Result<()> {
    conn.execute(
        "INSERT INTO products (product_key, name, price_cents, currency, product_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            &product.product_key,
            &product.name,
            product.price_cents,
            &product.currency,
            product.product_type.as_ref(),
            now(),
        ],
    )?;
    Ok(())
}

pub fn get_product_by_key(conn: &Connection, product_key: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE product_key = ?1", PRODUCT_COLS),
        &[&product_key],
    )
}

pub fn count_products(conn: &Connection) -> Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
        .map_err(Into::into)
}

pub fn create_class_session(conn: &Connection, input: &CreateClassSession) -> Result<ClassSession> {
    let now = now();
    let id = conn.query_row(
        "INSERT INTO class_sessions (product_key, start_time, end_time, seats_total, seats_available, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4, ?5, ?5)
         RETURNING id",
        params![
            &input.product_key,
            input.start_time,
            input.end_time,
            input.seats_total,
            now,
        ],
        |row| row.get(0),
    )?;

    Ok(ClassSession {
        id,
        product_key: input.product_key.clone(),
        start_time: input.start_time,
        end_time: input.end_time,
        seats_total: input.seats_total,
        seats_available: input.seats_total,
    })
}

pub fn get_class_session(conn: &Connection, id: i64) -> Result<Option<ClassSession>> {
    query_one(
        conn,
        &format!("SELECT {} FROM class_sessions WHERE id = ?1", CLASS_SESSION_COLS),
        &[&id],
    )
}

// ============ Orders ============

/// Insert an order unless one already exists for its session or event id.
///
/// Returns true if this call created the row. A uniqueness conflict is not an
/// error: it means another delivery of the same payment got here first.
pub fn insert_order_ignore_conflict(conn: &Connection, input: &CreateOrder) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO orders (session_id, event_id, product_key, amount_cents, currency, status, customer_email, raw_event, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7, ?8)
         ON CONFLICT DO NOTHING",
        params![
            &input.session_id,
            &input.event_id,
            &input.product_key,
            input.amount_cents,
            &input.currency,
            &input.customer_email,
            &input.raw_event,
            now(),
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_order(conn: &Connection, session_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE session_id = ?1", ORDER_COLS),
        &[&session_id],
    )
}

pub fn get_order_by_event_id(conn: &Connection, event_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE event_id = ?1", ORDER_COLS),
        &[&event_id],
    )
}

pub fn list_pending_orders(conn: &Connection) -> Result<Vec<Order>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM orders WHERE status = 'pending' ORDER BY created_at",
            ORDER_COLS
        ),
        &[],
    )
}

/// Transition `pending -> fulfilled`. Returns false if the order was not pending.
pub fn mark_order_fulfilled(conn: &Connection, session_id: &str) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE orders SET status = 'fulfilled', fulfilled_at = ?1, fulfillment_error = NULL
         WHERE session_id = ?2 AND status = 'pending'",
        params![now(), session_id],
    )?;
    Ok(affected > 0)
}

/// Record why fulfillment of a still-pending order failed.
pub fn set_order_fulfillment_error(conn: &Connection, session_id: &str, kind: &str) -> Result<()> {
    conn.execute(
        "UPDATE orders SET fulfillment_error = ?1 WHERE session_id = ?2 AND status = 'pending'",
        params![kind, session_id],
    )?;
    Ok(())
}

// ============ Purchases ============

/// Insert the purchase for a session if none exists yet. Returns true if created.
pub fn insert_purchase_ignore_conflict(conn: &Connection, order: &CreateOrder) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO purchases (id, session_id, product_key, amount_cents, currency, customer_email, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(session_id) DO NOTHING",
        params![
            EntityType::Purchase.gen_id(),
            &order.session_id,
            &order.product_key,
            order.amount_cents,
            &order.currency,
            &order.customer_email,
            now(),
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_purchase_by_id(conn: &Connection, id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLS),
        &[&id],
    )
}

pub fn get_purchase_by_session(conn: &Connection, session_id: &str) -> Result<Option<Purchase>> {
    query_one(
        conn,
        &format!("SELECT {} FROM purchases WHERE session_id = ?1", PURCHASE_COLS),
        &[&session_id],
    )
}

pub fn list_purchases_for_session(conn: &Connection, session_id: &str) -> Result<Vec<Purchase>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM purchases WHERE session_id = ?1 ORDER BY created_at",
            PURCHASE_COLS
        ),
        &[&session_id],
    )
}

// ============ Download Tokens ============

/// Returns true if the token was stored; false if the purchase already has one.
pub fn insert_download_token_ignore_conflict(conn: &Connection, token: &DownloadToken) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO download_tokens (token, purchase_id, session_id, product_key, object_key, expires_at, used_at, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, ?7)
         ON CONFLICT(purchase_id) DO NOTHING",
        params![
            &token.token,
            &token.purchase_id,
            &token.session_id,
            &token.product_key,
            &token.object_key,
            token.expires_at,
            token.created_at,
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_download_token(conn: &Connection, token: &str) -> Result<Option<DownloadToken>> {
    query_one(
        conn,
        &format!("SELECT {} FROM download_tokens WHERE token = ?1", DOWNLOAD_TOKEN_COLS),
        &[&token],
    )
}

pub fn get_download_token_for_purchase(
    conn: &Connection,
    purchase_id: &str,
) -> Result<Option<DownloadToken>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM download_tokens WHERE purchase_id = ?1",
            DOWNLOAD_TOKEN_COLS
        ),
        &[&purchase_id],
    )
}

/// Atomically mark a token used. Only an unused, unexpired token whose order is
/// fulfilled can be consumed, so of any number of racing callers at most one sees `true`.
pub fn try_consume_download_token(conn: &Connection, token: &str, at: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE download_tokens SET used_at = ?1
         WHERE token = ?2 AND used_at IS NULL AND expires_at > ?1
           AND EXISTS (
               SELECT 1 FROM orders o
               WHERE o.session_id = download_tokens.session_id AND o.status = 'fulfilled'
           )",
        params![at, token],
    )?;
    Ok(affected > 0)
}

// ============ Gift Certificates ============

/// Returns true if stored. False means either the purchase already has a
/// certificate or the code collided with another certificate.
pub fn insert_gift_certificate_ignore_conflict(
    conn: &Connection,
    purchase_id: &str,
    product_key: &str,
    code: &str,
    recipient: &GiftRecipient,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO gift_certificates (id, purchase_id, product_key, generated_code, recipient_name, recipient_email, message, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT DO NOTHING",
        params![
            EntityType::GiftCertificate.gen_id(),
            purchase_id,
            product_key,
            code,
            &recipient.name,
            &recipient.email,
            &recipient.message,
            now(),
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_gift_certificate_for_purchase(
    conn: &Connection,
    purchase_id: &str,
) -> Result<Option<GiftCertificate>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM gift_certificates WHERE purchase_id = ?1",
            GIFT_CERTIFICATE_COLS
        ),
        &[&purchase_id],
    )
}

// ============ Shipping Addresses ============

pub fn insert_shipping_address_ignore_conflict(
    conn: &Connection,
    purchase_id: &str,
    product_key: &str,
    details: &ShippingDetails,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO shipping_addresses (id, purchase_id, product_key, full_name, address_line1, address_line2, city, state, postal_code, country, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
         ON CONFLICT(purchase_id) DO NOTHING",
        params![
            EntityType::ShippingAddress.gen_id(),
            purchase_id,
            product_key,
            &details.full_name,
            &details.address_line1,
            &details.address_line2,
            &details.city,
            &details.state,
            &details.postal_code,
            &details.country,
            now(),
        ],
    )?;
    Ok(affected > 0)
}

pub fn get_shipping_address_for_purchase(
    conn: &Connection,
    purchase_id: &str,
) -> Result<Option<ShippingAddress>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM shipping_addresses WHERE purchase_id = ?1",
            SHIPPING_ADDRESS_COLS
        ),
        &[&purchase_id],
    )
}

// ============ Class Seats ============

/// Claim the reservation marker for a purchase. False means seats were already taken for it.
pub fn insert_seat_reservation_ignore_conflict(
    conn: &Connection,
    purchase_id: &str,
    class_session_id: i64,
    quantity: i64,
) -> Result<bool> {
    let affected = conn.execute(
        "INSERT INTO seat_reservations (purchase_id, class_session_id, quantity, created_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(purchase_id) DO NOTHING",
        params![purchase_id, class_session_id, quantity, now()],
    )?;
    Ok(affected > 0)
}

pub fn get_seat_reservation(conn: &Connection, purchase_id: &str) -> Result<Option<SeatReservation>> {
    query_one(
        conn,
        &format!(
            "SELECT {} FROM seat_reservations WHERE purchase_id = ?1",
            SEAT_RESERVATION_COLS
        ),
        &[&purchase_id],
    )
}

/// Conditionally take `quantity` seats. Returns false (and changes nothing) when
/// fewer than `quantity` seats remain or the session does not exist.
pub fn try_decrement_seats(conn: &Connection, class_session_id: i64, quantity: i64) -> Result<bool> {
    let affected = conn.execute(
        "UPDATE class_sessions
         SET seats_available = seats_available - ?1, updated_at = ?2
         WHERE id = ?3 AND seats_available >= ?1",
        params![quantity, now(), class_session_id],
    )?;
    Ok(affected > 0)
}
