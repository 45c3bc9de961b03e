//! Row mapping trait and helpers for reducing boilerplate in queries.

use rusqlite::{Connection, OptionalExtension, Row, ToSql};

use crate::models::*;

/// Parse a string column into an enum type, converting parse errors to rusqlite errors
/// instead of panicking on unexpected values.
fn parse_enum<T: std::str::FromStr>(row: &Row, col: usize, col_name: &str) -> rusqlite::Result<T> {
    row.get::<_, String>(col)?.parse::<T>().map_err(|_| {
        rusqlite::Error::InvalidColumnType(col, col_name.to_string(), rusqlite::types::Type::Text)
    })
}

/// Trait for constructing a type from a database row.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

/// Query for a single optional result.
pub fn query_one<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Option<T>> {
    conn.query_row(sql, params, T::from_row)
        .optional()
        .map_err(Into::into)
}

/// Query for multiple results.
pub fn query_all<T: FromRow>(
    conn: &Connection,
    sql: &str,
    params: &[&dyn ToSql],
) -> crate::error::Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, T::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============ SQL SELECT Constants ============

pub const PRODUCT_COLS: &str = "product_key, name, price_cents, currency, product_type";

pub const CLASS_SESSION_COLS: &str =
    "id, product_key, start_time, end_time, seats_total, seats_available";

pub const ORDER_COLS: &str = "session_id, event_id, product_key, amount_cents, currency, status, customer_email, fulfillment_error, raw_event, created_at, fulfilled_at";

pub const PURCHASE_COLS: &str =
    "id, session_id, product_key, amount_cents, currency, customer_email, created_at";

pub const DOWNLOAD_TOKEN_COLS: &str =
    "token, purchase_id, session_id, product_key, object_key, expires_at, used_at, created_at";

pub const GIFT_CERTIFICATE_COLS: &str = "id, purchase_id, product_key, generated_code, recipient_name, recipient_email, message, created_at";

pub const SHIPPING_ADDRESS_COLS: &str = "id, purchase_id, product_key, full_name, address_line1, address_line2, city, state, postal_code, country, created_at";

pub const SEAT_RESERVATION_COLS: &str = "purchase_id, class_session_id, quantity, created_at";

// ============ FromRow Implementations ============

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Product {
            product_key: row.get(0)?,
            name: row.get(1)?,
            price_cents: row.get(2)?,
            currency: row.get(3)?,
            product_type: parse_enum(row, 4, "product_type")?,
        })
    }
}

impl FromRow for ClassSession {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ClassSession {
            id: row.get(0)?,
            product_key: row.get(1)?,
            start_time: row.get(2)?,
            end_time: row.get(3)?,
            seats_total: row.get(4)?,
            seats_available: row.get(5)?,
        })
    }
}

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            session_id: row.get(0)?,
            event_id: row.get(1)?,
            product_key: row.get(2)?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            status: parse_enum(row, 5, "status")?,
            customer_email: row.get(6)?,
            fulfillment_error: row.get(7)?,
            raw_event: row.get(8)?,
            created_at: row.get(9)?,
            fulfilled_at: row.get(10)?,
        })
    }
}

impl FromRow for Purchase {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Purchase {
            id: row.get(0)?,
            session_id: row.get(1)?,
            product_key: row.get(2)?,
            amount_cents: row.get(3)?,
            currency: row.get(4)?,
            customer_email: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

impl FromRow for DownloadToken {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(DownloadToken {
            token: row.get(0)?,
            purchase_id: row.get(1)?,
            session_id: row.get(2)?,
            product_key: row.get(3)?,
            object_key: row.get(4)?,
            expires_at: row.get(5)?,
            used_at: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for GiftCertificate {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(GiftCertificate {
            id: row.get(0)?,
            purchase_id: row.get(1)?,
            product_key: row.get(2)?,
            generated_code: row.get(3)?,
            recipient_name: row.get(4)?,
            recipient_email: row.get(5)?,
            message: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

impl FromRow for ShippingAddress {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(ShippingAddress {
            id: row.get(0)?,
            purchase_id: row.get(1)?,
            product_key: row.get(2)?,
            full_name: row.get(3)?,
            address_line1: row.get(4)?,
            address_line2: row.get(5)?,
            city: row.get(6)?,
            state: row.get(7)?,
            postal_code: row.get(8)?,
            country: row.get(9)?,
            created_at: row.get(10)?,
        })
    }
}

impl FromRow for SeatReservation {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(SeatReservation {
            purchase_id: row.get(0)?,
            class_session_id: row.get(1)?,
            quantity: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}
