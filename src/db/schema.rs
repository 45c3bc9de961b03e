use rusqlite::Connection;

/// Per-connection pragmas. Applied by the pool on every new connection.
pub fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA busy_timeout = 5000;
        PRAGMA foreign_keys = ON;
        "#,
    )
}

/// Initialize the database schema.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        -- Catalog (owned by catalog administration, read-only for the pipeline)
        CREATE TABLE IF NOT EXISTS products (
            product_key TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            price_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            product_type TEXT NOT NULL CHECK (product_type IN ('digital', 'gift', 'merch', 'class')),
            created_at INTEGER NOT NULL
        );

        -- Class sessions: seats_available only ever moves through the conditional decrement
        CREATE TABLE IF NOT EXISTS class_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            product_key TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER NOT NULL,
            seats_total INTEGER NOT NULL CHECK (seats_total >= 0),
            seats_available INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            CHECK (seats_available >= 0 AND seats_available <= seats_total)
        );
        CREATE INDEX IF NOT EXISTS idx_class_sessions_product ON class_sessions(product_key);

        -- Orders: one per gateway event AND one per checkout session
        CREATE TABLE IF NOT EXISTS orders (
            session_id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL UNIQUE,
            product_key TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'fulfilled')),
            customer_email TEXT,
            fulfillment_error TEXT,
            raw_event TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            fulfilled_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_orders_pending ON orders(session_id) WHERE status = 'pending';

        -- Purchases: entitlement record, one per checkout session
        CREATE TABLE IF NOT EXISTS purchases (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL UNIQUE REFERENCES orders(session_id),
            product_key TEXT NOT NULL,
            amount_cents INTEGER NOT NULL,
            currency TEXT NOT NULL,
            customer_email TEXT,
            created_at INTEGER NOT NULL
        );

        -- Download tokens: single-use, one per digital purchase
        CREATE TABLE IF NOT EXISTS download_tokens (
            token TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL UNIQUE REFERENCES purchases(id),
            session_id TEXT NOT NULL,
            product_key TEXT NOT NULL,
            object_key TEXT NOT NULL,
            expires_at INTEGER NOT NULL,
            used_at INTEGER,
            created_at INTEGER NOT NULL
        );

        -- Gift certificates: one per gift purchase
        CREATE TABLE IF NOT EXISTS gift_certificates (
            id TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL UNIQUE REFERENCES purchases(id),
            product_key TEXT NOT NULL,
            generated_code TEXT NOT NULL UNIQUE,
            recipient_name TEXT,
            recipient_email TEXT,
            message TEXT,
            created_at INTEGER NOT NULL
        );

        -- Shipping addresses: one per merch purchase, immutable
        CREATE TABLE IF NOT EXISTS shipping_addresses (
            id TEXT PRIMARY KEY,
            purchase_id TEXT NOT NULL UNIQUE REFERENCES purchases(id),
            product_key TEXT NOT NULL,
            full_name TEXT NOT NULL,
            address_line1 TEXT NOT NULL,
            address_line2 TEXT,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            postal_code TEXT NOT NULL,
            country TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        -- Seat reservations: guard that a class purchase decrements seats once
        CREATE TABLE IF NOT EXISTS seat_reservations (
            purchase_id TEXT PRIMARY KEY REFERENCES purchases(id),
            class_session_id INTEGER NOT NULL REFERENCES class_sessions(id),
            quantity INTEGER NOT NULL CHECK (quantity > 0),
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_seat_reservations_session ON seat_reservations(class_session_id);
        "#,
    )?;
    Ok(())
}
