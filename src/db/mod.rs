pub mod from_row;
pub mod queries;
mod schema;

pub use schema::{configure_connection, init_db};

use std::sync::Arc;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

use crate::catalog::ObjectKeyMap;
use crate::email::Notifier;
use crate::entitlement::EntitlementVerifier;
use crate::payments::SignatureVerifier;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Verifies gateway callback signatures
    pub signature_verifier: Arc<dyn SignatureVerifier>,
    /// Checks the delivery worker's shared secret and resolves deliverables
    pub entitlements: Arc<EntitlementVerifier>,
    /// productKey -> object key, used when issuing download tokens
    pub object_keys: Arc<ObjectKeyMap>,
    /// Order confirmation sender (fire-and-forget)
    pub notifier: Arc<dyn Notifier>,
    /// Base URL of the asset-delivery worker for browser redirects
    pub download_worker_url: Option<String>,
}

pub fn create_pool(database_path: &str) -> Result<DbPool, r2d2::Error> {
    let manager = SqliteConnectionManager::file(database_path).with_init(|conn| {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        configure_connection(conn)
    });
    Pool::builder().max_size(10).build(manager)
}

#[cfg(test)]
pub(crate) fn open_test_db() -> rusqlite::Connection {
    let conn = rusqlite::Connection::open_in_memory().expect("Failed to open in-memory database");
    configure_connection(&conn).expect("Failed to configure connection");
    init_db(&conn).expect("Failed to initialize schema");
    conn
}
