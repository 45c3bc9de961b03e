//! Read-only view of the catalog: product lookup, class capacity, and the
//! static map from product keys to deliverable object keys.

use std::collections::HashMap;

use rusqlite::Connection;

use crate::db::queries;
use crate::error::Result;
use crate::models::{ClassSession, Product};

/// Deliverables for digital products. Explicit on purpose: object keys are
/// never derived from product keys.
pub const DIGITAL_FILES: &[(&str, &str)] = &[
    ("SONORAN_ECHOES_DIGITAL", "sonoran-echoes.zip"),
    ("BLACK_CANYON_GUIDE", "black-canyon-guide.pdf"),
    ("LEES_FERRY_GUIDE", "lees-ferry-guide.pdf"),
];

/// productKey -> object key in the asset store.
#[derive(Debug, Clone, Default)]
pub struct ObjectKeyMap {
    entries: HashMap<String, String>,
}

impl ObjectKeyMap {
    pub fn new<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// The map shipped with the service.
    pub fn digital_files() -> Self {
        Self::new(DIGITAL_FILES.iter().copied())
    }

    pub fn resolve(&self, product_key: &str) -> Option<&str> {
        self.entries.get(product_key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn lookup_product(conn: &Connection, product_key: &str) -> Result<Option<Product>> {
    queries::get_product_by_key(conn, product_key)
}

/// Result of the pre-payment capacity check for a class session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatAvailability {
    Available { seats_available: i64 },
    SoldOut { seats_available: i64 },
    UnknownSession,
}

/// Checkout-time check: a class purchase is refused before payment when the
/// session cannot hold `quantity` more people. Fulfillment re-checks atomically.
pub fn check_seat_availability(
    conn: &Connection,
    class_session_id: i64,
    quantity: i64,
) -> Result<SeatAvailability> {
    let session: Option<ClassSession> = queries::get_class_session(conn, class_session_id)?;
    Ok(match session {
        None => SeatAvailability::UnknownSession,
        Some(s) if s.seats_available >= quantity => SeatAvailability::Available {
            seats_available: s.seats_available,
        },
        Some(s) => SeatAvailability::SoldOut {
            seats_available: s.seats_available,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_test_db;
    use crate::models::CreateClassSession;

    #[test]
    fn test_digital_files_map() {
        let map = ObjectKeyMap::digital_files();
        assert_eq!(map.resolve("BLACK_CANYON_GUIDE"), Some("black-canyon-guide.pdf"));
        assert_eq!(map.resolve("GIFT_CERT_40"), None);
        // no guessing from the key
        assert_eq!(map.resolve("black_canyon_guide"), None);
        assert_eq!(map.len(), DIGITAL_FILES.len());
    }

    #[test]
    fn test_check_seat_availability() {
        let conn = open_test_db();
        let session = queries::create_class_session(
            &conn,
            &CreateClassSession {
                product_key: "SOUNDBATH_PUBLIC".into(),
                start_time: 1_700_000_000,
                end_time: 1_700_003_600,
                seats_total: 2,
            },
        )
        .unwrap();

        assert_eq!(
            check_seat_availability(&conn, session.id, 2).unwrap(),
            SeatAvailability::Available { seats_available: 2 }
        );
        assert_eq!(
            check_seat_availability(&conn, session.id, 3).unwrap(),
            SeatAvailability::SoldOut { seats_available: 2 }
        );
        assert_eq!(
            check_seat_availability(&conn, session.id + 100, 1).unwrap(),
            SeatAvailability::UnknownSession
        );
    }
}
