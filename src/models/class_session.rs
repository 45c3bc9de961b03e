use serde::{Deserialize, Serialize};

/// A scheduled class with finite seating. `0 <= seats_available <= seats_total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSession {
    pub id: i64,
    pub product_key: String,
    pub start_time: i64,
    pub end_time: i64,
    pub seats_total: i64,
    pub seats_available: i64,
}

#[derive(Debug, Clone)]
pub struct CreateClassSession {
    pub product_key: String,
    pub start_time: i64,
    pub end_time: i64,
    pub seats_total: i64,
}

/// Marker that a purchase already took its seats. One row per purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatReservation {
    pub purchase_id: String,
    pub class_session_id: i64,
    pub quantity: i64,
    pub created_at: i64,
}
