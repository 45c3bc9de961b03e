//! Prefixed ID generation for rows this service creates.
//!
//! Format: `ff_{entity}_{uuid_simple}` (32 hex chars, no hyphens). The brand
//! prefix keeps our IDs apart from gateway IDs (`cs_`, `evt_`, `pi_`).

use uuid::Uuid;

const ALL_PREFIXES: &[&str] = &["ff_pur_", "ff_gift_", "ff_ship_"];

/// Cheap format check used to reject garbage before hitting the database.
pub fn is_valid_prefixed_id(s: &str) -> bool {
    let Some(prefix) = ALL_PREFIXES.iter().find(|p| s.starts_with(*p)) else {
        return false;
    };

    let hex_part = &s[prefix.len()..];
    hex_part.len() == 32 && hex_part.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Clone, Copy)]
pub enum EntityType {
    Purchase,
    GiftCertificate,
    ShippingAddress,
}

impl EntityType {
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::Purchase => "ff_pur",
            Self::GiftCertificate => "ff_gift",
            Self::ShippingAddress => "ff_ship",
        }
    }

    pub fn gen_id(&self) -> String {
        format!("{}_{}", self.prefix(), Uuid::new_v4().as_simple())
    }
}
