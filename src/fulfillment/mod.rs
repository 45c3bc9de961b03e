//! Fulfillment dispatch: turn a recorded purchase into its type-specific
//! artifact (download token, gift certificate, shipping address, or seats).

pub mod codes;
mod dispatcher;
mod pipeline;
mod request;

pub use dispatcher::*;
pub use pipeline::*;
pub use request::*;

use thiserror::Error;

use crate::error::AppError;
use crate::models::{DownloadToken, GiftCertificate, SeatReservation, ShippingAddress};

#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// Checkout metadata is missing or malformed for the product type.
    #[error("Invalid checkout metadata: {0}")]
    Validation(String),

    #[error("Unknown product type: {0}")]
    UnknownProductType(String),

    #[error("Class session {0} not found")]
    ClassSessionNotFound(i64),

    /// Payment was captured but the class no longer has room. Needs an operator.
    #[error(
        "Class session {class_session_id} oversold: requested {requested}, available {available}"
    )]
    Oversold {
        class_session_id: i64,
        requested: i64,
        available: i64,
    },

    /// A digital product has no entry in the object-key map.
    #[error("No deliverable configured for product {0}")]
    ConfigurationGap(String),

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl FulfillmentError {
    /// Stable label persisted in `orders.fulfillment_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            FulfillmentError::Validation(_) => "validation",
            FulfillmentError::UnknownProductType(_) => "unknown_product_type",
            FulfillmentError::ClassSessionNotFound(_) => "class_session_not_found",
            FulfillmentError::Oversold { .. } => "oversold",
            FulfillmentError::ConfigurationGap(_) => "configuration_gap",
            FulfillmentError::Storage(_) => "storage",
        }
    }

    /// Errors the caller caused; retrying the same input cannot succeed.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            FulfillmentError::Validation(_)
                | FulfillmentError::UnknownProductType(_)
                | FulfillmentError::ClassSessionNotFound(_)
        )
    }
}

impl From<rusqlite::Error> for FulfillmentError {
    fn from(e: rusqlite::Error) -> Self {
        FulfillmentError::Storage(AppError::Database(e))
    }
}

impl From<FulfillmentError> for AppError {
    fn from(e: FulfillmentError) -> Self {
        match e {
            FulfillmentError::Validation(_)
            | FulfillmentError::UnknownProductType(_)
            | FulfillmentError::ClassSessionNotFound(_) => AppError::BadRequest(e.to_string()),
            FulfillmentError::Oversold { .. } => AppError::Conflict(e.to_string()),
            FulfillmentError::ConfigurationGap(_) => AppError::Misconfigured(e.to_string()),
            FulfillmentError::Storage(inner) => inner,
        }
    }
}

/// What a dispatcher branch produced (or found already produced).
#[derive(Debug, Clone)]
pub enum FulfillmentArtifacts {
    DownloadToken(DownloadToken),
    GiftCertificate(GiftCertificate),
    ShippingAddress(ShippingAddress),
    SeatReservation(SeatReservation),
}

impl FulfillmentArtifacts {
    pub fn label(&self) -> &'static str {
        match self {
            FulfillmentArtifacts::DownloadToken(_) => "download_token",
            FulfillmentArtifacts::GiftCertificate(_) => "gift_certificate",
            FulfillmentArtifacts::ShippingAddress(_) => "shipping_address",
            FulfillmentArtifacts::SeatReservation(_) => "seat_reservation",
        }
    }
}
