//! Entitlement checks for the asset-delivery service.
//!
//! The delivery service is untrusted for everything except the shared secret:
//! it learns an object key only for a paid, fulfilled purchase, and a
//! download token only releases its file once.

use rusqlite::Connection;
use serde::Serialize;
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::catalog::ObjectKeyMap;
use crate::db::queries;
use crate::error::{AppError, msg};
use crate::id::is_valid_prefixed_id;
use crate::models::{Order, Purchase, TokenState};

#[derive(Debug, Error)]
pub enum EntitlementError {
    #[error("Caller secret missing or wrong")]
    Unauthorized,

    #[error("Purchase not found")]
    PurchaseNotFound,

    #[error("Token not found")]
    TokenNotFound,

    /// Order exists but is not fulfilled yet (or never will be).
    #[error("Order not fulfilled")]
    NotFulfilled,

    #[error("Token already used")]
    AlreadyUsed,

    #[error("Token expired")]
    Expired,

    #[error("No deliverable mapped for product {0}")]
    NoObjectMapping(String),

    #[error(transparent)]
    Storage(#[from] AppError),
}

impl From<rusqlite::Error> for EntitlementError {
    fn from(e: rusqlite::Error) -> Self {
        EntitlementError::Storage(AppError::Database(e))
    }
}

impl From<EntitlementError> for AppError {
    fn from(e: EntitlementError) -> Self {
        match e {
            EntitlementError::Unauthorized => AppError::Unauthorized,
            EntitlementError::PurchaseNotFound => AppError::NotFound(msg::PURCHASE_NOT_FOUND.into()),
            EntitlementError::TokenNotFound => AppError::NotFound(msg::TOKEN_NOT_FOUND.into()),
            EntitlementError::NotFulfilled => AppError::Forbidden(msg::NOT_FULFILLED.into()),
            EntitlementError::AlreadyUsed => AppError::Conflict(msg::TOKEN_ALREADY_USED.into()),
            EntitlementError::Expired => AppError::Gone(msg::TOKEN_EXPIRED.into()),
            EntitlementError::NoObjectMapping(key) => {
                tracing::error!("No object key mapped for paid product {}", key);
                AppError::Misconfigured(format!("No deliverable mapped for product {}", key))
            }
            EntitlementError::Storage(inner) => inner,
        }
    }
}

/// Successful purchase verification.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseEntitlement {
    pub ok: bool,
    pub purchase_id: String,
    pub product_key: String,
    pub object_key: String,
}

/// Successful token verification. The token is still unused.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenEntitlement {
    pub ok: bool,
    pub purchase_id: String,
    pub product_key: String,
    pub object_key: String,
    pub expires_at: i64,
}

pub struct EntitlementVerifier {
    caller_secret: String,
}

impl EntitlementVerifier {
    pub fn new(caller_secret: impl Into<String>) -> Self {
        Self {
            caller_secret: caller_secret.into(),
        }
    }

    /// Constant-time check of the delivery service's shared secret.
    pub fn authenticate(&self, provided: Option<&str>) -> Result<(), EntitlementError> {
        let Some(provided) = provided else {
            return Err(EntitlementError::Unauthorized);
        };
        // An empty configured secret authenticates nobody
        if self.caller_secret.is_empty() {
            return Err(EntitlementError::Unauthorized);
        }
        let expected = self.caller_secret.as_bytes();
        let provided = provided.as_bytes();
        if expected.len() != provided.len() || !bool::from(expected.ct_eq(provided)) {
            return Err(EntitlementError::Unauthorized);
        }
        Ok(())
    }

    /// Confirm a purchase is paid and fulfilled, and name its deliverable.
    pub fn verify_purchase(
        &self,
        conn: &Connection,
        object_keys: &ObjectKeyMap,
        caller_secret: Option<&str>,
        purchase_id: &str,
    ) -> Result<PurchaseEntitlement, EntitlementError> {
        self.authenticate(caller_secret)?;

        let purchase = fulfilled_purchase(conn, purchase_id)?;
        let object_key = object_keys
            .resolve(&purchase.product_key)
            .ok_or_else(|| EntitlementError::NoObjectMapping(purchase.product_key.clone()))?;

        tracing::debug!("Entitlement verified: purchase={} object={}", purchase.id, object_key);

        Ok(PurchaseEntitlement {
            ok: true,
            object_key: object_key.to_string(),
            purchase_id: purchase.id,
            product_key: purchase.product_key,
        })
    }

    /// Check a download token without consuming it.
    pub fn verify_token(
        &self,
        conn: &Connection,
        caller_secret: Option<&str>,
        token: &str,
    ) -> Result<TokenEntitlement, EntitlementError> {
        self.authenticate(caller_secret)?;

        let record = queries::get_download_token(conn, token)?.ok_or(EntitlementError::TokenNotFound)?;
        require_fulfilled(queries::get_order(conn, &record.session_id)?)?;

        match record.state_at(queries::now()) {
            TokenState::Used => return Err(EntitlementError::AlreadyUsed),
            TokenState::Expired => return Err(EntitlementError::Expired),
            TokenState::Issued => {}
        }

        // Resolved at issue time; an empty key means the row predates a mapping fix
        if record.object_key.is_empty() {
            return Err(EntitlementError::NoObjectMapping(record.product_key));
        }

        Ok(TokenEntitlement {
            ok: true,
            purchase_id: record.purchase_id,
            product_key: record.product_key,
            object_key: record.object_key,
            expires_at: record.expires_at,
        })
    }

    /// Mark a token used. Exactly one concurrent caller wins; the rest see
    /// `AlreadyUsed` (or `Expired`/`TokenNotFound` as appropriate). A token
    /// whose order is still pending is never consumed.
    pub fn consume_token(
        &self,
        conn: &Connection,
        caller_secret: Option<&str>,
        token: &str,
    ) -> Result<(), EntitlementError> {
        self.authenticate(caller_secret)?;

        let now = queries::now();
        if queries::try_consume_download_token(conn, token, now)? {
            tracing::info!("Download token consumed");
            return Ok(());
        }

        // Lost: explain why from the current row
        let record = queries::get_download_token(conn, token)?.ok_or(EntitlementError::TokenNotFound)?;
        require_fulfilled(queries::get_order(conn, &record.session_id)?)?;
        match record.state_at(now) {
            TokenState::Used => Err(EntitlementError::AlreadyUsed),
            TokenState::Expired => Err(EntitlementError::Expired),
            TokenState::Issued => Err(AppError::Internal(format!(
                "Token for purchase {} is unused but could not be consumed",
                record.purchase_id
            ))
            .into()),
        }
    }
}

/// Resolve a purchase and require its order to be fulfilled. Used by the
/// browser entry point, which carries no caller secret.
pub fn fulfilled_purchase(conn: &Connection, purchase_id: &str) -> Result<Purchase, EntitlementError> {
    if !is_valid_prefixed_id(purchase_id) {
        return Err(EntitlementError::PurchaseNotFound);
    }
    let purchase =
        queries::get_purchase_by_id(conn, purchase_id)?.ok_or(EntitlementError::PurchaseNotFound)?;
    require_fulfilled(queries::get_order(conn, &purchase.session_id)?)?;
    Ok(purchase)
}

fn require_fulfilled(order: Option<Order>) -> Result<Order, EntitlementError> {
    match order {
        Some(order) if order.is_fulfilled() => Ok(order),
        _ => Err(EntitlementError::NotFulfilled),
    }
}
