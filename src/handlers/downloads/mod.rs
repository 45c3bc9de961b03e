//! Endpoints for the asset-delivery worker, plus the browser entry point
//! linked from confirmation emails.

use axum::{
    Json, Router,
    extract::State,
    http::HeaderMap,
    response::Redirect,
    routing::{get, post},
};
use serde_json::{Value, json};

use crate::db::AppState;
use crate::entitlement::{PurchaseEntitlement, TokenEntitlement, fulfilled_purchase};
use crate::error::{AppError, Result, msg};
use crate::extractors::Path;

/// Header the delivery worker sends its shared secret in.
pub const CALLER_SECRET_HEADER: &str = "x-caller-secret";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/downloads/verify/{purchase_id}", get(verify_purchase))
        .route("/downloads/tokens/{token}", get(verify_token))
        .route("/downloads/consume/{token}", post(consume_token))
        .route("/downloads/{purchase_id}", get(start_download))
}

fn caller_secret(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(CALLER_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
}

async fn verify_purchase(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(purchase_id): Path<String>,
) -> Result<Json<PurchaseEntitlement>> {
    let secret = caller_secret(&headers);
    state.entitlements.authenticate(secret)?;

    let conn = state.db.get()?;
    let entitlement =
        state
            .entitlements
            .verify_purchase(&conn, &state.object_keys, secret, &purchase_id)?;
    Ok(Json(entitlement))
}

async fn verify_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Json<TokenEntitlement>> {
    let secret = caller_secret(&headers);
    state.entitlements.authenticate(secret)?;

    let conn = state.db.get()?;
    Ok(Json(state.entitlements.verify_token(&conn, secret, &token)?))
}

async fn consume_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Result<Json<Value>> {
    let secret = caller_secret(&headers);
    state.entitlements.authenticate(secret)?;

    let conn = state.db.get()?;
    state.entitlements.consume_token(&conn, secret, &token)?;
    Ok(Json(json!({ "ok": true })))
}

/// Browser link from the confirmation email. Bytes are never served here;
/// a fulfilled purchase is redirected to the delivery worker.
async fn start_download(
    State(state): State<AppState>,
    Path(purchase_id): Path<String>,
) -> Result<Redirect> {
    let conn = state.db.get()?;
    let purchase = fulfilled_purchase(&conn, &purchase_id)?;

    let Some(base) = state.download_worker_url.as_deref() else {
        tracing::error!("DOWNLOAD_WORKER_URL is not set; cannot serve purchase {}", purchase.id);
        return Err(AppError::Misconfigured(msg::DOWNLOAD_UNAVAILABLE.into()));
    };

    Ok(Redirect::temporary(&format!(
        "{}/download/{}",
        base.trim_end_matches('/'),
        purchase.id
    )))
}
