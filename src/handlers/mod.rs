pub mod downloads;
pub mod webhooks;

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

use crate::db::AppState;

/// All routes served by the binary.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(webhooks::router())
        .merge(downloads::router())
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
