pub mod stripe;

pub use stripe::handle_stripe_webhook;

use axum::{Router, routing::post};
use serde::Serialize;

use crate::db::AppState;

/// Body returned for every accepted delivery, new or duplicate.
#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

impl WebhookAck {
    pub fn received() -> Self {
        Self { received: true }
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/stripe", post(handle_stripe_webhook))
}
