//! Test utilities and fixtures for fulfillment integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

pub use fulfillment::catalog::ObjectKeyMap;
pub use fulfillment::db::{AppState, create_pool, init_db, queries};
pub use fulfillment::email::{EmailSendResult, Notifier};
pub use fulfillment::entitlement::EntitlementVerifier;
pub use fulfillment::error::AppError;
pub use fulfillment::handlers;
pub use fulfillment::models::*;
pub use fulfillment::payments::{PaymentEvent, StripeVerifier};

pub const WEBHOOK_SECRET: &str = "whsec_test123secret456";
pub const WORKER_SECRET: &str = "worker_secret_for_tests";
pub const WORKER_URL: &str = "https://dl.example.com";

/// Get the current timestamp
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Notifier double that records what it was asked to send.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, usize)>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent_sessions(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_confirmation(
        &self,
        order: &Order,
        purchases: &[Purchase],
    ) -> fulfillment::error::Result<EmailSendResult> {
        self.sent
            .lock()
            .unwrap()
            .push((order.session_id.clone(), purchases.len()));
        if self.fail {
            return Err(AppError::Internal("mail provider down".into()));
        }
        Ok(EmailSendResult::Sent)
    }
}

/// App state backed by a temp-file database (shared across pool connections).
pub struct TestApp {
    pub state: AppState,
    pub notifier: Arc<RecordingNotifier>,
    _dir: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(RecordingNotifier::default(), Some(WORKER_URL))
    }

    pub fn with(notifier: RecordingNotifier, worker_url: Option<&str>) -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        let pool = create_pool(path.to_str().unwrap()).expect("Failed to create pool");
        {
            let conn = pool.get().unwrap();
            init_db(&conn).unwrap();
        }

        let notifier = Arc::new(notifier);
        let state = AppState {
            db: pool,
            signature_verifier: Arc::new(StripeVerifier::new(WEBHOOK_SECRET)),
            entitlements: Arc::new(EntitlementVerifier::new(WORKER_SECRET)),
            object_keys: Arc::new(ObjectKeyMap::digital_files()),
            notifier: notifier.clone(),
            download_worker_url: worker_url.map(String::from),
        };

        Self {
            state,
            notifier,
            _dir: dir,
        }
    }

    pub fn router(&self) -> Router {
        handlers::router().with_state(self.state.clone())
    }

    pub fn conn(&self) -> PooledConnection<SqliteConnectionManager> {
        self.state.db.get().unwrap()
    }

    pub fn count(&self, table: &str) -> i64 {
        self.conn()
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .unwrap()
    }

    /// Create a class session with `seats` seats and return its id.
    pub fn class_session(&self, seats: i64) -> i64 {
        queries::create_class_session(
            &self.conn(),
            &CreateClassSession {
                product_key: "SOUNDBATH_PUBLIC".into(),
                start_time: now() + 86400,
                end_time: now() + 86400 + 5400,
                seats_total: seats,
            },
        )
        .unwrap()
        .id
    }

    /// Let spawned notification tasks run.
    pub async fn settle(&self) {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }
}

// ============ Payment events ============

pub fn payment_event(event_id: &str, session_id: &str, meta: &[(&str, &str)]) -> PaymentEvent {
    PaymentEvent {
        event_id: event_id.into(),
        session_id: session_id.into(),
        amount_cents: 500,
        currency: "usd".into(),
        customer_email: Some("buyer@example.com".into()),
        metadata: meta
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
    }
}

pub fn digital_meta() -> Vec<(&'static str, &'static str)> {
    vec![("productKey", "BLACK_CANYON_GUIDE"), ("type", "digital")]
}

/// Raw body of a paid `checkout.session.completed` event.
pub fn checkout_body(event_id: &str, session_id: &str, amount: i64, metadata: Value) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": "checkout.session.completed",
        "data": {
            "object": {
                "id": session_id,
                "payment_status": "paid",
                "amount_total": amount,
                "currency": "usd",
                "customer_details": { "email": "buyer@example.com" },
                "metadata": metadata
            }
        }
    }))
    .unwrap()
}

pub fn compute_stripe_signature(payload: &[u8], secret: &str, timestamp: &str) -> String {
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    type HmacSha256 = Hmac<Sha256>;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// A valid `stripe-signature` header for `payload`, signed now.
pub fn stripe_signature_header(payload: &[u8], secret: &str) -> String {
    let timestamp = now().to_string();
    format!(
        "t={},v1={}",
        timestamp,
        compute_stripe_signature(payload, secret, &timestamp)
    )
}

// ============ HTTP helpers ============

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub async fn post_webhook(app: Router, body: Vec<u8>, signature: Option<&str>) -> (StatusCode, Value) {
    let mut req = Request::builder()
        .method("POST")
        .uri("/webhook/stripe")
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        req = req.header("stripe-signature", sig);
    }
    let response = app.oneshot(req.body(Body::from(body)).unwrap()).await.unwrap();
    let status = response.status();
    (status, read_json(response).await)
}

/// Sign and deliver a checkout event.
pub async fn deliver(app: Router, body: Vec<u8>) -> (StatusCode, Value) {
    let sig = stripe_signature_header(&body, WEBHOOK_SECRET);
    post_webhook(app, body, Some(&sig)).await
}

pub async fn worker_request(
    app: Router,
    method: &str,
    uri: &str,
    secret: Option<&str>,
) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(secret) = secret {
        req = req.header("x-caller-secret", secret);
    }
    let response = app.oneshot(req.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    (status, read_json(response).await)
}
