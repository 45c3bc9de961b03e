//! Entitlement handshake for the asset-delivery worker

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::*;
use fulfillment::fulfillment::{FulfillmentArtifacts, PaymentOutcome, process_payment};
use fulfillment::ledger::record_order;
use serde_json::json;
use tower::ServiceExt;

/// Fulfilled digital purchase. Returns (purchase_id, token).
fn fulfilled_digital(app: &TestApp, session_id: &str) -> (String, String) {
    let mut conn = app.conn();
    let outcome = process_payment(
        &mut conn,
        &app.state.object_keys,
        &payment_event(&format!("evt_{}", session_id), session_id, &digital_meta()),
    )
    .unwrap();
    let PaymentOutcome::Fulfilled {
        purchases,
        artifacts: FulfillmentArtifacts::DownloadToken(token),
        ..
    } = outcome
    else {
        panic!("expected fulfilled digital order");
    };
    (purchases[0].id.clone(), token.token)
}

// ============ Purchase verification ============

#[tokio::test]
async fn test_verify_fulfilled_purchase() {
    let app = TestApp::new();
    let (purchase_id, _) = fulfilled_digital(&app, "sess_1");

    let (status, body) = worker_request(
        app.router(),
        "GET",
        &format!("/downloads/verify/{}", purchase_id),
        Some(WORKER_SECRET),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "ok": true,
            "purchaseId": purchase_id,
            "productKey": "BLACK_CANYON_GUIDE",
            "objectKey": "black-canyon-guide.pdf"
        })
    );
}

#[tokio::test]
async fn test_wrong_secret_is_401_and_changes_nothing() {
    let app = TestApp::new();
    let (purchase_id, token) = fulfilled_digital(&app, "sess_1");
    let uri = format!("/downloads/verify/{}", purchase_id);

    let (status, _) = worker_request(app.router(), "GET", &uri, Some("not-the-secret")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = worker_request(app.router(), "GET", &uri, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = worker_request(
        app.router(),
        "POST",
        &format!("/downloads/consume/{}", token),
        Some("not-the-secret"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Token untouched
    let stored = queries::get_download_token(&app.conn(), &token).unwrap().unwrap();
    assert!(stored.used_at.is_none());
}

#[tokio::test]
async fn test_unknown_purchase_is_404() {
    let app = TestApp::new();
    for id in ["ff_pur_00000000000000000000000000000000", "sess_1", "1"] {
        let (status, body) = worker_request(
            app.router(),
            "GET",
            &format!("/downloads/verify/{}", id),
            Some(WORKER_SECRET),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", id);
        assert_eq!(body["details"], "Purchase not found");
    }
}

#[tokio::test]
async fn test_pending_order_is_403_on_every_retry() {
    let app = TestApp::new();
    let recorded = {
        let mut conn = app.conn();
        record_order(
            &mut conn,
            &payment_event("evt_p", "sess_p", &digital_meta()),
            "BLACK_CANYON_GUIDE",
        )
        .unwrap()
    };

    for _ in 0..3 {
        let (status, _) = worker_request(
            app.router(),
            "GET",
            &format!("/downloads/verify/{}", recorded.purchase.id),
            Some(WORKER_SECRET),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
}

#[tokio::test]
async fn test_missing_mapping_is_500_not_403() {
    let app = TestApp::new();
    let (purchase_id, _) = fulfilled_digital(&app, "sess_1");

    // Same data, but a worker-facing map that lost the entry
    let mut state = app.state.clone();
    state.object_keys = std::sync::Arc::new(ObjectKeyMap::default());
    let router = handlers::router().with_state(state);

    let (status, body) = worker_request(
        router,
        "GET",
        &format!("/downloads/verify/{}", purchase_id),
        Some(WORKER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Misconfigured");
}

// ============ Tokens ============

#[tokio::test]
async fn test_token_verify_then_consume_once() {
    let app = TestApp::new();
    let (purchase_id, token) = fulfilled_digital(&app, "sess_1");

    let (status, body) = worker_request(
        app.router(),
        "GET",
        &format!("/downloads/tokens/{}", token),
        Some(WORKER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["purchaseId"], purchase_id.as_str());
    assert_eq!(body["objectKey"], "black-canyon-guide.pdf");
    assert!(body["expiresAt"].as_i64().unwrap() > now());

    let consume = format!("/downloads/consume/{}", token);
    let (status, body) = worker_request(app.router(), "POST", &consume, Some(WORKER_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));

    for _ in 0..2 {
        let (status, _) = worker_request(app.router(), "POST", &consume, Some(WORKER_SECRET)).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    let (status, _) = worker_request(
        app.router(),
        "GET",
        &format!("/downloads/tokens/{}", token),
        Some(WORKER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_token_of_pending_order_is_403() {
    let app = TestApp::new();
    let (_, token) = fulfilled_digital(&app, "sess_1");
    app.conn()
        .execute("UPDATE orders SET status = 'pending' WHERE session_id = 'sess_1'", [])
        .unwrap();

    let (status, _) = worker_request(
        app.router(),
        "POST",
        &format!("/downloads/consume/{}", token),
        Some(WORKER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let stored = queries::get_download_token(&app.conn(), &token).unwrap().unwrap();
    assert!(stored.used_at.is_none());
}

#[tokio::test]
async fn test_expired_token_is_410() {
    let app = TestApp::new();
    let (_, token) = fulfilled_digital(&app, "sess_1");
    app.conn()
        .execute(
            "UPDATE download_tokens SET expires_at = ?1 WHERE token = ?2",
            rusqlite::params![now() - 60, &token],
        )
        .unwrap();

    let (status, _) = worker_request(
        app.router(),
        "GET",
        &format!("/downloads/tokens/{}", token),
        Some(WORKER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);

    let (status, _) = worker_request(
        app.router(),
        "POST",
        &format!("/downloads/consume/{}", token),
        Some(WORKER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn test_unknown_token_is_404() {
    let app = TestApp::new();
    let (status, body) = worker_request(
        app.router(),
        "POST",
        "/downloads/consume/deadbeef",
        Some(WORKER_SECRET),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["details"], "Invalid token");
}

// ============ Browser entry point ============

async fn browser_get(app: axum::Router, purchase_id: &str) -> axum::response::Response {
    app.oneshot(
        Request::builder()
            .uri(format!("/downloads/{}", purchase_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
}

#[tokio::test]
async fn test_browser_link_redirects_to_worker() {
    let app = TestApp::new();
    let (purchase_id, _) = fulfilled_digital(&app, "sess_1");

    let response = browser_get(app.router(), &purchase_id).await;
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        format!("{}/download/{}", WORKER_URL, purchase_id).as_str()
    );
}

#[tokio::test]
async fn test_browser_link_denials() {
    let app = TestApp::with(RecordingNotifier::default(), None);
    let (purchase_id, _) = fulfilled_digital(&app, "sess_1");

    let response = browser_get(app.router(), &purchase_id).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let response = browser_get(app.router(), "ff_pur_00000000000000000000000000000000").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
