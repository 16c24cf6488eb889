//! Integration tests for PagBank notifications.
//!
//! Signatures are computed here independently of the service code:
//! `sha256_hex("{token}-{raw body}")`.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use axum::http::StatusCode;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use makelifebetter_integration_tests::{Gateways, PAGBANK_TOKEN, TestApp};

fn sign(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(PAGBANK_TOKEN.as_bytes());
    hasher.update(b"-");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn notification(reference: &str, status: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "NOTIF_1",
        "type": "CHECKOUT",
        "reference_id": reference,
        "status": status
    }))
    .unwrap()
}

/// Order document without the fields every write refreshes.
fn stable(mut doc: Value) -> Value {
    doc.as_object_mut().unwrap().remove("updatedAt");
    doc["pagbank"]["lastEvent"]
        .as_object_mut()
        .unwrap()
        .remove("receivedAt");
    doc
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_single_byte_signature_change_is_rejected() {
    let app = TestApp::spawn().await;
    let body = notification("order-1", "PAID");
    let signature = sign(&body);

    for i in 0..signature.len() {
        let mut mutated = signature.clone().into_bytes();
        mutated[i] = if mutated[i] == b'a' { b'b' } else { b'a' };
        let mutated = String::from_utf8(mutated).unwrap();

        let response = app.notify(&body, Some(&mutated)).await;
        assert_eq!(response.status, StatusCode::UNAUTHORIZED, "byte {i}");
        assert_eq!(response.text(), "Unauthorized");
    }

    let response = app.notify(&body, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(app.orders.is_empty().await);
}

#[tokio::test]
async fn test_signature_covers_raw_bytes() {
    let app = TestApp::spawn().await;
    let body = notification("order-1", "PAID");
    let signature = sign(&body);

    // Same JSON, different bytes.
    let mut reformatted = body.clone();
    reformatted.push(b'\n');

    let response = app.notify(&reformatted, Some(&signature)).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    assert!(app.orders.is_empty().await);
}

#[tokio::test]
async fn test_missing_secret_is_server_error() {
    let app = TestApp::with_gateways(Gateways::Unconfigured).await;
    let body = notification("order-1", "PAID");

    let response = app.notify(&body, Some(&sign(&body))).await;
    assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "Missing token");
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_paid_notification_is_idempotent() {
    let app = TestApp::spawn().await;
    let body = notification("order-1", "paid");
    let signature = sign(&body);

    let response = app.notify(&body, Some(&signature)).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "ok");
    let first = app.order("order-1").await.unwrap();

    let response = app.notify(&body, Some(&signature)).await;
    assert_eq!(response.status, StatusCode::OK);
    let second = app.order("order-1").await.unwrap();

    assert_eq!(first["status"], "paid");
    assert_eq!(first["payment"], json!({"provider": "pagbank", "status": "PAID"}));
    assert_eq!(
        first["pagbank"]["lastEvent"]["status"],
        "PAID",
        "provider status is upper-cased"
    );
    assert_eq!(first["pagbank"]["lastEvent"]["id"], "NOTIF_1");
    assert_eq!(stable(first), stable(second));
}

#[tokio::test]
async fn test_notification_for_checkout_order_marks_it_paid() {
    let app = TestApp::spawn().await;
    Mock::given(method("POST"))
        .and(path("/checkouts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "CHEC_1",
            "links": [{"rel": "PAY", "href": "https://pagamento.example/CHEC_1"}]
        })))
        .mount(&app.pagbank)
        .await;

    let response = app
        .post(
            "/createPagBankCheckout",
            &json!({"items": [{"id": "p2", "quantity": 1}]}),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    let order_id = response.json()["orderId"].as_str().unwrap().to_string();

    let body = serde_json::to_vec(&json!({
        "data": {"reference_id": order_id, "status": "PAID", "id": "CHAR_9"}
    }))
    .unwrap();
    let response = app.notify(&body, Some(&sign(&body))).await;
    assert_eq!(response.status, StatusCode::OK);

    let order = app.order(&order_id).await.unwrap();
    assert_eq!(order["status"], "paid");
    assert_eq!(order["total"], json!(40.5));
    assert_eq!(order["pagbank"]["checkoutId"], "CHEC_1");
    assert_eq!(order["pagbank"]["lastEvent"]["id"], "CHAR_9");
}

#[tokio::test]
async fn test_cancelled_statuses() {
    let app = TestApp::spawn().await;

    for (i, status) in ["DECLINED", "CANCELED", "EXPIRED", "INACTIVE"]
        .into_iter()
        .enumerate()
    {
        let reference = format!("order-{i}");
        let body = notification(&reference, status);
        let response = app.notify(&body, Some(&sign(&body))).await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(app.order(&reference).await.unwrap()["status"], "cancelled");
    }

    let body = notification("order-waiting", "WAITING");
    app.notify(&body, Some(&sign(&body))).await;
    assert_eq!(app.order("order-waiting").await.unwrap()["status"], "pending");
}

#[tokio::test]
async fn test_late_notification_does_not_reopen_paid_order() {
    let app = TestApp::spawn().await;

    let paid = notification("order-1", "PAID");
    app.notify(&paid, Some(&sign(&paid))).await;

    let expired = notification("order-1", "EXPIRED");
    let response = app.notify(&expired, Some(&sign(&expired))).await;
    assert_eq!(response.status, StatusCode::OK);

    let order = app.order("order-1").await.unwrap();
    assert_eq!(order["status"], "paid");
    assert_eq!(order["payment"]["status"], "EXPIRED");
    assert_eq!(order["pagbank"]["lastEvent"]["status"], "EXPIRED");
}

#[tokio::test]
async fn test_unreferenced_notification_is_acknowledged() {
    let app = TestApp::spawn().await;
    let body = serde_json::to_vec(&json!({"status": "PAID"})).unwrap();

    let response = app.notify(&body, Some(&sign(&body))).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.text(), "ok");
    assert!(app.orders.is_empty().await);
}
