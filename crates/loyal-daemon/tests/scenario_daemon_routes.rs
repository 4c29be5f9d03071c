//! Scenario: user API routes over an in-memory store.
//!
//! # Contract under test
//!
//! - Every `/api/user/*` route requires `X-User-Id` (401 otherwise).
//! - Order submission maps ledger outcomes to 202 / 200 / 400 / 409 / 422
//!   and enqueues freshly accepted orders for reconciliation.
//! - Listing routes answer 204 when there is nothing to list.
//! - Withdrawals map to 200 / 400 / 402 / 422; a failed store is a 500
//!   whose body does not leak storage details.
//!
//! All tests are pure in-process; no DB or network required.

use std::sync::Arc;

use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use loyal_daemon::{routes, state};
use loyal_runtime::OrderQueue;
use loyal_schemas::{OrderNumber, OrderStatus, OwnerId};
use loyal_testkit::MemoryStore;
use rust_decimal::Decimal;
use tower::ServiceExt; // oneshot

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<MemoryStore>,
    queue: OrderQueue,
    // Keeps the queue's receiver alive so enqueue succeeds.
    _rx: tokio::sync::mpsc::UnboundedReceiver<loyal_runtime::PendingOrder>,
    state: Arc<state::AppState>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::new());
    let (queue, rx) = OrderQueue::new();
    let state = Arc::new(state::AppState::new(store.clone(), queue.clone(), None));
    Harness {
        store,
        queue,
        _rx: rx,
        state,
    }
}

fn make_router(h: &Harness) -> axum::Router {
    routes::build_router(Arc::clone(&h.state))
}

async fn call(router: axum::Router, req: Request<axum::body::Body>) -> (StatusCode, bytes::Bytes) {
    let resp = router.oneshot(req).await.expect("oneshot failed");
    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .expect("body collect failed")
        .to_bytes();
    (status, body)
}

fn parse_json(b: bytes::Bytes) -> serde_json::Value {
    serde_json::from_slice(&b).expect("body is not valid JSON")
}

fn get(uri: &str, user: Option<&str>) -> Request<axum::body::Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(u) = user {
        b = b.header("X-User-Id", u);
    }
    b.body(axum::body::Body::empty()).unwrap()
}

fn post_text(uri: &str, user: &str, body: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-User-Id", user)
        .header("content-type", "text/plain")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

fn post_json(uri: &str, user: &str, body: &str) -> Request<axum::body::Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("X-User-Id", user)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .unwrap()
}

async fn seed_processed(h: &Harness, owner: &str, number: &str, accrual: i64) {
    h.store
        .seed_order(
            &OwnerId::new(owner),
            &OrderNumber::new(number),
            OrderStatus::Processed,
            Decimal::from(accrual),
        )
        .await;
}

// ---------------------------------------------------------------------------
// Health / auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_is_open_and_reports_service() {
    let h = harness();
    let (status, body) = call(make_router(&h), get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["ok"], true);
    assert_eq!(json["service"], "loyal-daemon");
    assert!(json.get("worker").is_none(), "no worker attached");
}

#[tokio::test]
async fn user_routes_require_owner_header() {
    let h = harness();
    for uri in ["/api/user/orders", "/api/user/balance", "/api/user/withdrawals"] {
        let (status, body) = call(make_router(&h), get(uri, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        assert_eq!(parse_json(body)["error"], "UNAUTHORIZED");
    }

    let (status, _) = call(make_router(&h), get("/api/user/balance", Some("   "))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "blank id is not an id");
}

// ---------------------------------------------------------------------------
// POST /api/user/orders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_order_accepts_then_reports_already_submitted() {
    let h = harness();

    let (status, _) = call(
        make_router(&h),
        post_text("/api/user/orders", "alice", "79927398713"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(h.queue.is_tracked(&OrderNumber::new("79927398713")));

    let (status, _) = call(
        make_router(&h),
        post_text("/api/user/orders", "alice", " 79927398713\n"),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "same owner resubmitting");

    let (status, body) = call(
        make_router(&h),
        post_text("/api/user/orders", "bob", "79927398713"),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(parse_json(body)["error"], "CONFLICT");
}

#[tokio::test]
async fn submit_order_rejects_malformed_and_bad_checksum() {
    let h = harness();

    let (status, body) = call(
        make_router(&h),
        post_text("/api/user/orders", "alice", "12ab34"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(parse_json(body)["error"], "MALFORMED");

    let (status, body) = call(
        make_router(&h),
        post_text("/api/user/orders", "alice", "79927398710"),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(parse_json(body)["error"], "CHECKSUM_FAILED");

    assert_eq!(h.queue.tracked_len(), 0, "rejected numbers are never queued");
}

// ---------------------------------------------------------------------------
// GET /api/user/orders
// ---------------------------------------------------------------------------

#[tokio::test]
async fn list_orders_is_204_when_empty_and_hides_non_processed_accrual() {
    let h = harness();

    let (status, body) = call(make_router(&h), get("/api/user/orders", Some("alice"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_empty());

    seed_processed(&h, "alice", "79927398713", 500).await;
    let (status, _) = call(
        make_router(&h),
        post_text("/api/user/orders", "alice", "12345678903"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = call(make_router(&h), get("/api/user/orders", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    let list = json.as_array().expect("array body");
    assert_eq!(list.len(), 2);

    let processed = list
        .iter()
        .find(|o| o["number"] == "79927398713")
        .expect("processed order listed");
    assert_eq!(processed["status"], "PROCESSED");
    assert_eq!(processed["accrual"].as_f64(), Some(500.0));

    let fresh = list
        .iter()
        .find(|o| o["number"] == "12345678903")
        .expect("new order listed");
    assert_eq!(fresh["status"], "NEW");
    assert!(fresh.get("accrual").is_none());
    assert!(fresh["uploaded_at"].is_string());

    // Other owners see nothing.
    let (status, _) = call(make_router(&h), get("/api/user/orders", Some("bob"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

// ---------------------------------------------------------------------------
// Balance and withdrawals
// ---------------------------------------------------------------------------

#[tokio::test]
async fn withdraw_updates_balance_and_history() {
    let h = harness();
    seed_processed(&h, "alice", "79927398713", 500).await;

    let (status, body) = call(make_router(&h), get("/api/user/balance", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["current"].as_f64(), Some(500.0));
    assert_eq!(json["withdrawn"].as_f64(), Some(0.0));

    let (status, body) = call(
        make_router(&h),
        post_json(
            "/api/user/balance/withdraw",
            "alice",
            r#"{"order":"2377225624","sum":200.5}"#,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json["order"], "2377225624");
    assert_eq!(json["sum"].as_f64(), Some(200.5));

    let (_, body) = call(make_router(&h), get("/api/user/balance", Some("alice"))).await;
    let json = parse_json(body);
    assert_eq!(json["current"].as_f64(), Some(299.5));
    assert_eq!(json["withdrawn"].as_f64(), Some(200.5));

    let (status, body) = call(make_router(&h), get("/api/user/withdrawals", Some("alice"))).await;
    assert_eq!(status, StatusCode::OK);
    let json = parse_json(body);
    assert_eq!(json.as_array().map(Vec::len), Some(1));
    assert!(json[0]["processed_at"].is_string());
}

#[tokio::test]
async fn withdraw_error_statuses() {
    let h = harness();
    seed_processed(&h, "alice", "79927398713", 100).await;

    let cases = [
        (r#"{"order":"2377225624","sum":101}"#, StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_FUNDS"),
        (r#"{"order":"2377225625","sum":10}"#, StatusCode::UNPROCESSABLE_ENTITY, "CHECKSUM_FAILED"),
        (r#"{"order":"2377225624","sum":0}"#, StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        (r#"{"order":"2377225624","sum":-5}"#, StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
        (r#"{"order":"2377225624"}"#, StatusCode::BAD_REQUEST, "MALFORMED_BODY"),
        ("not json", StatusCode::BAD_REQUEST, "MALFORMED_BODY"),
    ];

    for (body, want_status, want_code) in cases {
        let (status, resp) = call(
            make_router(&h),
            post_json("/api/user/balance/withdraw", "alice", body),
        )
        .await;
        assert_eq!(status, want_status, "body: {body}");
        assert_eq!(parse_json(resp)["error"], want_code, "body: {body}");
    }

    // Nothing was written by any failed attempt.
    let (status, _) = call(make_router(&h), get("/api/user/withdrawals", Some("alice"))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn storage_failure_is_opaque_500() {
    let h = harness();
    h.store.set_failing(true);

    let (status, body) = call(make_router(&h), get("/api/user/balance", Some("alice"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let json = parse_json(body);
    assert_eq!(json["error"], "STORAGE_ERROR");
    assert_eq!(json["message"], "internal storage error");
}
