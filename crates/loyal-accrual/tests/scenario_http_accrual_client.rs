//! Scenario: the HTTP accrual client maps every authority response class.
//!
//! In-process `httpmock` server, no network.

use std::time::Duration;

use httpmock::prelude::*;
use loyal_accrual::{AccrualAuthority, AuthorityError, AuthorityOutcome, HttpAccrualClient};
use loyal_schemas::{OrderNumber, OrderStatus};
use rust_decimal::Decimal;

fn client(server: &MockServer) -> HttpAccrualClient {
    HttpAccrualClient::new_with_timeout(server.base_url(), Duration::from_millis(500))
        .expect("client")
}

#[tokio::test]
async fn ok_body_becomes_report() {
    let server = MockServer::start_async().await;
    let m = server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/79927398713");
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"order":"79927398713","status":"PROCESSED","accrual":729.98}"#);
        })
        .await;

    let out = client(&server)
        .query(&OrderNumber::new("79927398713"))
        .await
        .expect("query");

    m.assert_async().await;
    match out {
        AuthorityOutcome::Report(r) => {
            assert_eq!(r.status, OrderStatus::Processed);
            assert_eq!(r.accrual, Some(Decimal::new(72998, 2)));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn no_content_is_not_found() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/133");
            then.status(204);
        })
        .await;

    let out = client(&server).query(&OrderNumber::new("133")).await.expect("query");
    assert_eq!(out, AuthorityOutcome::NotFound);
}

#[tokio::test]
async fn too_many_requests_carries_retry_after() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/133");
            then.status(429)
                .header("Retry-After", "60")
                .body("No more than N requests per minute allowed");
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/5843");
            then.status(429);
        })
        .await;

    let c = client(&server);
    assert_eq!(
        c.query(&OrderNumber::new("133")).await.expect("query"),
        AuthorityOutcome::RateLimited {
            retry_after: Some(Duration::from_secs(60))
        }
    );
    assert_eq!(
        c.query(&OrderNumber::new("5843")).await.expect("query"),
        AuthorityOutcome::RateLimited { retry_after: None }
    );
}

#[tokio::test]
async fn server_error_is_transport() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/133");
            then.status(500);
        })
        .await;

    let err = client(&server).query(&OrderNumber::new("133")).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Transport(_)), "{err}");
}

#[tokio::test]
async fn garbage_body_is_decode_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/133");
            then.status(200).body("<html>oops</html>");
        })
        .await;

    let err = client(&server).query(&OrderNumber::new("133")).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Decode(_)), "{err}");
}

#[tokio::test]
async fn slow_authority_times_out_as_transport() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/api/orders/133");
            then.status(200)
                .delay(Duration::from_secs(2))
                .body(r#"{"order":"133","status":"PROCESSING"}"#);
        })
        .await;

    let err = client(&server).query(&OrderNumber::new("133")).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Transport(_)), "{err}");
}

#[tokio::test]
async fn unreachable_authority_is_transport() {
    // Port 9 (discard) on localhost is assumed closed.
    let c = HttpAccrualClient::new_with_timeout("http://127.0.0.1:9".to_string(), Duration::from_millis(500))
        .expect("client");
    let err = c.query(&OrderNumber::new("133")).await.unwrap_err();
    assert!(matches!(err, AuthorityError::Transport(_)), "{err}");
}
