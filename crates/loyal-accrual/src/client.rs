//! reqwest-backed [`AccrualAuthority`].
//!
//! `GET {base}/api/orders/{number}`:
//! - 200 with `{"order","status","accrual"?}` → `Report`
//! - 204 → `NotFound`
//! - 429 with optional `Retry-After: <seconds>` → `RateLimited`
//! - anything else → `Transport`

use std::time::Duration;

use async_trait::async_trait;
use loyal_schemas::{OrderNumber, OrderStatus};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

use crate::authority::{AccrualAuthority, AccrualReport, AuthorityError, AuthorityOutcome};

pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HttpAccrualClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpAccrualClient {
    pub fn new(base_url: String) -> Result<Self, reqwest::Error> {
        Self::new_with_timeout(base_url, DEFAULT_QUERY_TIMEOUT)
    }

    /// Every query is bounded by `timeout`; expiry surfaces as a transport error.
    pub fn new_with_timeout(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, base_url })
    }

    fn order_url(&self, number: &OrderNumber) -> String {
        format!("{}/api/orders/{}", self.base_url.trim_end_matches('/'), number)
    }
}

#[async_trait]
impl AccrualAuthority for HttpAccrualClient {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn query(&self, number: &OrderNumber) -> Result<AuthorityOutcome, AuthorityError> {
        let resp = self
            .http
            .get(self.order_url(number))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthorityError::Transport(format!("accrual query timed out: {e}"))
                } else {
                    AuthorityError::Transport(format!("accrual request failed: {e}"))
                }
            })?;

        let status = resp.status();
        debug!(order = %number, status = status.as_u16(), "accrual authority responded");

        match status {
            StatusCode::OK => {
                let body = resp
                    .bytes()
                    .await
                    .map_err(|e| AuthorityError::Transport(format!("accrual body read failed: {e}")))?;
                decode_report(number, &body).map(AuthorityOutcome::Report)
            }
            StatusCode::NO_CONTENT => Ok(AuthorityOutcome::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = resp
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(parse_retry_after);
                Ok(AuthorityOutcome::RateLimited { retry_after })
            }
            other => Err(AuthorityError::Transport(format!(
                "unexpected accrual http status {}",
                other.as_u16()
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireReport {
    order: String,
    status: String,
    #[serde(default)]
    accrual: Option<Decimal>,
}

/// Decode a 200 body and check it against the order that was asked for.
fn decode_report(requested: &OrderNumber, body: &[u8]) -> Result<AccrualReport, AuthorityError> {
    let wire: WireReport = serde_json::from_slice(body)
        .map_err(|e| AuthorityError::Decode(format!("accrual json decode failed: {e}")))?;

    if wire.order != requested.as_str() {
        return Err(AuthorityError::Decode(format!(
            "accrual response for order {} does not match requested {}",
            wire.order, requested
        )));
    }

    let status = OrderStatus::parse(&wire.status)
        .ok_or_else(|| AuthorityError::Decode(format!("unknown accrual status '{}'", wire.status)))?;

    if let Some(a) = wire.accrual {
        if a < Decimal::ZERO {
            return Err(AuthorityError::Decode(format!("negative accrual {a}")));
        }
    }

    Ok(AccrualReport {
        order: requested.clone(),
        status,
        accrual: wire.accrual,
    })
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(v: &str) -> Option<Duration> {
    v.trim().parse::<u64>().ok().map(Duration::from_secs)
}
