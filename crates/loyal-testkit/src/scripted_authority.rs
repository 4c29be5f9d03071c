//! Scripted [`AccrualAuthority`].
//!
//! Each order number gets a list of responses consumed one per query; the
//! last one repeats forever. Unscripted orders get `NotFound`. Every call is
//! logged with its (tokio) timestamp so tests can assert on pacing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use loyal_accrual::{AccrualAuthority, AccrualReport, AuthorityError, AuthorityOutcome};
use loyal_schemas::{OrderNumber, OrderStatus};
use rust_decimal::Decimal;
use tokio::time::Instant;

pub type Scripted = Result<AuthorityOutcome, AuthorityError>;

/// One recorded query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityCall {
    pub number: OrderNumber,
    pub at: Instant,
}

#[derive(Debug, Default)]
pub struct ScriptedAuthority {
    scripts: Mutex<HashMap<OrderNumber, VecDeque<Scripted>>>,
    calls: Mutex<Vec<AuthorityCall>>,
    latency: Duration,
}

impl ScriptedAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every query sleeps for `latency` before answering.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Replace the script for `number`.
    pub fn script(&self, number: &str, responses: Vec<Scripted>) {
        self.scripts
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(OrderNumber::new(number), responses.into());
    }

    pub fn calls(&self) -> Vec<AuthorityCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn calls_for(&self, number: &str) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|c| c.number.as_str() == number)
            .count()
    }

    fn next_response(&self, number: &OrderNumber) -> Scripted {
        let mut scripts = self.scripts.lock().unwrap_or_else(|p| p.into_inner());
        match scripts.get_mut(number) {
            Some(queue) if queue.len() > 1 => queue
                .pop_front()
                .unwrap_or(Ok(AuthorityOutcome::NotFound)),
            Some(queue) => queue
                .front()
                .cloned()
                .unwrap_or(Ok(AuthorityOutcome::NotFound)),
            None => Ok(AuthorityOutcome::NotFound),
        }
    }
}

#[async_trait]
impl AccrualAuthority for ScriptedAuthority {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn query(&self, number: &OrderNumber) -> Result<AuthorityOutcome, AuthorityError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(AuthorityCall {
                number: number.clone(),
                at: Instant::now(),
            });
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.next_response(number)
    }
}

// ---------------------------------------------------------------------------
// Response builders
// ---------------------------------------------------------------------------

pub fn report(number: &str, status: OrderStatus, accrual: Option<u64>) -> Scripted {
    Ok(AuthorityOutcome::Report(AccrualReport {
        order: OrderNumber::new(number),
        status,
        accrual: accrual.map(Decimal::from),
    }))
}

pub fn processed(number: &str, accrual: u64) -> Scripted {
    report(number, OrderStatus::Processed, Some(accrual))
}

pub fn processing(number: &str) -> Scripted {
    report(number, OrderStatus::Processing, None)
}

pub fn rate_limited(retry_after: Option<Duration>) -> Scripted {
    Ok(AuthorityOutcome::RateLimited { retry_after })
}

pub fn transport_error() -> Scripted {
    Err(AuthorityError::Transport("connection refused".to_string()))
}

pub fn decode_error() -> Scripted {
    Err(AuthorityError::Decode("expected value at line 1 column 1".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_scripted_response_repeats() {
        let a = ScriptedAuthority::new();
        a.script("133", vec![processing("133"), processed("133", 5)]);
        let n = OrderNumber::new("133");

        assert_eq!(a.query(&n).await, processing("133"));
        assert_eq!(a.query(&n).await, processed("133", 5));
        assert_eq!(a.query(&n).await, processed("133", 5));
        assert_eq!(a.calls_for("133"), 3);
    }

    #[tokio::test]
    async fn unscripted_order_is_not_found() {
        let a = ScriptedAuthority::new();
        assert_eq!(
            a.query(&OrderNumber::new("5843")).await,
            Ok(AuthorityOutcome::NotFound)
        );
    }
}
