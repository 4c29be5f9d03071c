//! Boundary to the external accrual authority.
//!
//! Only the outcome/error vocabulary and the trait live here. The HTTP
//! implementation is in [`crate::client`]; scripted fakes live in the testkit.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use loyal_schemas::{OrderNumber, OrderStatus};
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// A fully parsed authority response for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccrualReport {
    pub order: OrderNumber,
    /// `REGISTERED` on the wire is mapped to [`OrderStatus::New`].
    pub status: OrderStatus,
    /// Present (and non-negative) only when the authority sent one.
    pub accrual: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityOutcome {
    /// The authority does not know the order yet.
    NotFound,
    Report(AccrualReport),
    /// "Too many requests". `retry_after` is the server hint, if any.
    RateLimited { retry_after: Option<Duration> },
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    /// Connection failure, timeout, or an unexpected HTTP status.
    Transport(String),
    /// The response body could not be decoded into an [`AccrualReport`].
    Decode(String),
}

impl fmt::Display for AuthorityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthorityError::Transport(msg) => write!(f, "transport error: {msg}"),
            AuthorityError::Decode(msg) => write!(f, "decode error: {msg}"),
        }
    }
}

impl std::error::Error for AuthorityError {}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Read-only query interface of the accrual authority.
///
/// Object-safe and `Send + Sync` so the worker can hold an
/// `Arc<dyn AccrualAuthority>` across tasks.
#[async_trait]
pub trait AccrualAuthority: Send + Sync {
    fn name(&self) -> &'static str;

    async fn query(&self, number: &OrderNumber) -> Result<AuthorityOutcome, AuthorityError>;
}
