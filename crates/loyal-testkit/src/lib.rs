//! loyal-testkit
//!
//! In-process doubles for the two collaborators of the ledger core (storage
//! and the accrual authority) plus small async helpers. Scenario tests for
//! the whole stack live under `tests/`.

pub mod memory_store;
pub mod scripted_authority;

use std::future::Future;
use std::time::Duration;

pub use memory_store::MemoryStore;
pub use scripted_authority::{
    decode_error, processed, processing, rate_limited, report, transport_error, AuthorityCall,
    Scripted, ScriptedAuthority,
};

/// Poll `check` every 5ms until it yields `true` or `timeout` elapses.
///
/// Uses tokio time, so it also works under `tokio::time::pause()`.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
