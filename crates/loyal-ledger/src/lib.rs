//! loyal-ledger
//!
//! The balance-consistency half of the core:
//! - `storage`: the narrow `LedgerStore` contract the core persists through
//! - `balance`: `BalanceLedger` (balance reads, guarded withdrawals)
//! - `orders`: order submission and the per-owner read operations
//! - `error`: the client-facing error taxonomy
//!
//! Implementations of `LedgerStore` live in `loyal-db` (Postgres) and
//! `loyal-testkit` (in-memory).

pub mod balance;
pub mod error;
pub mod orders;
pub mod storage;

pub use balance::BalanceLedger;
pub use error::LedgerError;
pub use orders::{list_orders, list_withdrawals, submit_order, SubmitOutcome};
pub use storage::{InsertOrderOutcome, LedgerStore, UpdateOrderOutcome, WithdrawOutcome};
