//! loyal-accrual
//!
//! Client side of the external accrual authority: the [`AccrualAuthority`]
//! trait and its HTTP implementation. This crate never touches storage;
//! the reconciliation worker decides what a response means for an order.

pub mod authority;
pub mod client;

pub use authority::{AccrualAuthority, AccrualReport, AuthorityError, AuthorityOutcome};
pub use client::{HttpAccrualClient, DEFAULT_QUERY_TIMEOUT};
