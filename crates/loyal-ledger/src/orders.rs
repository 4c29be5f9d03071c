//! Order submission and per-owner listings.
//!
//! Enqueueing an accepted order for reconciliation is the caller's job
//! (the daemon hands `SubmitOutcome::Accepted` numbers to the worker queue).

use loyal_orders::validate;
use loyal_schemas::{Order, OrderNumber, OwnerId, Withdrawal};
use tracing::{debug, info, warn};

use crate::error::LedgerError;
use crate::storage::{InsertOrderOutcome, LedgerStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// First submission; the order now exists in status `NEW`.
    Accepted(OrderNumber),
    /// The caller had already submitted this number. No-op success.
    AlreadySubmitted(OrderNumber),
}

impl SubmitOutcome {
    pub fn number(&self) -> &OrderNumber {
        match self {
            SubmitOutcome::Accepted(n) | SubmitOutcome::AlreadySubmitted(n) => n,
        }
    }
}

/// Validate `token` and record it as an order of `owner`.
pub async fn submit_order(
    store: &dyn LedgerStore,
    owner: &OwnerId,
    token: &str,
) -> Result<SubmitOutcome, LedgerError> {
    let validated = validate(token)?;
    let number = validated.number;

    match store.insert_order_if_absent(owner, &number).await? {
        InsertOrderOutcome::Created => {
            info!(owner = %owner, order = %number, "order accepted");
            Ok(SubmitOutcome::Accepted(number))
        }
        InsertOrderOutcome::AlreadyOwnedBySameUser => {
            debug!(owner = %owner, order = %number, "order already submitted by owner");
            Ok(SubmitOutcome::AlreadySubmitted(number))
        }
        InsertOrderOutcome::Conflict => {
            warn!(owner = %owner, order = %number, "order owned by another user");
            Err(LedgerError::Conflict)
        }
    }
}

pub async fn list_orders(store: &dyn LedgerStore, owner: &OwnerId) -> Result<Vec<Order>, LedgerError> {
    Ok(store.orders_for_owner(owner).await?)
}

pub async fn list_withdrawals(
    store: &dyn LedgerStore,
    owner: &OwnerId,
) -> Result<Vec<Withdrawal>, LedgerError> {
    Ok(store.withdrawals_for_owner(owner).await?)
}
