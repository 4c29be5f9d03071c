//! Storage collaborator contract.
//!
//! The core never holds rows beyond one operation; everything goes through
//! this trait. Implementations must be `Send + Sync` so a single
//! `Arc<dyn LedgerStore>` can be shared by request handlers and the
//! reconciliation worker.

use anyhow::Result;
use async_trait::async_trait;
use loyal_schemas::{Order, OrderNumber, OrderStatus, OwnerId, Withdrawal};
use rust_decimal::Decimal;

/// Result of [`LedgerStore::insert_order_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOrderOutcome {
    /// New row created with status `NEW`.
    Created,
    /// The caller already owns this number; nothing changed.
    AlreadyOwnedBySameUser,
    /// Another user owns this number; nothing changed.
    Conflict,
}

/// Result of [`LedgerStore::update_order_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOrderOutcome {
    Applied,
    /// The row is already `INVALID`/`PROCESSED`; the update was a no-op.
    AlreadyTerminal,
    /// No row with this number exists.
    UnknownOrder,
}

/// Result of [`LedgerStore::insert_withdrawal_checked`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WithdrawOutcome {
    Accepted(Withdrawal),
    /// Balance at check time was lower than the requested amount; nothing written.
    InsufficientFunds { current: Decimal },
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert `number` for `owner` in status `NEW` unless the number exists.
    async fn insert_order_if_absent(
        &self,
        owner: &OwnerId,
        number: &OrderNumber,
    ) -> Result<InsertOrderOutcome>;

    /// Orders of `owner`, oldest submission first.
    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<Order>>;

    /// Every order not yet in a terminal status.
    async fn orders_needing_reconciliation(&self) -> Result<Vec<Order>>;

    /// Store a new status/accrual. Must be a no-op returning
    /// [`UpdateOrderOutcome::AlreadyTerminal`] when the row is terminal, so
    /// repeating a terminal update can never change the balance.
    async fn update_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<UpdateOrderOutcome>;

    /// Σaccrual over the owner's `PROCESSED` orders; zero when there are none.
    async fn sum_accrual_for_owner(&self, owner: &OwnerId) -> Result<Decimal>;

    /// Σamount over the owner's withdrawals; zero when there are none.
    async fn sum_withdrawals_for_owner(&self, owner: &OwnerId) -> Result<Decimal>;

    /// Recompute the owner's balance and insert the withdrawal only if
    /// `current >= amount`, as one atomic unit with respect to every other
    /// withdrawal of the same owner.
    async fn insert_withdrawal_checked(
        &self,
        owner: &OwnerId,
        order: &OrderNumber,
        amount: Decimal,
    ) -> Result<WithdrawOutcome>;

    /// Withdrawals of `owner`, most recent first.
    async fn withdrawals_for_owner(&self, owner: &OwnerId) -> Result<Vec<Withdrawal>>;
}
