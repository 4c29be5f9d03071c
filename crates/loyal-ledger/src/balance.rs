//! BalanceLedger: balance reads and guarded withdrawals.
//!
//! # Invariant
//! For every owner, at every point in time:
//!
//! ```text
//! Σ accepted withdrawal amounts  <=  Σ accrual over PROCESSED orders
//! ```
//!
//! The ledger validates input and maps outcomes; the read-check-write itself
//! is delegated to [`LedgerStore::insert_withdrawal_checked`], which runs it
//! atomically per owner. Balances are never cached.

use std::sync::Arc;

use loyal_orders::validate;
use loyal_schemas::{Balance, OwnerId, Withdrawal};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::storage::{LedgerStore, WithdrawOutcome};

#[derive(Clone)]
pub struct BalanceLedger {
    store: Arc<dyn LedgerStore>,
}

impl BalanceLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Current balance of `owner`, recomputed from the two aggregates.
    pub async fn get_balance(&self, owner: &OwnerId) -> Result<Balance, LedgerError> {
        let accrued = self.store.sum_accrual_for_owner(owner).await?;
        let withdrawn = self.store.sum_withdrawals_for_owner(owner).await?;
        Ok(Balance::from_sums(accrued, withdrawn))
    }

    /// Withdraw `amount` points against the token `order`.
    ///
    /// Token and amount are checked before storage is touched.
    pub async fn request_withdrawal(
        &self,
        owner: &OwnerId,
        order: &str,
        amount: Decimal,
    ) -> Result<Withdrawal, LedgerError> {
        let token = validate(order)?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(amount));
        }

        match self
            .store
            .insert_withdrawal_checked(owner, &token.number, amount)
            .await?
        {
            WithdrawOutcome::Accepted(w) => {
                info!(owner = %owner, order = %w.order, amount = %w.amount, "withdrawal accepted");
                Ok(w)
            }
            WithdrawOutcome::InsufficientFunds { current } => {
                warn!(owner = %owner, order = %token.number, %current, requested = %amount, "withdrawal rejected: insufficient funds");
                Err(LedgerError::InsufficientFunds {
                    current,
                    requested: amount,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InsertOrderOutcome, UpdateOrderOutcome};
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use loyal_schemas::{Order, OrderNumber, OrderStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose aggregates are fixed and whose withdrawal path counts calls.
    struct FixedStore {
        accrued: Option<Decimal>,
        withdrawn: Decimal,
        withdraw_calls: AtomicUsize,
    }

    impl FixedStore {
        fn new(accrued: Option<Decimal>, withdrawn: Decimal) -> Self {
            Self {
                accrued,
                withdrawn,
                withdraw_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LedgerStore for FixedStore {
        async fn insert_order_if_absent(&self, _: &OwnerId, _: &OrderNumber) -> Result<InsertOrderOutcome> {
            unreachable!()
        }
        async fn orders_for_owner(&self, _: &OwnerId) -> Result<Vec<Order>> {
            unreachable!()
        }
        async fn orders_needing_reconciliation(&self) -> Result<Vec<Order>> {
            unreachable!()
        }
        async fn update_order_status(
            &self,
            _: &OrderNumber,
            _: OrderStatus,
            _: Decimal,
        ) -> Result<UpdateOrderOutcome> {
            unreachable!()
        }
        async fn sum_accrual_for_owner(&self, _: &OwnerId) -> Result<Decimal> {
            self.accrued.ok_or_else(|| anyhow!("connection reset"))
        }
        async fn sum_withdrawals_for_owner(&self, _: &OwnerId) -> Result<Decimal> {
            Ok(self.withdrawn)
        }
        async fn insert_withdrawal_checked(
            &self,
            owner: &OwnerId,
            order: &OrderNumber,
            amount: Decimal,
        ) -> Result<WithdrawOutcome> {
            self.withdraw_calls.fetch_add(1, Ordering::SeqCst);
            let current = self.accrued.unwrap_or_default() - self.withdrawn;
            if current < amount {
                return Ok(WithdrawOutcome::InsufficientFunds { current });
            }
            Ok(WithdrawOutcome::Accepted(Withdrawal {
                order: order.clone(),
                owner: owner.clone(),
                amount,
                processed_at_utc: chrono::Utc::now(),
            }))
        }
        async fn withdrawals_for_owner(&self, _: &OwnerId) -> Result<Vec<Withdrawal>> {
            unreachable!()
        }
    }

    fn owner() -> OwnerId {
        OwnerId::new("user-a")
    }

    #[tokio::test]
    async fn balance_is_accrued_minus_withdrawn() {
        let store = Arc::new(FixedStore::new(Some(Decimal::from(500)), Decimal::from(120)));
        let ledger = BalanceLedger::new(store);
        let b = ledger.get_balance(&owner()).await.unwrap();
        assert_eq!(b.current, Decimal::from(380));
        assert_eq!(b.withdrawn, Decimal::from(120));
    }

    #[tokio::test]
    async fn aggregate_failure_is_storage_error() {
        let store = Arc::new(FixedStore::new(None, Decimal::ZERO));
        let ledger = BalanceLedger::new(store);
        let err = ledger.get_balance(&owner()).await.unwrap_err();
        assert_eq!(err.code(), "STORAGE_ERROR");
    }

    #[tokio::test]
    async fn bad_token_rejected_before_storage() {
        let store = Arc::new(FixedStore::new(Some(Decimal::from(500)), Decimal::ZERO));
        let ledger = BalanceLedger::new(store.clone());

        let err = ledger
            .request_withdrawal(&owner(), "79927398710", Decimal::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::ChecksumFailed));

        let err = ledger
            .request_withdrawal(&owner(), "abc", Decimal::from(1))
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Malformed));

        assert_eq!(store.withdraw_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_positive_amount_rejected_before_storage() {
        let store = Arc::new(FixedStore::new(Some(Decimal::from(500)), Decimal::ZERO));
        let ledger = BalanceLedger::new(store.clone());
        for amount in [Decimal::ZERO, Decimal::from(-5)] {
            let err = ledger
                .request_withdrawal(&owner(), "79927398713", amount)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(_)));
        }
        assert_eq!(store.withdraw_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn insufficient_funds_carries_current_balance() {
        let store = Arc::new(FixedStore::new(Some(Decimal::from(300)), Decimal::ZERO));
        let ledger = BalanceLedger::new(store);
        let err = ledger
            .request_withdrawal(&owner(), "79927398713", Decimal::from(400))
            .await
            .unwrap_err();
        match err {
            LedgerError::InsufficientFunds { current, requested } => {
                assert_eq!(current, Decimal::from(300));
                assert_eq!(requested, Decimal::from(400));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
