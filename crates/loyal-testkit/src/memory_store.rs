//! In-memory [`LedgerStore`] for tests and local wiring.
//!
//! One tokio mutex guards all state, so `insert_withdrawal_checked` is atomic
//! per store (and therefore per owner). Orders keep insertion order, which is
//! also submission order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use loyal_ledger::{InsertOrderOutcome, LedgerStore, UpdateOrderOutcome, WithdrawOutcome};
use loyal_schemas::{Order, OrderNumber, OrderStatus, OwnerId, Withdrawal};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    orders: Vec<Order>,
    withdrawals: Vec<Withdrawal>,
}

impl Inner {
    fn order_mut(&mut self, number: &OrderNumber) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| &o.number == number)
    }

    fn accrued(&self, owner: &OwnerId) -> Decimal {
        self.orders
            .iter()
            .filter(|o| &o.owner == owner && o.status == OrderStatus::Processed)
            .map(|o| o.accrual)
            .sum()
    }

    fn withdrawn(&self, owner: &OwnerId) -> Decimal {
        self.withdrawals
            .iter()
            .filter(|w| &w.owner == owner)
            .map(|w| w.amount)
            .sum()
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_all: AtomicBool,
    applied_updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a storage error (or stop failing).
    pub fn set_failing(&self, failing: bool) {
        self.fail_all.store(failing, Ordering::SeqCst);
    }

    /// Number of `update_order_status` calls that changed a row.
    pub fn applied_updates(&self) -> usize {
        self.applied_updates.load(Ordering::SeqCst)
    }

    /// Insert an order directly in the given state, bypassing validation.
    pub async fn seed_order(
        &self,
        owner: &OwnerId,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) {
        self.inner.lock().await.orders.push(Order {
            number: number.clone(),
            owner: owner.clone(),
            status,
            accrual,
            submitted_at_utc: Utc::now(),
        });
    }

    pub async fn order(&self, number: &OrderNumber) -> Option<Order> {
        self.inner
            .lock()
            .await
            .orders
            .iter()
            .find(|o| &o.number == number)
            .cloned()
    }

    fn check_failing(&self) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            bail!("memory store: injected storage failure");
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn insert_order_if_absent(
        &self,
        owner: &OwnerId,
        number: &OrderNumber,
    ) -> Result<InsertOrderOutcome> {
        self.check_failing()?;
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.order_mut(number) {
            return Ok(if &existing.owner == owner {
                InsertOrderOutcome::AlreadyOwnedBySameUser
            } else {
                InsertOrderOutcome::Conflict
            });
        }
        inner.orders.push(Order {
            number: number.clone(),
            owner: owner.clone(),
            status: OrderStatus::New,
            accrual: Decimal::ZERO,
            submitted_at_utc: Utc::now(),
        });
        Ok(InsertOrderOutcome::Created)
    }

    async fn orders_for_owner(&self, owner: &OwnerId) -> Result<Vec<Order>> {
        self.check_failing()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .iter()
            .filter(|o| &o.owner == owner)
            .cloned()
            .collect())
    }

    async fn orders_needing_reconciliation(&self) -> Result<Vec<Order>> {
        self.check_failing()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .orders
            .iter()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn update_order_status(
        &self,
        number: &OrderNumber,
        status: OrderStatus,
        accrual: Decimal,
    ) -> Result<UpdateOrderOutcome> {
        self.check_failing()?;
        if accrual < Decimal::ZERO {
            bail!("memory store: negative accrual {accrual} for order {number}");
        }
        let mut inner = self.inner.lock().await;
        let Some(order) = inner.order_mut(number) else {
            return Ok(UpdateOrderOutcome::UnknownOrder);
        };
        if order.status.is_terminal() {
            return Ok(UpdateOrderOutcome::AlreadyTerminal);
        }
        order.status = status;
        order.accrual = accrual;
        self.applied_updates.fetch_add(1, Ordering::SeqCst);
        Ok(UpdateOrderOutcome::Applied)
    }

    async fn sum_accrual_for_owner(&self, owner: &OwnerId) -> Result<Decimal> {
        self.check_failing()?;
        Ok(self.inner.lock().await.accrued(owner))
    }

    async fn sum_withdrawals_for_owner(&self, owner: &OwnerId) -> Result<Decimal> {
        self.check_failing()?;
        Ok(self.inner.lock().await.withdrawn(owner))
    }

    async fn insert_withdrawal_checked(
        &self,
        owner: &OwnerId,
        order: &OrderNumber,
        amount: Decimal,
    ) -> Result<WithdrawOutcome> {
        self.check_failing()?;
        let mut inner = self.inner.lock().await;
        let current = inner.accrued(owner) - inner.withdrawn(owner);

        // Give racing tasks a chance to run between check and insert; the
        // held guard is what keeps this atomic.
        tokio::task::yield_now().await;

        if current < amount {
            return Ok(WithdrawOutcome::InsufficientFunds { current });
        }
        let w = Withdrawal {
            order: order.clone(),
            owner: owner.clone(),
            amount,
            processed_at_utc: Utc::now(),
        };
        inner.withdrawals.push(w.clone());
        Ok(WithdrawOutcome::Accepted(w))
    }

    async fn withdrawals_for_owner(&self, owner: &OwnerId) -> Result<Vec<Withdrawal>> {
        self.check_failing()?;
        let inner = self.inner.lock().await;
        Ok(inner
            .withdrawals
            .iter()
            .rev()
            .filter(|w| &w.owner == owner)
            .cloned()
            .collect())
    }
}
