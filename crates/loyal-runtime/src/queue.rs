//! Reconciliation queue.
//!
//! Unbounded multi-producer channel with one consumer (the worker loop),
//! plus a tracked set of every order number that is queued or in flight.
//!
//! - [`OrderQueue::enqueue`] is a no-op for a tracked number, so producers
//!   (submission path, resync) can never create a second concurrent query
//!   for the same order.
//! - Only the worker re-inserts a tracked number ([`OrderQueue::requeue`])
//!   and only after the previous query for it has finished.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use loyal_schemas::{OrderNumber, OrderStatus};
use tokio::sync::mpsc;

/// One unit of reconciliation work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOrder {
    pub number: OrderNumber,
    /// Last status known to be stored for this order.
    pub status: OrderStatus,
    /// Completed queries that left the order non-terminal.
    pub attempts: u32,
}

impl PendingOrder {
    pub fn new(number: OrderNumber, status: OrderStatus) -> Self {
        Self {
            number,
            status,
            attempts: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrderQueue {
    tx: mpsc::UnboundedSender<PendingOrder>,
    tracked: Arc<Mutex<HashSet<OrderNumber>>>,
}

impl OrderQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PendingOrder>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                tracked: Arc::new(Mutex::new(HashSet::new())),
            },
            rx,
        )
    }

    /// Queue `order` unless its number is already tracked.
    ///
    /// Returns `true` if the order was queued. Returns `false` for a tracked
    /// number or when the consumer is gone.
    pub fn enqueue(&self, order: PendingOrder) -> bool {
        if !self.lock().insert(order.number.clone()) {
            return false;
        }
        let number = order.number.clone();
        if self.tx.send(order).is_err() {
            self.lock().remove(&number);
            return false;
        }
        true
    }

    /// Re-insert a tracked order after its query finished. Non-blocking.
    pub(crate) fn requeue(&self, order: PendingOrder) {
        let number = order.number.clone();
        if self.tx.send(order).is_err() {
            // Worker gone; the row stays non-terminal and is resynced on restart.
            self.lock().remove(&number);
        }
    }

    /// Stop tracking `number`.
    pub(crate) fn release(&self, number: &OrderNumber) {
        self.lock().remove(number);
    }

    pub fn is_tracked(&self, number: &OrderNumber) -> bool {
        self.lock().contains(number)
    }

    /// Orders currently queued or in flight.
    pub fn tracked_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<OrderNumber>> {
        // Critical sections never panic mid-update; a poisoned set is still consistent.
        self.tracked.lock().unwrap_or_else(|p| p.into_inner())
    }
}
