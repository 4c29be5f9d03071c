//! ReconciliationWorker: drains the [`OrderQueue`], queries the accrual
//! authority and persists lifecycle transitions.
//!
//! One dispatcher task owns the queue receiver. Each dequeued order runs in
//! its own task, bounded by a semaphore of `concurrency` permits. The
//! dispatcher waits on the [`CooldownGate`] before every dispatch, so a
//! rate-limit signal pauses new queries for all orders.
//!
//! State is written only after a fully parsed, successful response, and the
//! storage update is guarded against terminal rows.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use loyal_accrual::{AccrualAuthority, AuthorityError, AuthorityOutcome};
use loyal_ledger::{LedgerStore, UpdateOrderOutcome};
use loyal_orders::{apply, Disposition, Observation};
use serde::Serialize;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::cooldown::CooldownGate;
use crate::policy::RetryPolicy;
use crate::queue::{OrderQueue, PendingOrder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// Maximum in-flight authority queries.
    pub concurrency: usize,
    /// Period of the full resync from storage. Zero disables periodic resync
    /// (the start-up resync always runs).
    pub resync_interval: Duration,
    pub policy: RetryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            resync_interval: Duration::from_secs(30),
            policy: RetryPolicy::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Point-in-time counters, e.g. for `/health`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub queries: u64,
    pub reports: u64,
    pub not_found: u64,
    pub persisted: u64,
    pub terminal: u64,
    pub transport_errors: u64,
    pub decode_errors: u64,
    pub storage_errors: u64,
    pub rate_limits: u64,
    pub drops: u64,
}

#[derive(Debug, Default)]
struct Counters {
    queries: AtomicU64,
    reports: AtomicU64,
    not_found: AtomicU64,
    persisted: AtomicU64,
    terminal: AtomicU64,
    transport_errors: AtomicU64,
    decode_errors: AtomicU64,
    storage_errors: AtomicU64,
    rate_limits: AtomicU64,
    drops: AtomicU64,
}

fn bump(c: &AtomicU64) {
    c.fetch_add(1, Ordering::Relaxed);
}

/// Cloneable read-only view of a running worker's counters.
#[derive(Debug, Clone)]
pub struct WorkerStatsReader {
    counters: Arc<Counters>,
}

impl WorkerStatsReader {
    pub fn snapshot(&self) -> WorkerStats {
        self.counters.snapshot()
    }
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        WorkerStats {
            queries: get(&self.queries),
            reports: get(&self.reports),
            not_found: get(&self.not_found),
            persisted: get(&self.persisted),
            terminal: get(&self.terminal),
            transport_errors: get(&self.transport_errors),
            decode_errors: get(&self.decode_errors),
            storage_errors: get(&self.storage_errors),
            rate_limits: get(&self.rate_limits),
            drops: get(&self.drops),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

pub struct ReconciliationWorker {
    store: Arc<dyn LedgerStore>,
    authority: Arc<dyn AccrualAuthority>,
    config: WorkerConfig,
}

/// Everything an in-flight reconciliation task needs.
struct Shared {
    store: Arc<dyn LedgerStore>,
    authority: Arc<dyn AccrualAuthority>,
    policy: RetryPolicy,
    queue: OrderQueue,
    gate: CooldownGate,
    counters: Arc<Counters>,
}

/// Handle to a running worker. Dropping it does not stop the worker; call
/// [`WorkerHandle::shutdown`].
pub struct WorkerHandle {
    queue: OrderQueue,
    shared: Arc<Shared>,
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl WorkerHandle {
    /// Producer side of the reconciliation queue.
    pub fn queue(&self) -> OrderQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> WorkerStats {
        self.shared.counters.snapshot()
    }

    pub fn stats_reader(&self) -> WorkerStatsReader {
        WorkerStatsReader {
            counters: Arc::clone(&self.shared.counters),
        }
    }

    /// Remaining worker-wide rate-limit pause, if any.
    pub fn cooldown_remaining(&self) -> Option<Duration> {
        self.shared.gate.remaining()
    }

    /// Stop dequeuing, let in-flight queries finish and persist, then return.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(true);
        self.join
            .await
            .map_err(|e| anyhow!("reconciliation worker task failed: {e}"))
    }
}

impl ReconciliationWorker {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        authority: Arc<dyn AccrualAuthority>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            authority,
            config,
        }
    }

    /// Start the dispatcher on the current tokio runtime.
    pub fn spawn(self) -> WorkerHandle {
        let (queue, rx) = OrderQueue::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            store: self.store,
            authority: self.authority,
            policy: self.config.policy,
            queue: queue.clone(),
            gate: CooldownGate::new(),
            counters: Arc::new(Counters::default()),
        });

        let join = tokio::spawn(run(
            Arc::clone(&shared),
            rx,
            shutdown_rx,
            self.config.concurrency.max(1),
            self.config.resync_interval,
        ));

        WorkerHandle {
            queue,
            shared,
            shutdown_tx,
            join,
        }
    }
}

async fn run(
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<PendingOrder>,
    mut shutdown_rx: watch::Receiver<bool>,
    concurrency: usize,
    resync_interval: Duration,
) {
    info!(
        authority = shared.authority.name(),
        concurrency,
        resync_secs = resync_interval.as_secs(),
        "reconciliation worker started"
    );

    let permits = Arc::new(Semaphore::new(concurrency));
    let mut inflight: JoinSet<()> = JoinSet::new();

    resync(&shared).await;
    let mut ticker = resync_ticker(resync_interval);

    loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.changed() => break,

            _ = next_tick(&mut ticker) => resync(&shared).await,

            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = joined {
                    warn!(error = %e, "reconciliation task aborted");
                }
            }

            maybe = rx.recv() => {
                let Some(order) = maybe else { break };

                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                    break;
                };

                // Checked after the permit: a query that just released its
                // permit may have extended the gate. The pause applies to
                // every order, not just the one that hit it.
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        shared.queue.release(&order.number);
                        break;
                    }
                    _ = shared.gate.wait() => {}
                }

                inflight.spawn(reconcile_one(Arc::clone(&shared), order, permit));
            }
        }
    }

    info!(in_flight = inflight.len(), "reconciliation worker stopping");
    while let Some(joined) = inflight.join_next().await {
        if let Err(e) = joined {
            warn!(error = %e, "reconciliation task aborted during shutdown");
        }
    }
    info!("reconciliation worker stopped");
}

/// Periodic resync ticker; `None` when disabled or when the first tick would
/// fall past the clock's range.
fn resync_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let Some(start) = Instant::now().checked_add(period) else {
        warn!(resync_secs = period.as_secs(), "resync interval out of range; periodic resync disabled");
        return None;
    };
    let mut t = interval_at(start, period);
    t.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(t)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Enqueue every non-terminal order not already tracked.
async fn resync(shared: &Shared) {
    match shared.store.orders_needing_reconciliation().await {
        Ok(orders) => {
            let total = orders.len();
            let queued = orders
                .into_iter()
                .filter(|o| shared.queue.enqueue(PendingOrder::new(o.number.clone(), o.status)))
                .count();
            debug!(total, queued, "reconciliation resync");
        }
        Err(e) => warn!(error = %format!("{e:#}"), "reconciliation resync failed"),
    }
}

async fn reconcile_one(shared: Arc<Shared>, order: PendingOrder, _permit: OwnedSemaphorePermit) {
    let c = &shared.counters;
    bump(&c.queries);

    let observation = match shared.authority.query(&order.number).await {
        Ok(AuthorityOutcome::Report(report)) => {
            bump(&c.reports);
            Observation::Reported {
                status: report.status,
                accrual: report.accrual,
            }
        }
        Ok(AuthorityOutcome::NotFound) => {
            bump(&c.not_found);
            Observation::NotYetKnown
        }
        Ok(AuthorityOutcome::RateLimited { retry_after }) => {
            bump(&c.rate_limits);
            let cooldown = shared.policy.cooldown_for(retry_after);
            shared.gate.extend(cooldown);
            warn!(
                order = %order.number,
                cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                "accrual authority rate limit; pausing worker"
            );
            // Not an attempt: the authority never looked at the order.
            shared.queue.requeue(order);
            return;
        }
        Err(e) => {
            match &e {
                AuthorityError::Transport(_) => bump(&c.transport_errors),
                AuthorityError::Decode(_) => bump(&c.decode_errors),
            }
            warn!(order = %order.number, attempt = order.attempts + 1, error = %e, "accrual query failed");
            Observation::QueryFailed
        }
    };

    let transition = match apply(order.status, &observation) {
        Ok(t) => t,
        Err(e) => {
            bump(&c.drops);
            warn!(order = %order.number, error = %e, "order already terminal; no longer tracked");
            shared.queue.release(&order.number);
            return;
        }
    };

    if transition.persist {
        match shared
            .store
            .update_order_status(&order.number, transition.next, transition.accrual)
            .await
        {
            Ok(UpdateOrderOutcome::Applied) => {
                bump(&c.persisted);
                info!(
                    order = %order.number,
                    from = order.status.as_str(),
                    to = transition.next.as_str(),
                    accrual = %transition.accrual,
                    "order status persisted"
                );
            }
            Ok(UpdateOrderOutcome::AlreadyTerminal) => {
                debug!(order = %order.number, "stored order already terminal; update skipped");
                shared.queue.release(&order.number);
                return;
            }
            Ok(UpdateOrderOutcome::UnknownOrder) => {
                bump(&c.drops);
                warn!(order = %order.number, "order missing from storage; no longer tracked");
                shared.queue.release(&order.number);
                return;
            }
            Err(e) => {
                bump(&c.storage_errors);
                warn!(order = %order.number, error = %format!("{e:#}"), "order status update failed");
                retry_later(&shared, order);
                return;
            }
        }
    }

    match transition.disposition {
        Disposition::Done => {
            bump(&c.terminal);
            shared.queue.release(&order.number);
        }
        Disposition::Requeue => retry_later(
            &shared,
            PendingOrder {
                status: transition.next,
                ..order
            },
        ),
    }
}

/// Count one attempt and put the order back, honoring `max_attempts` and
/// `retry_delay`.
fn retry_later(shared: &Arc<Shared>, order: PendingOrder) {
    let order = PendingOrder {
        attempts: order.attempts.saturating_add(1),
        ..order
    };

    if shared.policy.exhausted(order.attempts) {
        bump(&shared.counters.drops);
        warn!(
            order = %order.number,
            attempts = order.attempts,
            "retry limit reached; order left for the next resync"
        );
        shared.queue.release(&order.number);
        return;
    }

    debug!(order = %order.number, attempts = order.attempts, status = order.status.as_str(), "order re-queued");

    let delay = shared.policy.retry_delay;
    if delay.is_zero() {
        shared.queue.requeue(order);
    } else {
        let shared = Arc::clone(shared);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.queue.requeue(order);
        });
    }
}
