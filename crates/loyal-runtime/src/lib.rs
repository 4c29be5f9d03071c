//! loyal-runtime
//!
//! Background reconciliation of submitted orders against the accrual
//! authority: the dedup queue, retry policy, rate-limit cooldown and the
//! worker loop that ties them together.

pub mod cooldown;
pub mod policy;
pub mod queue;
pub mod worker;

pub use cooldown::CooldownGate;
pub use policy::RetryPolicy;
pub use queue::{OrderQueue, PendingOrder};
pub use worker::{ReconciliationWorker, WorkerConfig, WorkerHandle, WorkerStats, WorkerStatsReader};
