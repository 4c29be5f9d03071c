//! Shared runtime state for loyal-daemon.
//!
//! All types here are `Clone`-able (via `Arc` or copy). Handlers receive
//! `State<Arc<AppState>>` from Axum; this module owns nothing async itself.

use std::sync::Arc;

use loyal_ledger::{BalanceLedger, LedgerStore};
use loyal_runtime::{OrderQueue, WorkerStatsReader};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// BuildInfo
// ---------------------------------------------------------------------------

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

/// Cloneable (Arc) handle shared across all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub build: BuildInfo,
    /// Storage shared with the reconciliation worker.
    pub store: Arc<dyn LedgerStore>,
    pub ledger: BalanceLedger,
    /// Producer side of the reconciliation queue; accepted orders go here.
    pub queue: OrderQueue,
    pub worker_stats: Option<WorkerStatsReader>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        queue: OrderQueue,
        worker_stats: Option<WorkerStatsReader>,
    ) -> Self {
        Self {
            build: BuildInfo {
                service: "loyal-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            ledger: BalanceLedger::new(Arc::clone(&store)),
            store,
            queue,
            worker_stats,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}
