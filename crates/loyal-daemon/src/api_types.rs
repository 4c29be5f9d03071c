//! Request and response types for all loyal-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests.  No business logic lives here.

use chrono::{DateTime, Utc};
use loyal_runtime::WorkerStats;
use loyal_schemas::{Balance, Order, OrderStatus, Withdrawal};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Absent when the daemon runs without a reconciliation worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerStatsView>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatsView {
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
    pub tracked_orders: usize,
}

impl WorkerStatsView {
    pub fn new(s: WorkerStats, tracked_orders: usize) -> Self {
        Self {
            queries: s.queries,
            reports: s.reports,
            not_found: s.not_found,
            persisted: s.persisted,
            terminal: s.terminal,
            transport_errors: s.transport_errors,
            decode_errors: s.decode_errors,
            storage_errors: s.storage_errors,
            rate_limits: s.rate_limits,
            drops: s.drops,
            tracked_orders,
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine-readable code, e.g. "CHECKSUM_FAILED".
    pub error: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// /api/user/orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderResponse {
    pub number: String,
    pub status: OrderStatus,
    /// Only present for PROCESSED orders.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(o: Order) -> Self {
        let accrual = (o.status == OrderStatus::Processed).then_some(o.accrual);
        Self {
            number: o.number.as_str().to_string(),
            status: o.status,
            accrual,
            uploaded_at: o.submitted_at_utc,
        }
    }
}

// ---------------------------------------------------------------------------
// /api/user/balance
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl From<Balance> for BalanceResponse {
    fn from(b: Balance) -> Self {
        Self {
            current: b.current,
            withdrawn: b.withdrawn,
        }
    }
}

// ---------------------------------------------------------------------------
// /api/user/balance/withdraw  /api/user/withdrawals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalResponse {
    pub order: String,
    pub sum: Decimal,
    pub processed_at: DateTime<Utc>,
}

impl From<Withdrawal> for WithdrawalResponse {
    fn from(w: Withdrawal) -> Self {
        Self {
            order: w.order.as_str().to_string(),
            sum: w.amount,
            processed_at: w.processed_at_utc,
        }
    }
}
