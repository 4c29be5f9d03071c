//! Order lifecycle state machine.
//!
//! # Design
//!
//! An order is created `NEW` at submission and then follows whatever status
//! the accrual authority reports until it reaches a terminal status:
//!
//! ```text
//!              Reported(NEW|REGISTERED|PROCESSING)    NotYetKnown / QueryFailed
//!                 ┌──────────────┐                     ┌───────────┐
//!                 ▼              │                     ▼           │
//!    submit ──► NEW ◄──────► PROCESSING ──────────────(unchanged)──┘
//!                 │              │
//!                 │ Reported(INVALID|PROCESSED)
//!                 ▼              ▼
//!          INVALID (term.)   PROCESSED (term.)
//! ```
//!
//! [`apply`] is a pure function: it never touches storage. The caller
//! persists `Transition::next` only when `Transition::persist` is set, and
//! keeps tracking the order only when the disposition is `Requeue`.
//!
//! Applying anything to a terminal status is a [`TransitionError`]; callers
//! stop tracking the order and never write.

use std::fmt;

use loyal_schemas::OrderStatus;
use rust_decimal::Decimal;

// ---------------------------------------------------------------------------
// Observation
// ---------------------------------------------------------------------------

/// What one reconciliation pass learned about an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// The authority answered with a status (and, for `PROCESSED`, an accrual).
    Reported {
        status: OrderStatus,
        accrual: Option<Decimal>,
    },
    /// The authority does not know the order yet.
    NotYetKnown,
    /// Transport failure, rate limit, or undecodable payload.
    QueryFailed,
}

// ---------------------------------------------------------------------------
// Transition
// ---------------------------------------------------------------------------

/// Whether the order stays in the retry pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Requeue,
    Done,
}

/// Result of applying an [`Observation`] to the current status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: OrderStatus,
    /// Accrual to store with `next`: the reported amount for `PROCESSED`,
    /// zero for every other status.
    pub accrual: Decimal,
    /// `true` when storage must be updated (the status changed).
    pub persist: bool,
    pub disposition: Disposition,
}

impl Transition {
    fn unchanged(current: OrderStatus) -> Self {
        Self {
            next: current,
            accrual: Decimal::ZERO,
            persist: false,
            disposition: Disposition::Requeue,
        }
    }
}

// ---------------------------------------------------------------------------
// TransitionError
// ---------------------------------------------------------------------------

/// Returned when an observation is applied to a terminal order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: OrderStatus,
    pub observation: String,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "illegal order transition: {} is terminal, got {}",
            self.from, self.observation
        )
    }
}

impl std::error::Error for TransitionError {}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply `observation` to an order currently in `current`.
pub fn apply(current: OrderStatus, observation: &Observation) -> Result<Transition, TransitionError> {
    if current.is_terminal() {
        return Err(TransitionError {
            from: current,
            observation: format!("{observation:?}"),
        });
    }

    let t = match observation {
        Observation::NotYetKnown | Observation::QueryFailed => Transition::unchanged(current),

        Observation::Reported { status, accrual } => {
            let accrual = match status {
                OrderStatus::Processed => accrual.unwrap_or(Decimal::ZERO),
                _ => Decimal::ZERO,
            };
            Transition {
                next: *status,
                accrual,
                persist: *status != current,
                disposition: if status.is_terminal() {
                    Disposition::Done
                } else {
                    Disposition::Requeue
                },
            }
        }
    };

    Ok(t)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
