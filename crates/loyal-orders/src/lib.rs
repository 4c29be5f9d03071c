//! loyal-orders
//!
//! Pure order logic with no IO:
//! - `validator`: Luhn check-digit validation of order / withdrawal tokens
//! - `lifecycle`: the reconciliation state machine for a single order

pub mod lifecycle;
pub mod validator;

pub use lifecycle::{apply, Disposition, Observation, Transition, TransitionError};
pub use validator::{validate, ValidatedOrder, ValidationError};
