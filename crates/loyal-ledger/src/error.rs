use loyal_orders::ValidationError;
use rust_decimal::Decimal;

/// Errors reported synchronously to the caller of a ledger operation.
///
/// Everything except `Storage` is a client error and must not be retried
/// as-is. `Storage` is a server-side failure the caller may retry.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("order number is malformed")]
    Malformed,

    #[error("order number failed the checksum")]
    ChecksumFailed,

    #[error("order number already submitted by another user")]
    Conflict,

    #[error("insufficient funds: current balance {current}, requested {requested}")]
    InsufficientFunds { current: Decimal, requested: Decimal },

    #[error("withdrawal amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<ValidationError> for LedgerError {
    fn from(e: ValidationError) -> Self {
        match e {
            ValidationError::Malformed => LedgerError::Malformed,
            ValidationError::ChecksumFailed => LedgerError::ChecksumFailed,
        }
    }
}

impl LedgerError {
    /// Stable machine-readable code, used in logs and API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::Malformed => "MALFORMED",
            LedgerError::ChecksumFailed => "CHECKSUM_FAILED",
            LedgerError::Conflict => "CONFLICT",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::Storage(_) => "STORAGE_ERROR",
        }
    }
}
