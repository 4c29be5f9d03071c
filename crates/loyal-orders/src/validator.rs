//! Order-number validation (Luhn check digit).
//!
//! The same rule validates submitted order numbers and withdrawal tokens.
//! Validation is pure: the outcome depends only on the input string.

use std::fmt;

use loyal_schemas::OrderNumber;

/// Why a token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    /// Not a non-negative integer (empty, signed, non-digit, or overflowing `u64`).
    Malformed,
    /// Well-formed integer whose Luhn sum is not a multiple of 10.
    ChecksumFailed,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Malformed => write!(f, "order number is not a non-negative integer"),
            ValidationError::ChecksumFailed => write!(f, "order number failed the Luhn check"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A token that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedOrder {
    /// Canonical digit string (surrounding whitespace removed).
    pub number: OrderNumber,
    /// Parsed integer value.
    pub value: u64,
}

/// Validate an order number or withdrawal token.
///
/// Surrounding ASCII whitespace is ignored. Anything else that is not a plain
/// run of ASCII digits fitting in `u64` is [`ValidationError::Malformed`].
pub fn validate(token: &str) -> Result<ValidatedOrder, ValidationError> {
    let digits = token.trim_matches(|c: char| c.is_ascii_whitespace());

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ValidationError::Malformed);
    }
    let value: u64 = digits.parse().map_err(|_| ValidationError::Malformed)?;

    if luhn_sum(digits) % 10 != 0 {
        return Err(ValidationError::ChecksumFailed);
    }

    Ok(ValidatedOrder {
        number: OrderNumber::new(digits),
        value,
    })
}

/// Luhn sum over ASCII digits. Doubling starts at the second-to-last digit,
/// i.e. a digit is doubled when its distance from the last digit is odd.
fn luhn_sum(digits: &str) -> u32 {
    let n = digits.len();
    digits
        .bytes()
        .enumerate()
        .map(|(i, b)| {
            let d = u32::from(b - b'0');
            if (n - 1 - i) % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum()
}
