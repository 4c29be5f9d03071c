use std::time::Duration;

/// Retry behaviour of the reconciliation worker.
///
/// Defaults retry forever at full speed with a 1s rate-limit cooldown. A
/// server `Retry-After` hint is honored up to `max_rate_limit_cooldown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Stop tracking an order after this many non-terminal results.
    /// `None` = unbounded.
    pub max_attempts: Option<u32>,
    /// Delay before re-enqueueing after a failure or a non-terminal result.
    pub retry_delay: Duration,
    /// Worker-wide pause after a "too many requests" signal.
    pub rate_limit_cooldown: Duration,
    /// Stretch the cooldown to the server's `Retry-After` when it is longer.
    pub honor_retry_after: bool,
    /// Ceiling applied to the server's `Retry-After` hint.
    pub max_rate_limit_cooldown: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: None,
            retry_delay: Duration::ZERO,
            rate_limit_cooldown: Duration::from_secs(1),
            honor_retry_after: true,
            max_rate_limit_cooldown: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn cooldown_for(&self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) if self.honor_retry_after => self
                .rate_limit_cooldown
                .max(hint.min(self.max_rate_limit_cooldown)),
            _ => self.rate_limit_cooldown,
        }
    }

    pub fn exhausted(&self, attempts: u32) -> bool {
        matches!(self.max_attempts, Some(max) if attempts >= max)
    }
}
