use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// Worker-wide pause shared by the dispatcher and in-flight queries.
///
/// A rate-limited query extends the gate; the dispatcher waits on it before
/// issuing the next query for any order. Overlapping extensions keep the
/// later deadline.
#[derive(Debug, Clone, Default)]
pub struct CooldownGate {
    until: Arc<Mutex<Option<Instant>>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push the deadline to `now + d`. A `d` past the clock's range is
    /// ignored; callers cap it beforehand.
    pub fn extend(&self, d: Duration) {
        let Some(candidate) = Instant::now().checked_add(d) else {
            return;
        };
        let mut until = self.until.lock().unwrap_or_else(|p| p.into_inner());
        match *until {
            Some(current) if current >= candidate => {}
            _ => *until = Some(candidate),
        }
    }

    /// Deadline still in the future, if any.
    pub fn remaining(&self) -> Option<Duration> {
        let until = *self.until.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        until.filter(|u| *u > now).map(|u| u - now)
    }

    /// Resolve once no cooldown is active. Re-checks after each sleep in case
    /// the gate was extended meanwhile.
    pub async fn wait(&self) {
        loop {
            let until = *self.until.lock().unwrap_or_else(|p| p.into_inner());
            match until {
                Some(u) if u > Instant::now() => sleep_until(u).await,
                _ => return,
            }
        }
    }
}
