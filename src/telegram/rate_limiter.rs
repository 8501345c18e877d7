//! Pacing for outgoing sends.
//!
//! Enforces a minimum interval between publisher calls and holds every
//! caller back while a flood wait reported by Telegram is in effect.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct LimiterState {
    last_operation: Option<Instant>,
    blocked_until: Option<Instant>,
}

/// Shared by every task that publishes through the bot session.
#[derive(Debug)]
pub struct RateLimiter {
    /// Minimum duration between allowed operations.
    min_interval: Duration,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// A limiter that only honours flood waits.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO)
    }

    /// Waits until an operation is allowed, then marks it as performed.
    ///
    /// Returns the duration waited.
    pub async fn wait_and_acquire(&self) -> Duration {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        let mut ready_at = now;
        if let Some(last) = state.last_operation {
            ready_at = ready_at.max(last + self.min_interval);
        }
        if let Some(blocked) = state.blocked_until {
            ready_at = ready_at.max(blocked);
        }

        let waited = ready_at.saturating_duration_since(now);
        if !waited.is_zero() {
            debug!("Rate limiter: waiting {:?} before next send", waited);
            tokio::time::sleep_until(ready_at).await;
        }

        state.last_operation = Some(Instant::now());
        state.blocked_until = None;
        waited
    }

    /// Blocks all callers for `wait` from now.
    pub async fn defer(&self, wait: Duration) {
        warn!("Flood wait: pausing sends for {:?}", wait);
        let until = Instant::now() + wait;
        let mut state = self.state.lock().await;
        state.blocked_until = Some(state.blocked_until.map_or(until, |b| b.max(until)));
    }

    /// Time remaining until the next operation is allowed.
    pub async fn time_until_allowed(&self) -> Duration {
        let state = self.state.lock().await;
        let now = Instant::now();
        let interval = state
            .last_operation
            .map_or(Duration::ZERO, |last| (last + self.min_interval).saturating_duration_since(now));
        let blocked = state
            .blocked_until
            .map_or(Duration::ZERO, |until| until.saturating_duration_since(now));
        interval.max(blocked)
    }
}
