//! Retrying sends that hit flood waits or an unknown recipient.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use super::{RateLimiter, SendOutcome, TelegramError};
use crate::config::ClonerSettings;

/// How a rate-limited send is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Wait used when Telegram does not say how long.
    pub default_wait: Duration,
    /// Upper bound for a single wait.
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            default_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    #[must_use]
    pub fn from_settings(settings: &ClonerSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.max(1),
            default_wait: Duration::from_secs(settings.flood_wait_default_secs),
            max_wait: Duration::from_secs(settings.flood_wait_cap_secs),
        }
    }

    /// The wait to apply for a flood wait reporting `retry_after`.
    #[must_use]
    pub fn wait_for(&self, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or(self.default_wait).min(self.max_wait)
    }
}

/// A send that did not go through.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("Still rate limited after {attempts} attempts")]
    RateLimited {
        attempts: u32,
        retry_after: Option<Duration>,
    },

    #[error("Recipient could not be resolved")]
    UnresolvedPeer,

    #[error(transparent)]
    Fatal(#[from] TelegramError),
}

/// Runs `op` until it succeeds or fails for good.
///
/// Flood waits are honoured through `limiter` so concurrent senders pause
/// too. `resolve` runs at most once, after an unresolved-peer outcome on
/// the first attempt.
pub async fn send_with_retry<T, Op, OpFut, Res, ResFut>(
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    mut op: Op,
    resolve: Res,
) -> Result<T, SendError>
where
    Op: FnMut() -> OpFut,
    OpFut: Future<Output = SendOutcome<T>>,
    Res: FnOnce() -> ResFut,
    ResFut: Future<Output = Result<(), TelegramError>>,
{
    let mut resolve = Some(resolve);
    let mut attempt = 0;

    loop {
        attempt += 1;
        limiter.wait_and_acquire().await;

        match op().await {
            SendOutcome::Ok(value) => return Ok(value),
            SendOutcome::RateLimited { retry_after } => {
                if attempt >= policy.max_attempts {
                    return Err(SendError::RateLimited {
                        attempts: attempt,
                        retry_after,
                    });
                }
                let wait = policy.wait_for(retry_after);
                warn!(
                    "Flood wait on attempt {}/{}, retrying in {:?}",
                    attempt, policy.max_attempts, wait
                );
                limiter.defer(wait).await;
            }
            SendOutcome::UnresolvedPeer => {
                let Some(resolve) = resolve.take().filter(|_| attempt == 1) else {
                    return Err(SendError::UnresolvedPeer);
                };
                info!("Recipient unknown to the publisher, resolving it");
                if let Err(e) = resolve().await {
                    warn!("Failed to resolve recipient: {}", e);
                    return Err(SendError::UnresolvedPeer);
                }
            }
            SendOutcome::Fatal(e) => return Err(SendError::Fatal(e)),
        }
    }
}
