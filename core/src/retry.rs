use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::error::ComposerError;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_timeout: Duration::from_secs(15),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, counting attempts from 1.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Errors that know whether trying again could help.
pub trait Retryable: Sized {
    fn is_retryable(&self) -> bool;

    /// The error reported when an attempt exceeds its timeout.
    fn timed_out(after: Duration) -> Self;
}

impl Retryable for ComposerError {
    fn is_retryable(&self) -> bool {
        match self {
            ComposerError::Network(_) | ComposerError::Timeout(_) => true,
            ComposerError::Status { status, .. } => *status >= 500,
            ComposerError::InvalidResponse(_) | ComposerError::Rejected(_) => false,
        }
    }

    fn timed_out(after: Duration) -> Self {
        ComposerError::Timeout(after)
    }
}

#[derive(Debug, Error)]
#[error("timed out after {0:?}")]
pub struct TimedOut(pub Duration);

/// Local database calls: only lock contention and timeouts are worth another try.
impl Retryable for anyhow::Error {
    fn is_retryable(&self) -> bool {
        self.chain().any(|cause| {
            if cause.is::<TimedOut>() {
                return true;
            }
            if let Some(rusqlite::Error::SqliteFailure(err, _)) =
                cause.downcast_ref::<rusqlite::Error>()
            {
                return matches!(
                    err.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                );
            }
            cause.to_string().contains("database is locked")
        })
    }

    fn timed_out(after: Duration) -> Self {
        anyhow::Error::new(TimedOut(after))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the policy's
/// attempts are used up. Each attempt is bounded by `attempt_timeout`.
pub async fn retry_with_backoff<T, E, F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    mut op: F,
) -> Result<T, E>
where
    E: Retryable + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(policy.attempt_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(E::timed_out(policy.attempt_timeout)),
        };
        match result {
            Ok(value) => return Ok(value),
            Err(err) if attempt < max_attempts && err.is_retryable() => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    operation = name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
