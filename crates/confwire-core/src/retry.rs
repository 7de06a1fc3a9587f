//! Fixed-delay retry for one-shot reads.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Default number of attempts for a one-shot read.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default pause between attempts and between reconnects.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// How often and how patiently to retry.
///
/// The delay is constant between attempts. There is no backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one
    pub attempts: u32,
    /// Pause before every attempt after the first
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_RETRY_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Policy with a single attempt.
    pub fn once() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only transient errors (see [`Error::is_transient`]) are retried. When every
/// attempt fails the last error is returned inside
/// [`Error::RetriesExhausted`]. Cancellation is observed during each attempt
/// and each pause.
pub async fn retry_fixed<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        if attempt > 1 {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(policy.delay) => {}
            }
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            outcome = op() => outcome,
        };

        match outcome {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}/{}", what, attempt, attempts);
                }
                return Ok(value);
            }
            Err(err) if !err.is_transient() => return Err(err),
            Err(err) => {
                warn!("{} attempt {}/{} failed: {}", what, attempt, attempts, err);
                last_error = Some(err);
            }
        }
    }

    Err(Error::RetriesExhausted {
        attempts,
        source: Box::new(last_error.unwrap_or_else(|| Error::Transport("no attempt made".into()))),
    })
}
