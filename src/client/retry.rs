//! Exponential backoff for coordinator calls.
//!
//! Only transient transport failures are retried; HTTP-level errors (4xx
//! in particular) abort the loop immediately and surface unchanged.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first try).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled each retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Multiplier applied to the previous delay on each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config suitable for unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        }
    }

    /// A single attempt, no retries. Used for liveness probes.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

/// Retry an async operation with exponential backoff while its error is
/// transient. Returns the first success, the first non-transient error, or
/// the last transient error once attempts are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(config: &RetryConfig, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    assert!(
        config.max_attempts > 0,
        "RetryConfig.max_attempts must be at least 1"
    );

    let mut delay = config.initial_delay;
    for attempt in 1..=config.max_attempts {
        match f().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(attempt, "retry succeeded");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                warn!(
                    attempt,
                    max = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    err = %e,
                    "transient failure — retrying"
                );
                tokio::time::sleep(delay).await;
                let next_ms = (delay.as_millis() as f64 * config.multiplier) as u128;
                delay = Duration::from_millis(next_ms.min(config.max_delay.as_millis()) as u64);
            }
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop returns from its final attempt")
}
