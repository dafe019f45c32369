//! Retry logic with exponential backoff
//!
//! Listing and export calls go through [`retry_with_backoff`]. Each failed
//! attempt is classified through [`IsRetryable`]; transient failures wait
//! and try again until `max_attempts` have been made. A server-provided wait
//! directive (HTTP `Retry-After`) replaces the computed delay for that attempt.
//!
//! # Example
//!
//! ```no_run
//! use sf_report_export::retry::{IsRetryable, retry_with_backoff};
//! use sf_report_export::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! retry_with_backoff(&config, || async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;

    /// Explicit wait requested by the remote side, if any
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// Computed delay after the `attempt`-th failure (1-based), before jitter
///
/// `initial_delay * backoff_multiplier^(attempt - 1)`, capped at `max_delay`.
/// With the defaults this yields 1s, 2s, 4s, ... 60s.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    Duration::try_from_secs_f64(secs)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

/// Execute an async operation with exponential backoff retry logic
///
/// At most `config.max_attempts` calls are made. After every retryable
/// failure, the last one included, the task sleeps for the attempt's delay;
/// the final pause keeps the next call to the same remote system below its
/// rate limit. Non-retryable errors return immediately without sleeping.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() => {
                let delay = match e.retry_after() {
                    Some(requested) => requested,
                    None if config.jitter => {
                        add_jitter(backoff_delay(config, attempt)).min(config.max_delay)
                    }
                    None => backoff_delay(config, attempt),
                };

                if attempt >= max_attempts {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Operation failed after all retry attempts exhausted"
                    );
                    tokio::time::sleep(delay).await;
                    return Err(e);
                }

                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                tracing::debug!(error = %e, attempt, "Operation failed with non-retryable error");
                return Err(e);
            }
        }
    }
}

/// Stretch a delay by a random factor in [1.0, 1.25]
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=0.25);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
