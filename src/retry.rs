//! Bounded exponential backoff for provider calls
//!
//! One policy object is shared by discovery and every collector. Only errors that
//! report themselves as transient are retried; everything else is returned at once.

use crate::error::{DiscoveryError, ProviderError};
use log::debug;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Errors that know whether a retry could help
pub trait Transient {
    fn is_transient(&self) -> bool;
}

impl Transient for ProviderError {
    fn is_transient(&self) -> bool {
        ProviderError::is_transient(self)
    }
}

impl Transient for DiscoveryError {
    fn is_transient(&self) -> bool {
        DiscoveryError::is_transient(self)
    }
}

/// Exponential backoff with a delay cap and an attempt limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Longest delay between two attempts
    pub max_delay: Duration,
    /// Total attempts including the first one
    pub max_attempts: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(200), Duration::from_secs(5), 5)
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2_u32.pow(exponent))
            .min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails permanently, or the attempts run out
///
/// # Arguments
///
/// * `policy` - Backoff policy to apply between attempts
/// * `label` - Short description of the call, used in log messages
/// * `op` - Closure producing a fresh future for each attempt
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    label: &str,
    mut op: F,
) -> Result<T, E>
where
    E: Transient + Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    "{} failed on attempt {}/{} ({}), retrying in {:?}",
                    label, attempt, policy.max_attempts, err, delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => {
                if err.is_transient() {
                    debug!("{} gave up after {} attempts: {}", label, attempt, err);
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_delay_schedule() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(3200));
        assert_eq!(policy.delay_for(6), Duration::from_secs(5));
        assert_eq!(policy.delay_for(40), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<&str, ProviderError> =
            retry_with_backoff(&BackoffPolicy::default(), "flaky", || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ProviderError::Throttled("busy".to_string()))
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let started = tokio::time::Instant::now();

        let result: Result<(), ProviderError> =
            retry_with_backoff(&BackoffPolicy::default(), "down", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Network("unreachable".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 200 + 400 + 800 + 1600 ms of backoff
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), ProviderError> =
            retry_with_backoff(&BackoffPolicy::default(), "denied", || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(ProviderError::Unauthorized("no access".to_string()))
                }
            })
            .await;

        assert!(matches!(result, Err(ProviderError::Unauthorized(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_delay_never_exceeds_cap(base_ms: u16, cap_ms: u16, attempt: u32) -> bool {
        let policy = BackoffPolicy::new(
            Duration::from_millis(u64::from(base_ms)),
            Duration::from_millis(u64::from(cap_ms)),
            5,
        );
        policy.delay_for(attempt) <= policy.max_delay
    }

    #[quickcheck]
    fn prop_delay_is_monotonic(base_ms: u16, attempt: u8) -> bool {
        let policy = BackoffPolicy::new(
            Duration::from_millis(u64::from(base_ms)),
            Duration::from_secs(5),
            5,
        );
        let attempt = u32::from(attempt);
        policy.delay_for(attempt) <= policy.delay_for(attempt + 1)
    }
}
