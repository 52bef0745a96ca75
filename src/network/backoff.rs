//! Capped exponential backoff shared by reconnects and snapshot retries.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: Duration,
    cap: Duration,
    max_attempts: u32,
}

/// Returned by [`BackoffPolicy::retry`] once every attempt has failed.
#[derive(Debug)]
pub struct Exhausted<E> {
    pub attempts: u32,
    pub last_error: E,
}

impl BackoffPolicy {
    /// `max_attempts` is clamped to at least one.
    pub fn new(base: Duration, cap: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            cap,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before retry number `retry` (1-based): `min(base * 2^(retry-1), cap)`.
    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(retry - 1).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }

    /// Whether `failures` consecutive failures use up the attempt budget.
    #[inline]
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }

    /// Run `op` until it succeeds or the attempt budget is spent, sleeping
    /// `delay(n)` after the n-th failure.
    pub async fn retry<T, E, F, Fut>(&self, what: &str, mut op: F) -> Result<T, Exhausted<E>>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut failures = 0;
        loop {
            match op(failures + 1).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    failures += 1;
                    if self.is_exhausted(failures) {
                        return Err(Exhausted {
                            attempts: failures,
                            last_error: e,
                        });
                    }
                    let delay = self.delay(failures);
                    warn!(
                        "{} failed ({}), attempt {}/{}; retrying in {:?}",
                        what, e, failures, self.max_attempts, delay
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(5000), 5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_delays_are_capped_and_non_decreasing() {
        let policy = BackoffPolicy::default();
        let delays: Vec<u64> = (1..=6).map(|n| policy.delay(n).as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000, 5000]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_huge_retry_counts_do_not_overflow() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(64), Duration::from_millis(5000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(5000));
    }

    #[test]
    fn test_exhaustion_threshold() {
        let policy = BackoffPolicy::default();
        assert!(!policy.is_exhausted(4));
        assert!(policy.is_exhausted(5));
        assert_eq!(BackoffPolicy::new(Duration::ZERO, Duration::ZERO, 0).max_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_after_budget() {
        let policy = BackoffPolicy::default();
        let calls = AtomicU32::new(0);
        let started = Instant::now();

        let result: Result<(), _> = policy
            .retry("fetch", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>("boom") }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // 1000 + 2000 + 4000 + 5000 between the five attempts
        assert_eq!(started.elapsed(), Duration::from_millis(12_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_returns_first_success() {
        let policy = BackoffPolicy::default();
        let result = policy
            .retry("fetch", |attempt| async move {
                if attempt < 3 {
                    Err("not yet")
                } else {
                    Ok(attempt)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }
}
