//! Retry with jittered exponential backoff for provider calls.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::FetchError;

/// Backoff settings applied around one outbound call.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_min: Duration::from_millis(500),
            jitter_max: Duration::from_millis(1500),
        }
    }
}

impl RetryPolicy {
    /// Policy with no waiting at all (tests, one-shot tools).
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        }
    }

    /// Deterministic part of the wait after the given (1-based) failed attempt.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay)
    }

    /// Full wait: backoff plus uniform jitter, doubled when the provider throttled us.
    pub fn delay_for(&self, attempt: u32, rate_limited: bool) -> Duration {
        let mut delay = self.backoff(attempt) + self.jitter();
        if rate_limited {
            delay = delay.saturating_mul(2);
        }
        delay
    }

    fn jitter(&self) -> Duration {
        if self.jitter_max <= self.jitter_min {
            return self.jitter_min;
        }
        let lo = self.jitter_min.as_millis() as u64;
        let hi = self.jitter_max.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `on_retry` sees every failure that will be retried.
    pub async fn run<F, Fut, T, R>(&self, what: &str, mut op: F, mut on_retry: R) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
        R: FnMut(&FetchError),
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && e.is_transient() => {
                    on_retry(&e);
                    let delay = self.delay_for(attempt, e.is_rate_limit());
                    warn!(
                        "{} failed (attempt {}/{}): {}. Retrying in {}ms",
                        what,
                        attempt,
                        max_attempts,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
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
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(5));
        assert_eq!(policy.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let policy = RetryPolicy {
            base_delay: Duration::ZERO,
            ..RetryPolicy::default()
        };
        for _ in 0..50 {
            let d = policy.delay_for(1, false);
            assert!(d >= policy.jitter_min && d <= policy.jitter_max);
        }
    }

    #[test]
    fn test_rate_limit_doubles_delay() {
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(60),
            jitter_min: Duration::ZERO,
            jitter_max: Duration::ZERO,
        };
        assert_eq!(policy.delay_for(1, true), Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_retry_succeeds_eventually() {
        let attempts = Arc::new(AtomicU32::new(0));
        let retries_seen = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let seen = retries_seen.clone();

        let result = RetryPolicy::immediate(3)
            .run(
                "flaky call",
                || {
                    let counter = counter.clone();
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) + 1 < 3 {
                            Err(FetchError::Timeout("slow".into()))
                        } else {
                            Ok(42)
                        }
                    }
                },
                |_| {
                    seen.fetch_add(1, Ordering::SeqCst);
                },
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(retries_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), FetchError> = RetryPolicy::immediate(4)
            .run(
                "dead call",
                || {
                    let counter = counter.clone();
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Err(FetchError::Connection("refused".into()))
                    }
                },
                |_| {},
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_permanent_error_is_not_retried() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<(), FetchError> = tokio_test::block_on(RetryPolicy::immediate(5).run(
            "bad request",
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(FetchError::Status {
                        status: 400,
                        body: "bad".into(),
                    })
                }
            },
            |_| {},
        ));

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
