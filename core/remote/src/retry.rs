//! Backoff for transient request failures.
//!
//! Reads, updates and deletes are idempotent on the server and are retried on
//! any transient failure. Creates and photo uploads are not: a dropped
//! connection may hide a request the server already applied, so they are only
//! retried when the server answered that it did not process them (429, 503).

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use spotsync_common::{Error, Result};

/// Whether repeating a request can duplicate its effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Idempotency {
    Safe,
    /// Creates a server resource on every successful attempt.
    Unsafe,
}

/// Backoff schedule for [`RetryExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Scale each delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `retry` (zero-based): doubles each time up
    /// to `max_delay`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let doubled = self
            .initial_delay
            .saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX));
        let capped = doubled.min(self.max_delay);
        if self.jitter {
            capped.mul_f64(0.5 + rand::random::<f64>() * 0.5)
        } else {
            capped
        }
    }
}

/// Whether `err` is worth another attempt.
fn should_retry(err: &Error, idempotency: Idempotency) -> bool {
    match idempotency {
        Idempotency::Safe => err.is_transient(),
        Idempotency::Unsafe => matches!(err, Error::Remote { status: 429 | 503, .. }),
    }
}

/// Repeats a remote request while it fails with a retryable error.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `request` until it succeeds, fails permanently, or the retries
    /// are used up. `label` names the request in logs, e.g. `"GET spots/3"`.
    pub async fn execute<F, Fut, T>(
        &self,
        label: &str,
        idempotency: Idempotency,
        request: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retry = 0;
        loop {
            let err = match request().await {
                Ok(value) => {
                    if retry > 0 {
                        debug!("{} succeeded on retry {}", label, retry);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !should_retry(&err, idempotency) || retry >= self.config.max_retries {
                if retry > 0 {
                    warn!("{} gave up after {} retries: {}", label, retry, err);
                }
                return Err(err);
            }

            let delay = self.config.backoff(retry);
            retry += 1;
            warn!("{} failed ({}), retry {}/{} in {:?}", label, err, retry, self.config.max_retries, delay);
            sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryExecutor {
        RetryExecutor::new(RetryConfig {
            max_retries,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        })
    }

    async fn attempts_until(
        executor: &RetryExecutor,
        idempotency: Idempotency,
        fail_with: impl Fn() -> Error,
        succeed_on: u32,
    ) -> (Result<u32>, u32) {
        let attempts = AtomicU32::new(0);
        let result = executor
            .execute("GET spots", idempotency, || {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                let outcome = if attempt >= succeed_on {
                    Ok(attempt)
                } else {
                    Err(fail_with())
                };
                async move { outcome }
            })
            .await;
        (result, attempts.load(Ordering::SeqCst))
    }

    fn unavailable() -> Error {
        Error::Remote {
            status: 503,
            message: "unavailable".to_string(),
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_cap() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter: false,
            ..Default::default()
        };
        assert_eq!(config.backoff(0), Duration::from_secs(1));
        assert_eq!(config.backoff(1), Duration::from_secs(2));
        assert_eq!(config.backoff(2), Duration::from_secs(4));
        assert_eq!(config.backoff(3), Duration::from_secs(5));
        assert_eq!(config.backoff(40), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_half() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(800),
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = config.backoff(0);
            assert!(delay >= Duration::from_millis(400) && delay <= Duration::from_millis(800));
        }
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let (result, attempts) = attempts_until(&fast(3), Idempotency::Safe, unavailable, 3).await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let (result, attempts) = attempts_until(
            &fast(3),
            Idempotency::Safe,
            || Error::NotFound("spot 7".to_string()),
            10,
        )
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let (result, attempts) = attempts_until(
            &fast(2),
            Idempotency::Safe,
            || Error::Network("connection refused".to_string()),
            10,
        )
        .await;
        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_unsafe_request_not_retried_on_network_error() {
        let (result, attempts) = attempts_until(
            &fast(3),
            Idempotency::Unsafe,
            || Error::Network("connection reset".to_string()),
            2,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);

        let (result, attempts) = attempts_until(&fast(3), Idempotency::Unsafe, unavailable, 2).await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_disabled_runs_once() {
        let executor = RetryExecutor::new(RetryConfig::disabled());
        let (_, attempts) = attempts_until(&executor, Idempotency::Safe, unavailable, 5).await;
        assert_eq!(attempts, 1);
    }
}
