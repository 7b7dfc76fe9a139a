//! Retry policy for transient remote failures.
//!
//! Fixed interval plus random jitter, bounded by a hard attempt cap. Only
//! `Transient` failures are retried; `NotFound` and `Fatal` surface at once.
//! A transient failure that outlives the cap surfaces as `Fatal`.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use licsync_core::{RemoteError, RemoteResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_MAX_ATTEMPTS: u32 = 20;
const DEFAULT_INTERVAL_MS: u64 = 5_000;
const DEFAULT_JITTER_MS: u64 = 1_000;

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per call, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    #[serde(rename = "interval_ms", with = "duration_millis", default = "default_interval")]
    pub interval: Duration,
    /// Upper bound of the uniform random wait added to `interval`.
    #[serde(rename = "jitter_ms", with = "duration_millis", default = "default_jitter")]
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            interval: default_interval(),
            jitter: default_jitter(),
        }
    }
}

/// A failed attempt, with the server's hint on when to come back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error: RemoteError,
    pub retry_after: Option<Duration>,
}

impl Failure {
    /// Wrap an error without a server hint.
    #[must_use]
    pub const fn new(error: RemoteError) -> Self {
        Self {
            error,
            retry_after: None,
        }
    }

    /// Attach a `Retry-After` hint.
    #[must_use]
    pub const fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }
}

impl From<RemoteError> for Failure {
    fn from(error: RemoteError) -> Self {
        Self::new(error)
    }
}

impl RetryPolicy {
    /// Create a policy.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration, jitter: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            jitter,
        }
    }

    /// Single attempt, never retried.
    #[must_use]
    pub const fn no_retry() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Wait before the next attempt: `interval` plus uniform jitter.
    #[must_use]
    pub fn delay(&self) -> Duration {
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        let extra = if jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=jitter_ms)
        };
        self.interval.saturating_add(Duration::from_millis(extra))
    }

    /// Run `attempt` until it succeeds, fails non-transiently, or the
    /// attempt cap is reached. Every retry bumps `retries`.
    ///
    /// # Errors
    ///
    /// The first non-transient error, or the last transient error escalated
    /// to `Fatal` once the cap is reached.
    pub async fn run<T, F, Fut>(
        &self,
        label: &str,
        retries: &AtomicU64,
        mut attempt: F,
    ) -> RemoteResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Failure>>,
    {
        let mut made = 0u32;
        loop {
            made = made.saturating_add(1);
            match attempt().await {
                Ok(value) => {
                    if made > 1 {
                        debug!(call = label, attempts = made, "Call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(failure) if failure.error.is_retryable() => {
                    if made >= self.max_attempts {
                        return Err(failure.error.escalate(made));
                    }
                    let delay = failure
                        .retry_after
                        .map_or_else(|| self.delay(), |hint| hint.max(self.delay()));
                    retries.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        call = label,
                        attempt = made,
                        delay_ms = delay.as_millis(),
                        error = %failure.error,
                        "Backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => return Err(failure.error),
            }
        }
    }
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_interval() -> Duration {
    Duration::from_millis(DEFAULT_INTERVAL_MS)
}

const fn default_jitter() -> Duration {
    Duration::from_millis(DEFAULT_JITTER_MS)
}

/// Serialization helper for Duration as milliseconds.
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::ZERO)
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 20);
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.jitter, Duration::from_secs(1));
    }

    #[test]
    fn test_delay_stays_within_jitter_window() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100), Duration::from_millis(50));
        for _ in 0..100 {
            let delay = policy.delay();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(150));
        }
    }

    #[tokio::test]
    async fn test_transient_then_success_counts_retries() {
        let retries = AtomicU64::new(0);
        let calls = &AtomicU32::new(0);

        let result = fast(5)
            .run("lookup", &retries, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Failure::new(RemoteError::transient("429")))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_become_fatal() {
        let retries = AtomicU64::new(0);
        let calls = &AtomicU32::new(0);

        let result: RemoteResult<()> = fast(4)
            .run("apply", &retries, || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Failure::new(RemoteError::transient("503")))
            })
            .await;

        assert!(matches!(result, Err(RemoteError::Fatal { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(retries.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_not_found_and_fatal_are_never_retried() {
        let retries = AtomicU64::new(0);

        for error in [RemoteError::not_found("a@example.com"), RemoteError::fatal("401")] {
            let calls = &AtomicU32::new(0);
            let expected = &error;
            let result: RemoteResult<()> = fast(5)
                .run("lookup", &retries, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Failure::new(expected.clone()))
                })
                .await;

            assert_eq!(result, Err(error));
            assert_eq!(calls.load(Ordering::SeqCst), 1);
        }
        assert_eq!(retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_server_hint_longer_than_interval_wins() {
        let retries = AtomicU64::new(0);
        let calls = &AtomicU32::new(0);
        let hint = Duration::from_millis(200);

        let start = std::time::Instant::now();
        let result = fast(3)
            .run("lookup", &retries, || async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Failure::new(RemoteError::transient("429")).with_retry_after(Some(hint)))
                } else {
                    Ok(())
                }
            })
            .await;

        assert_eq!(result, Ok(()));
        assert!(start.elapsed() >= hint);
        assert_eq!(retries.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_from_toml() -> Result<(), Box<dyn std::error::Error>> {
        let policy: RetryPolicy = toml::from_str("max_attempts = 3\ninterval_ms = 250\n")?;
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.interval, Duration::from_millis(250));
        assert_eq!(policy.jitter, Duration::from_secs(1));
        Ok(())
    }
}
