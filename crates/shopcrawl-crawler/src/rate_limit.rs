//! Retry policy for outbound requests.
//!
//! Provides capped exponential backoff for transient HTTP errors such as
//! 429 and 5xx responses. Non-retriable errors (other 4xx, malformed URLs)
//! are returned immediately without retrying.

use std::future::Future;
use std::time::Duration;

use shopcrawl_core::CrawlConfig;

use crate::error::{FetchError, FetchFailure};

/// Bounded exponential backoff.
///
/// # Backoff schedule (example with `base = 1s`, `cap = 8s`)
///
/// | Retry | Sleep before the attempt |
/// |-------|--------------------------|
/// | 1     | 1 s                      |
/// | 2     | 2 s                      |
/// | 3     | 4 s                      |
/// | 4     | 8 s                      |
/// | 5     | 8 s (capped)             |
///
/// A server `Retry-After` hint larger than the computed delay wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl BackoffPolicy {
    #[must_use]
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            base: config.backoff_base,
            cap: config.backoff_cap,
        }
    }

    /// Delay before retry number `retry + 1`: `base * 2^retry`, capped.
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        self.base
            .saturating_mul(1u32 << retry.min(31))
            .min(self.cap)
    }

    /// The delays slept between consecutive attempts when every attempt fails.
    pub fn schedule(&self) -> impl Iterator<Item = Duration> + '_ {
        (0..self.max_attempts.saturating_sub(1)).map(|retry| self.delay_for(retry))
    }
}

/// Executes `operation` with capped exponential backoff on transient errors.
///
/// `operation` receives the 1-based attempt number.
/// On success the result is returned immediately. Non-retriable errors are
/// returned after the attempt that produced them. When the last allowed
/// attempt fails with a retriable error the failure is flagged as
/// `exhausted`.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    policy: &BackoffPolicy,
    url: &str,
    mut operation: F,
) -> Result<T, FetchFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retriable() {
            return Err(FetchFailure {
                url: url.to_owned(),
                attempts: attempt,
                exhausted: false,
                source: err,
            });
        }
        if attempt >= policy.max_attempts {
            return Err(FetchFailure {
                url: url.to_owned(),
                attempts: attempt,
                exhausted: true,
                source: err,
            });
        }

        let backoff = policy.delay_for(attempt - 1);
        let delay = err.retry_after().map_or(backoff, |hint| hint.max(backoff));
        tracing::warn!(
            url,
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            error = %err,
            "transient fetch error — retrying after backoff"
        );
        tokio::time::sleep(delay).await;
    }
}
