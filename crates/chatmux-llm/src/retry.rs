//! Retry with backoff for rate-limited upstream calls
//!
//! Only `UpstreamRateLimited` is retried. A retry-after given by the
//! upstream is honored exactly; otherwise the delay doubles per attempt with
//! random jitter, capped at the maximum delay.

use std::future::Future;
use std::time::Duration;

use chatmux_config::RetryConfig;
use rand::Rng;

use crate::error::LlmError;

/// Parsed retry settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Result<Self, LlmError> {
        let durations = config.durations()?;

        Ok(Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: durations.initial_delay,
            max_delay: durations.max_delay,
            jitter_min: durations.jitter_min,
            jitter_max: durations.jitter_max,
        })
    }

    /// Computed delay before retry number `retry` (0-based)
    ///
    /// Never decreases from one retry to the next as long as the jitter span
    /// does not exceed the initial delay.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2_u32.saturating_pow(retry.min(31)))
            .min(self.max_delay);

        (base + self.jitter()).min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let min = u64::try_from(self.jitter_min.as_millis()).unwrap_or(u64::MAX);
        let max = u64::try_from(self.jitter_max.as_millis()).unwrap_or(u64::MAX);

        if max <= min {
            return Duration::from_millis(min);
        }
        Duration::from_millis(rand::rng().random_range(min..=max))
    }

    /// Wait before the next attempt: the upstream's retry-after, else backoff
    fn delay(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        retry_after.unwrap_or_else(|| self.backoff(retry))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            jitter_min: Duration::from_millis(100),
            jitter_max: Duration::from_millis(400),
        }
    }
}

/// Run `operation` until it succeeds, fails otherwise, or attempts run out
///
/// `operation` receives the 1-based attempt number. Exhaustion surfaces
/// `UpstreamRateLimited` with the last retry-after seen.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, provider: &str, mut operation: F) -> Result<T, LlmError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 1;

    loop {
        let retry_after = match operation(attempt).await {
            Err(LlmError::UpstreamRateLimited { retry_after }) => retry_after,
            other => return other,
        };

        if attempt >= policy.max_attempts {
            tracing::warn!(provider = %provider, attempts = attempt, "retry budget exhausted");
            return Err(LlmError::UpstreamRateLimited { retry_after });
        }

        let delay = policy.delay(attempt - 1, retry_after);
        tracing::warn!(
            provider = %provider,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            honored_retry_after = retry_after.is_some(),
            "upstream rate limited, retrying"
        );

        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
