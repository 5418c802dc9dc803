use std::{num::NonZeroU32, time::Duration};

use governor::{
    DefaultDirectRateLimiter, Quota, RateLimiter,
    clock::{Clock, DefaultClock},
};
use tokio::time::Instant;

use crate::error::AdmissionError;

/// Admission pacing backed by governor
///
/// Refills `rps` tokens per second with a burst of `2 * rps`.
pub(crate) struct TokenBucket {
    limiter: DefaultDirectRateLimiter,
    clock: DefaultClock,
}

impl TokenBucket {
    /// Build a bucket, or `None` when `rps` is zero
    pub(crate) fn new(rps: f64) -> Result<Option<Self>, AdmissionError> {
        if !rps.is_finite() || rps < 0.0 {
            return Err(AdmissionError::Config(format!("rate_limit_rps must be >= 0, got {rps}")));
        }

        if rps < f64::EPSILON {
            return Ok(None);
        }

        let period = Duration::from_secs_f64(1.0 / rps);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let burst = NonZeroU32::new((rps * 2.0).ceil().min(f64::from(u32::MAX)) as u32)
            .ok_or_else(|| AdmissionError::Config("token bucket burst must be > 0".to_string()))?;

        let quota = Quota::with_period(period)
            .ok_or_else(|| AdmissionError::Config("invalid token bucket period".to_string()))?
            .allow_burst(burst);

        Ok(Some(Self {
            limiter: RateLimiter::direct(quota),
            clock: DefaultClock::default(),
        }))
    }

    /// Take one token, sleeping for refills until `deadline`
    ///
    /// Returns `false` without consuming a token when the next refill would
    /// arrive after the deadline.
    pub(crate) async fn take(&self, deadline: Instant) -> bool {
        loop {
            let wait = match self.limiter.check() {
                Ok(()) => return true,
                Err(not_until) => not_until.wait_time_from(self.clock.now()),
            };

            if Instant::now() + wait > deadline {
                return false;
            }

            tracing::trace!(wait_ms = wait.as_millis(), "waiting for admission token");
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_rate_disables_bucket() {
        assert!(TokenBucket::new(0.0).unwrap().is_none());
    }

    #[test]
    fn negative_rate_is_rejected() {
        assert!(matches!(TokenBucket::new(-1.0), Err(AdmissionError::Config(_))));
    }

    #[tokio::test]
    async fn burst_is_twice_the_rate() {
        let bucket = TokenBucket::new(2.0).unwrap().unwrap();
        let now = Instant::now();

        for _ in 0..4 {
            assert!(bucket.take(now).await);
        }

        // the fifth token refills 500ms from now, past an immediate deadline
        assert!(!bucket.take(Instant::now()).await);
    }

    #[tokio::test]
    async fn waits_for_refill_within_deadline() {
        let bucket = TokenBucket::new(50.0).unwrap().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);

        for _ in 0..100 {
            assert!(bucket.take(deadline).await);
        }

        let started = std::time::Instant::now();
        assert!(bucket.take(deadline).await);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
