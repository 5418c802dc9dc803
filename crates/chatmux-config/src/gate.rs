use std::time::Duration;

use serde::Deserialize;

/// Admission gate limits
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GateConfig {
    /// Simultaneous upstream invocations allowed
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Waiters allowed in the FIFO queue before new arrivals are rejected
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
    /// Admissions per second; 0 disables the token bucket
    #[serde(default = "default_rate_limit_rps")]
    pub rate_limit_rps: f64,
    /// How long a request may wait for admission (e.g. "120s")
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            queue_limit: default_queue_limit(),
            rate_limit_rps: default_rate_limit_rps(),
            queue_timeout: default_queue_timeout(),
        }
    }
}

impl GateConfig {
    /// Parsed admission wait deadline
    pub fn queue_timeout(&self) -> anyhow::Result<Duration> {
        crate::parse_duration(&self.queue_timeout)
    }
}

const fn default_max_concurrency() -> usize {
    1
}

const fn default_queue_limit() -> usize {
    100
}

const fn default_rate_limit_rps() -> f64 {
    8.0
}

fn default_queue_timeout() -> String {
    "120s".to_owned()
}
