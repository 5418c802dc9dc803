use std::time::Duration;

use serde::Deserialize;

/// Retry policy applied to rate-limited upstream calls
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    /// Total attempts per upstream invocation, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay when the upstream gives no retry-after
    #[serde(default = "default_initial_delay")]
    pub initial_delay: String,
    /// Upper bound for computed backoff delays
    #[serde(default = "default_max_delay")]
    pub max_delay: String,
    /// Lower bound of the random jitter added to computed delays
    #[serde(default = "default_jitter_min")]
    pub jitter_min: String,
    /// Upper bound of the random jitter added to computed delays
    #[serde(default = "default_jitter_max")]
    pub jitter_max: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            jitter_min: default_jitter_min(),
            jitter_max: default_jitter_max(),
        }
    }
}

/// Parsed retry durations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDurations {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
}

impl RetryConfig {
    /// Parse every duration field
    pub fn durations(&self) -> anyhow::Result<RetryDurations> {
        Ok(RetryDurations {
            initial_delay: crate::parse_duration(&self.initial_delay)?,
            max_delay: crate::parse_duration(&self.max_delay)?,
            jitter_min: crate::parse_duration(&self.jitter_min)?,
            jitter_max: crate::parse_duration(&self.jitter_max)?,
        })
    }
}

const fn default_max_attempts() -> u32 {
    6
}

fn default_initial_delay() -> String {
    "500ms".to_owned()
}

fn default_max_delay() -> String {
    "15s".to_owned()
}

fn default_jitter_min() -> String {
    "100ms".to_owned()
}

fn default_jitter_max() -> String {
    "400ms".to_owned()
}
