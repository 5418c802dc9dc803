use std::time::Duration;

use thiserror::Error;

/// Admission failures
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The wait queue is at its limit
    #[error("admission queue is full")]
    QueueFull {
        /// Suggested wait before retrying
        retry_after: Duration,
    },

    /// The acquire deadline passed while waiting
    #[error("timed out waiting for admission")]
    QueueTimeout {
        /// Suggested wait before retrying
        retry_after: Duration,
    },

    /// Invalid gate settings
    #[error("admission gate configuration error: {0}")]
    Config(String),
}
