use std::time::Duration;

use http::StatusCode;

/// Trait for domain errors that can be converted to HTTP responses
///
/// Implemented by each feature crate's error type. The server layer
/// renders these into JSON bodies, keeping domain errors decoupled
/// from axum.
pub trait HttpError: std::error::Error {
    /// HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Machine-readable error type (e.g. `bad_request`)
    fn error_type(&self) -> &str;

    /// Message safe to expose to API consumers
    fn client_message(&self) -> String;

    /// Suggested wait before the client retries, sent as `Retry-After`
    fn retry_after(&self) -> Option<Duration> {
        None
    }

    /// Status reported by an upstream service, when the error originated there
    fn upstream_status(&self) -> Option<u16> {
        None
    }
}

/// Render a duration as whole `Retry-After` seconds, never below one
pub fn retry_after_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}
