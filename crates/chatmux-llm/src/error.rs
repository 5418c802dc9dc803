use std::time::Duration;

use chatmux_core::HttpError;
use chatmux_gate::AdmissionError;
use http::StatusCode;
use thiserror::Error;

use crate::types::ErrorKind;

/// Errors surfaced by the gateway core
#[derive(Debug, Error)]
pub enum LlmError {
    /// Admission queue at its limit
    #[error("server busy, please retry")]
    QueueFull { retry_after: Duration },

    /// Admission deadline passed while queued
    #[error("timed out waiting for an upstream slot, please retry")]
    QueueTimeout { retry_after: Duration },

    /// No usable upstream credential
    #[error("{0}")]
    Unauthenticated(String),

    /// Request uses a capability the selected backend cannot express
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// Upstream answered 429, or the retry budget ran out against it
    #[error("upstream rate limited")]
    UpstreamRateLimited { retry_after: Option<Duration> },

    /// Malformed or unexpected upstream payload
    #[error("upstream protocol error: {0}")]
    UpstreamProtocol(String),

    /// Connection or timeout failure talking to the upstream
    #[error("upstream transport error: {0}")]
    UpstreamTransport(String),

    /// Non-success upstream reply other than 429
    #[error("upstream returned {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    /// Rejected by pre-admission validation
    #[error("{0}")]
    InvalidRequest(String),

    /// Named provider is not configured
    #[error("invalid provider: {provider}. Available: {available}")]
    ProviderNotFound { provider: String, available: String },

    /// Unexpected internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl LlmError {
    /// Kind carried by a terminal stream error event
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::UpstreamRateLimited { .. } => ErrorKind::UpstreamRateLimited,
            Self::UpstreamProtocol(_) => ErrorKind::UpstreamProtocol,
            Self::UpstreamTransport(_) => ErrorKind::UpstreamTransport,
            Self::UpstreamStatus { .. } => ErrorKind::UpstreamStatus,
            Self::Unauthenticated(_) => ErrorKind::Unauthenticated,
            _ => ErrorKind::Internal,
        }
    }

    /// Build a transport error from a reqwest failure
    pub(crate) fn transport(error: &reqwest::Error) -> Self {
        Self::UpstreamTransport(crate::sanitize::sanitize_log_message(&error.to_string()))
    }
}

impl From<AdmissionError> for LlmError {
    fn from(error: AdmissionError) -> Self {
        match error {
            AdmissionError::QueueFull { retry_after } => Self::QueueFull { retry_after },
            AdmissionError::QueueTimeout { retry_after } => Self::QueueTimeout { retry_after },
            AdmissionError::Config(message) => Self::Internal(anyhow::anyhow!(message)),
        }
    }
}

impl HttpError for LlmError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::QueueFull { .. } | Self::QueueTimeout { .. } | Self::UpstreamRateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::UnsupportedFeature(_) | Self::InvalidRequest(_) | Self::ProviderNotFound { .. } => {
                StatusCode::BAD_REQUEST
            }
            Self::UpstreamStatus { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::UpstreamProtocol(_) | Self::UpstreamTransport(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &str {
        match self {
            Self::QueueFull { .. } | Self::QueueTimeout { .. } | Self::UpstreamRateLimited { .. } => "rate_limit",
            Self::Unauthenticated(_) => "authentication_error",
            Self::UnsupportedFeature(_) | Self::InvalidRequest(_) | Self::ProviderNotFound { .. } => "bad_request",
            Self::UpstreamStatus { .. } | Self::UpstreamProtocol(_) | Self::UpstreamTransport(_) => "upstream",
            Self::Internal(_) => "internal_error",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::Internal(_) => "an internal error occurred".to_owned(),
            other => other.to_string(),
        }
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::QueueFull { retry_after } | Self::QueueTimeout { retry_after } => Some(*retry_after),
            Self::UpstreamRateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::UpstreamStatus { status, .. } => Some(*status),
            Self::UpstreamRateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_errors_map_to_429() {
        let error: LlmError = AdmissionError::QueueFull {
            retry_after: Duration::from_secs(2),
        }
        .into();

        assert_eq!(error.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error.error_type(), "rate_limit");
        assert_eq!(error.retry_after(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn upstream_status_is_passed_through() {
        let error = LlmError::UpstreamStatus {
            status: 503,
            message: "overloaded".to_owned(),
        };

        assert_eq!(error.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.error_type(), "upstream");
        assert_eq!(error.upstream_status(), Some(503));
    }

    #[test]
    fn internal_details_stay_private() {
        let error = LlmError::Internal(anyhow::anyhow!("secret path /etc/x"));
        assert_eq!(error.client_message(), "an internal error occurred");
    }

    #[test]
    fn unknown_provider_is_a_client_error() {
        let error = LlmError::ProviderNotFound {
            provider: "nope".to_owned(),
            available: "chatgpt, grok".to_owned(),
        };

        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
        assert!(error.client_message().contains("nope"));
    }
}
