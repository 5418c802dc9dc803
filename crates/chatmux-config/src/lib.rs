//! Configuration model for the chatmux gateway
//!
//! A single TOML file describes the HTTP listener, the admission gate,
//! the retry policy, the upstream providers and log output. Values may
//! reference environment variables with `{{ env.VAR }}` placeholders.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod cors;
mod env;
pub mod gate;
pub mod health;
pub mod llm;
mod loader;
pub mod retry;
pub mod server;
pub mod telemetry;

use serde::Deserialize;

pub use cors::*;
pub use gate::*;
pub use health::*;
pub use llm::*;
pub use retry::*;
pub use server::*;
pub use telemetry::*;

/// Top-level chatmux configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Admission gate limits
    #[serde(default)]
    pub gate: GateConfig,
    /// Upstream retry policy
    #[serde(default)]
    pub retry: RetryConfig,
    /// Provider and request-shaping configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Log output configuration
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Parse a human duration such as `"500ms"` or `"2m"`
pub fn parse_duration(s: &str) -> anyhow::Result<std::time::Duration> {
    duration_str::parse(s).map_err(|e| anyhow::anyhow!("invalid duration '{s}': {e}"))
}
