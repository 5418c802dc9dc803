//! Log output for chatmux
//!
//! Sets up the `tracing-subscriber` registry with an env filter and a
//! text or JSON formatting layer.

use chatmux_config::{LogFormat, TelemetryConfig};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable that overrides the configured filter
const FILTER_ENV: &str = "RUST_LOG";

/// Filter directives in effect: `RUST_LOG` when set, else the configured ones
fn filter_directives(config: &TelemetryConfig) -> String {
    std::env::var(FILTER_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| config.log_filter.clone())
}

/// Build the filter, falling back to `info` on bad directives
fn build_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("invalid log filter '{directives}': {e}, falling back to info");
        EnvFilter::new("info")
    })
}

/// Initialize the global subscriber
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let filter = build_filter(&filter_directives(config));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Text => registry.with(fmt_layer).try_init(),
        LogFormat::Json => registry.with(fmt_layer.json().flatten_event(true)).try_init(),
    }
    .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(filter: &str) -> TelemetryConfig {
        TelemetryConfig {
            log_filter: filter.to_owned(),
            format: LogFormat::Text,
        }
    }

    #[test]
    fn configured_filter_without_env() {
        temp_env::with_var_unset(FILTER_ENV, || {
            assert_eq!(filter_directives(&config("chatmux_llm=debug")), "chatmux_llm=debug");
        });
    }

    #[test]
    fn env_overrides_configured_filter() {
        temp_env::with_var(FILTER_ENV, Some("warn"), || {
            assert_eq!(filter_directives(&config("debug")), "warn");
        });
    }

    #[test]
    fn blank_env_is_ignored() {
        temp_env::with_var(FILTER_ENV, Some(" "), || {
            assert_eq!(filter_directives(&config("debug")), "debug");
        });
    }

    #[test]
    fn bad_directives_fall_back_to_info() {
        assert_eq!(build_filter("chatmux=notalevel").to_string(), "info");
    }
}
