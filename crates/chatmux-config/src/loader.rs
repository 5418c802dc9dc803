use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::parse(&raw)
    }

    /// Expand, deserialize and validate configuration text
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    pub fn validate(&self) -> anyhow::Result<()> {
        self.validate_gate()?;
        self.validate_retry()?;
        self.validate_llm()?;
        self.validate_server()?;
        Ok(())
    }

    fn validate_gate(&self) -> anyhow::Result<()> {
        if self.gate.max_concurrency == 0 {
            anyhow::bail!("gate.max_concurrency must be at least 1");
        }

        if !self.gate.rate_limit_rps.is_finite() || self.gate.rate_limit_rps < 0.0 {
            anyhow::bail!("gate.rate_limit_rps must be a non-negative number");
        }

        self.gate.queue_timeout()?;

        Ok(())
    }

    fn validate_retry(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }

        let d = self.retry.durations()?;

        if d.initial_delay > d.max_delay {
            anyhow::bail!("retry.initial_delay must not exceed retry.max_delay");
        }

        if d.jitter_min > d.jitter_max {
            anyhow::bail!("retry.jitter_min must not exceed retry.jitter_max");
        }

        // keeps consecutive computed delays non-decreasing
        if d.jitter_max - d.jitter_min > d.initial_delay {
            anyhow::bail!("retry jitter span must not exceed retry.initial_delay");
        }

        Ok(())
    }

    fn validate_llm(&self) -> anyhow::Result<()> {
        if self.llm.providers.is_empty() {
            anyhow::bail!("at least one llm provider must be configured");
        }

        if !self.llm.providers.contains_key(&self.llm.default_provider) {
            anyhow::bail!(
                "llm.default_provider '{}' does not name a configured provider",
                self.llm.default_provider
            );
        }

        if self.llm.default_model.trim().is_empty() {
            anyhow::bail!("llm.default_model must not be blank");
        }

        let limits = &self.llm.limits;
        if limits.max_messages == 0 || limits.max_message_bytes == 0 || limits.max_body_bytes == 0 {
            anyhow::bail!("llm.limits values must be greater than 0");
        }

        Ok(())
    }

    fn validate_server(&self) -> anyhow::Result<()> {
        if !self.server.health.path.starts_with('/') {
            anyhow::bail!("server.health.path must start with '/'");
        }

        if let Some(max_age) = self.server.cors.as_ref().and_then(|cors| cors.max_age.as_deref()) {
            crate::parse_duration(max_age)?;
        }

        Ok(())
    }
}
