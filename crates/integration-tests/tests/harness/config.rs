//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;

use chatmux_config::{Config, CorsConfig, ProviderConfig, ProviderType};
use indexmap::IndexMap;
use secrecy::SecretString;

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Minimal config with no providers and fast retries
    pub fn new() -> Self {
        let mut config = Config::default();
        config.server.listen_address = Some(SocketAddr::from(([127, 0, 0, 1], 0)));
        config.llm.providers = IndexMap::new();
        config.gate.rate_limit_rps = 1000.0;
        config.retry.initial_delay = "10ms".to_owned();
        config.retry.max_delay = "50ms".to_owned();
        config.retry.jitter_min = "0ms".to_owned();
        config.retry.jitter_max = "5ms".to_owned();

        Self { config }
    }

    fn with_provider(mut self, name: &str, provider_type: ProviderType, base_url: &str) -> Self {
        let mut provider = ProviderConfig::of_type(provider_type);
        provider.api_key = Some(SecretString::from("test-key"));
        provider.base_url = Some(base_url.parse().expect("valid URL"));

        if self.config.llm.providers.is_empty() {
            name.clone_into(&mut self.config.llm.default_provider);
        }
        self.config.llm.providers.insert(name.to_owned(), provider);
        self
    }

    /// Add a Grok provider pointed at a fake upstream; the first one added is the default
    pub fn with_grok(self, name: &str, base_url: &str) -> Self {
        self.with_provider(name, ProviderType::Grok, base_url)
    }

    /// Add an `OpenRouter` provider pointed at a fake upstream
    pub fn with_openrouter(self, name: &str, base_url: &str) -> Self {
        self.with_provider(name, ProviderType::Openrouter, base_url)
    }

    pub fn with_concurrency(mut self, max_concurrency: usize, queue_limit: usize) -> Self {
        self.config.gate.max_concurrency = max_concurrency;
        self.config.gate.queue_limit = queue_limit;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.config.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_access_token(mut self, token: &str) -> Self {
        self.config.server.access_token = Some(SecretString::from(token));
        self
    }

    pub fn with_cors(mut self, config: CorsConfig) -> Self {
        self.config.server.cors = Some(config);
        self
    }

    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
