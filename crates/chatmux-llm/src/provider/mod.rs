//! Provider trait and implementations for upstream backends

mod compatible;
pub mod grok;
pub mod openrouter;
pub mod qwen;
pub mod session;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chatmux_config::{LlmConfig, ProviderType, ReasoningConfig};
use eventsource_stream::{EventStreamError, Eventsource};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use http::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use indexmap::IndexMap;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use url::Url;

use crate::error::LlmError;
use crate::sanitize::sanitize_log_message;
use crate::stream::StreamState;
use crate::types::{CanonicalEvent, CanonicalRequest};

pub use grok::GrokProvider;
pub use openrouter::OpenRouterProvider;
pub use qwen::QwenProvider;
pub use session::SessionProvider;

/// Instructions used when no base instructions file is configured
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant. Answer accurately and concisely.";

/// Upper bound for one upstream exchange, streaming included
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(600);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest upstream error body echoed back to clients
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Capabilities advertised by a provider
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderCapabilities {
    /// Whether the provider accepts tool definitions
    pub tool_calling: bool,
    /// Whether image parts are forwarded
    pub images: bool,
    /// Whether the upstream produces reasoning text
    pub reasoning: bool,
}

/// Fully built upstream request, exclusively owned by one request
#[derive(Debug, Clone)]
pub struct UpstreamCall {
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Value,
    /// Read the reply as server-sent events
    pub stream: bool,
    /// Older messages were dropped to fit the context budget
    pub truncated: bool,
}

/// Raw upstream fragments, one SSE `data` payload each
pub type FragmentStream = BoxStream<'static, Result<String, LlmError>>;

/// Upstream reply before translation
pub enum RawResponse {
    Complete(Bytes),
    Stream(FragmentStream),
}

impl fmt::Debug for RawResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(body) => f.debug_tuple("Complete").field(&body.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

/// Trait implemented by each upstream adapter
#[async_trait]
pub trait Provider: Send + Sync {
    /// Configured provider name
    fn name(&self) -> &str;

    fn kind(&self) -> ProviderType;

    /// Advertised capabilities
    fn capabilities(&self) -> ProviderCapabilities;

    /// Model ids listed by `GET /v1/models`
    fn models(&self) -> Vec<String>;

    /// Map a canonical request to the upstream wire request
    ///
    /// Pure apart from credential lookup; fails with `UnsupportedFeature`
    /// for capabilities the backend cannot express.
    fn build_upstream_call(&self, request: &CanonicalRequest) -> Result<UpstreamCall, LlmError>;

    /// Perform the network call
    async fn invoke(&self, call: &UpstreamCall) -> Result<RawResponse, LlmError>;

    /// Parse a whole non-streaming body into a `Done`-terminated batch
    fn parse_complete_response(&self, body: &[u8], state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError>;

    /// Parse one streamed fragment, updating the request's state
    fn parse_stream_fragment(&self, fragment: &str, state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError>;
}

/// Settings shared by every adapter
#[derive(Debug, Clone)]
pub struct AdapterSettings {
    /// Base instructions text
    pub instructions: Arc<str>,
    pub inject_base_prompt: bool,
    pub reasoning: ReasoningConfig,
    pub default_model: String,
    pub debug_model: Option<String>,
    pub expose_reasoning_models: bool,
}

impl AdapterSettings {
    /// Read the base instructions file, if any
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let instructions = match &config.base_instructions_path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    LlmError::Internal(anyhow::anyhow!(
                        "failed to read base instructions from {}: {e}",
                        path.display()
                    ))
                })?;

                if text.trim().is_empty() {
                    return Err(LlmError::Internal(anyhow::anyhow!(
                        "base instructions file {} is empty",
                        path.display()
                    )));
                }
                text
            }
            None => DEFAULT_INSTRUCTIONS.to_owned(),
        };

        Ok(Self {
            instructions: Arc::from(instructions),
            inject_base_prompt: config.inject_base_prompt,
            reasoning: config.reasoning,
            default_model: config.default_model.clone(),
            debug_model: config.debug_model.clone().filter(|m| !m.trim().is_empty()),
            expose_reasoning_models: config.expose_reasoning_models,
        })
    }
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            instructions: Arc::from(DEFAULT_INSTRUCTIONS),
            inject_base_prompt: true,
            reasoning: ReasoningConfig::default(),
            default_model: "gpt-5".to_owned(),
            debug_model: None,
            expose_reasoning_models: false,
        }
    }
}

/// Adapters keyed by configured name, fixed after startup
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers.keys().collect::<Vec<_>>())
            .field("default_provider", &self.default_provider)
            .finish()
    }
}

impl ProviderRegistry {
    /// Build one adapter per configured provider
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let settings = AdapterSettings::from_config(config)?;
        let client = http_client()?;

        let providers = config
            .providers
            .iter()
            .map(|(name, provider)| {
                let adapter: Arc<dyn Provider> = match provider.provider_type {
                    ProviderType::Session => {
                        Arc::new(SessionProvider::new(name.clone(), provider, settings.clone(), client.clone()))
                    }
                    ProviderType::Grok => {
                        Arc::new(GrokProvider::new(name.clone(), provider, settings.clone(), client.clone()))
                    }
                    ProviderType::Openrouter => {
                        Arc::new(OpenRouterProvider::new(name.clone(), provider, settings.clone(), client.clone()))
                    }
                    ProviderType::Qwen => {
                        Arc::new(QwenProvider::new(name.clone(), provider, settings.clone(), client.clone())?)
                    }
                };

                tracing::debug!(provider = %name, kind = %provider.provider_type, "registered provider");
                Ok((name.clone(), adapter))
            })
            .collect::<Result<IndexMap<_, _>, LlmError>>()?;

        Ok(Self::new(providers, config.default_provider.clone()))
    }

    /// Registry over already built adapters
    pub fn new(providers: IndexMap<String, Arc<dyn Provider>>, default_provider: String) -> Self {
        Self {
            providers,
            default_provider,
        }
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Adapter by name, the default provider when `None`
    pub fn get(&self, name: Option<&str>) -> Result<Arc<dyn Provider>, LlmError> {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.default_provider);

        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::ProviderNotFound {
                provider: name.to_owned(),
                available: self.providers.keys().cloned().collect::<Vec<_>>().join(", "),
            })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.values()
    }
}

/// HTTP client shared by all adapters
pub fn http_client() -> Result<Client, LlmError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(UPSTREAM_TIMEOUT)
        .build()
        .map_err(|e| LlmError::Internal(anyhow::anyhow!("failed to build HTTP client: {e}")))
}

/// Header value, marked sensitive when it carries a credential
pub(crate) fn header_value(value: &str, sensitive: bool) -> Result<HeaderValue, LlmError> {
    let mut header = HeaderValue::from_str(value)
        .map_err(|_| LlmError::InvalidRequest("value not allowed in an HTTP header".to_owned()))?;
    header.set_sensitive(sensitive);
    Ok(header)
}

/// Delay requested by a `Retry-After` header, in seconds
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    let seconds: f64 = raw.parse().ok()?;
    Duration::try_from_secs_f64(seconds).ok()
}

/// Human-readable message from an upstream error body
fn upstream_message(body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    let from_json = parsed.as_ref().and_then(|value| {
        value
            .pointer("/error/message")
            .or_else(|| value.get("error").filter(|e| e.is_string()))
            .or_else(|| value.get("detail"))
            .or_else(|| value.get("message"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    });

    let message = from_json.unwrap_or_else(|| body.chars().take(MAX_ERROR_BODY_CHARS).collect());
    sanitize_log_message(message.trim())
}

/// Send a built call and classify the reply
///
/// A 429 becomes `UpstreamRateLimited` for the retry loop; any other
/// non-success status is surfaced as `UpstreamStatus` without retry.
pub(crate) async fn send(client: &Client, provider: &str, call: &UpstreamCall) -> Result<RawResponse, LlmError> {
    let response = client
        .post(call.url.clone())
        .headers(call.headers.clone())
        .json(&call.body)
        .send()
        .await
        .map_err(|e| {
            tracing::error!(provider = %provider, error = %e, "upstream request failed");
            LlmError::transport(&e)
        })?;

    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = parse_retry_after(response.headers());
        tracing::warn!(provider = %provider, retry_after = ?retry_after, "upstream rate limited");
        return Err(LlmError::UpstreamRateLimited { retry_after });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(
            provider = %provider,
            status = %status,
            body = %sanitize_log_message(&body),
            "upstream returned error"
        );
        return Err(LlmError::UpstreamStatus {
            status: status.as_u16(),
            message: upstream_message(&body),
        });
    }

    if call.stream {
        let fragments = response
            .bytes_stream()
            .eventsource()
            .map(|result| match result {
                Ok(event) => Ok(event.data),
                Err(EventStreamError::Transport(e)) => Err(LlmError::transport(&e)),
                Err(e) => Err(LlmError::UpstreamProtocol(e.to_string())),
            })
            .boxed();

        return Ok(RawResponse::Stream(fragments));
    }

    let body = response.bytes().await.map_err(|e| LlmError::transport(&e))?;
    Ok(RawResponse::Complete(body))
}
