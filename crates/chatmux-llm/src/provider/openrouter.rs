//! `OpenRouter` chat completions with context truncation

use std::sync::Arc;

use async_trait::async_trait;
use chatmux_config::{ProviderConfig, ProviderType};
use http::header::{HeaderName, HeaderValue};
use reqwest::Client;
use url::Url;

use super::compatible::{bearer_headers, chat_body, completions_url, parse_chunk, parse_response, prepared_messages};
use super::{AdapterSettings, Provider, ProviderCapabilities, RawResponse, UpstreamCall};
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::error::LlmError;
use crate::protocol::openai::OpenAiMessage;
use crate::stream::StreamState;
use crate::types::{CanonicalEvent, CanonicalRequest, Message, Role};

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Estimated prompt tokens allowed before older history is dropped
pub const TOKEN_BUDGET: usize = 1_000_000;

/// Serialized characters per estimated token
const CHARS_PER_TOKEN: usize = 4;

const APP_NAME: &str = "chatmux";

const REFERER_HEADER: HeaderName = HeaderName::from_static("http-referer");
const TITLE_HEADER: HeaderName = HeaderName::from_static("x-title");

const SKY: &str = "sonoma/sky";
const DUSK: &str = "sonoma/dusk";

/// Upstream model for a requested name
fn upstream_model(requested: &str) -> &'static str {
    if requested.to_ascii_lowercase().contains("sonoma-dusk") {
        DUSK
    } else {
        SKY
    }
}

fn estimated_tokens(message: &Message) -> usize {
    serde_json::to_string(&OpenAiMessage::from(message)).map_or(0, |s| s.chars().count()) / CHARS_PER_TOKEN
}

/// Drop the oldest non-system messages until the estimate fits `budget`
///
/// System messages and the newest message are always kept. Returns whether
/// anything was dropped.
pub fn truncate_to_budget(messages: Vec<Message>, budget: usize) -> (Vec<Message>, bool) {
    let sizes: Vec<usize> = messages.iter().map(estimated_tokens).collect();
    let mut total: usize = sizes.iter().sum();

    if total <= budget {
        return (messages, false);
    }

    let last = messages.len().saturating_sub(1);
    let mut keep = vec![true; messages.len()];

    for (index, message) in messages.iter().enumerate() {
        if total <= budget {
            break;
        }
        if message.role == Role::System || index == last {
            continue;
        }
        keep[index] = false;
        total -= sizes[index];
    }

    let kept: Vec<Message> = messages
        .into_iter()
        .zip(keep)
        .filter_map(|(message, keep)| keep.then_some(message))
        .collect();

    (kept, true)
}

/// Chat-completions adapter that trims history to a large fixed budget
pub struct OpenRouterProvider {
    name: String,
    client: Client,
    endpoint: Option<Url>,
    credentials: Arc<dyn CredentialProvider>,
    settings: AdapterSettings,
    token_budget: usize,
}

impl OpenRouterProvider {
    pub fn new(name: String, config: &ProviderConfig, settings: AdapterSettings, client: Client) -> Self {
        Self {
            name,
            client,
            endpoint: completions_url(config.base_url.as_ref(), DEFAULT_BASE_URL),
            credentials: Arc::new(StaticCredentials::new(config.api_key.clone())),
            settings,
            token_budget: TOKEN_BUDGET,
        }
    }

    /// Override the truncation budget
    #[must_use]
    pub const fn with_token_budget(mut self, budget: usize) -> Self {
        self.token_budget = budget;
        self
    }
}

#[async_trait]
impl Provider for OpenRouterProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Openrouter
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tool_calling: true,
            images: true,
            reasoning: true,
        }
    }

    fn models(&self) -> Vec<String> {
        vec![SKY.to_owned(), DUSK.to_owned()]
    }

    fn build_upstream_call(&self, request: &CanonicalRequest) -> Result<UpstreamCall, LlmError> {
        let url = self
            .endpoint
            .clone()
            .ok_or_else(|| LlmError::Internal(anyhow::anyhow!("invalid base URL for provider '{}'", self.name)))?;

        let mut headers = bearer_headers(self.credentials.as_ref(), &self.name, request.stream)?;
        headers.insert(REFERER_HEADER, HeaderValue::from_static(APP_NAME));
        headers.insert(TITLE_HEADER, HeaderValue::from_static(APP_NAME));

        let (messages, truncated) = truncate_to_budget(prepared_messages(request, &self.settings), self.token_budget);
        if truncated {
            tracing::info!(
                provider = %self.name,
                kept = messages.len(),
                budget = self.token_budget,
                "truncated conversation history"
            );
        }

        let body = chat_body(request, upstream_model(&request.model).to_owned(), &messages);

        Ok(UpstreamCall {
            url,
            headers,
            body: serde_json::to_value(&body).map_err(|e| LlmError::Internal(e.into()))?,
            stream: request.stream,
            truncated,
        })
    }

    async fn invoke(&self, call: &UpstreamCall) -> Result<RawResponse, LlmError> {
        super::send(&self.client, &self.name, call).await
    }

    fn parse_complete_response(&self, body: &[u8], state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError> {
        parse_response(body, state)
    }

    fn parse_stream_fragment(&self, fragment: &str, state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError> {
        parse_chunk(fragment, state)
    }
}
