//! ChatGPT session backend (codex responses API)

use std::sync::Arc;

use async_trait::async_trait;
use chatmux_config::{ProviderConfig, ProviderType};
use http::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;
use url::Url;

use super::{AdapterSettings, Provider, ProviderCapabilities, RawResponse, UpstreamCall, header_value};
use crate::convert::responses::{event_to_events, to_input, to_tools};
use crate::credentials::{AuthFileCredentials, CredentialProvider};
use crate::error::LlmError;
use crate::normalize::{build_reasoning_param, extract_reasoning_from_model_name, normalize_model_name};
use crate::protocol::responses::{ResponsesEvent, ResponsesRequest};
use crate::stream::StreamState;
use crate::types::{CanonicalEvent, CanonicalRequest};

const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api";

const ACCOUNT_ID_HEADER: HeaderName = HeaderName::from_static("chatgpt-account-id");
const BETA_HEADER: HeaderName = HeaderName::from_static("openai-beta");
const SESSION_HEADER: HeaderName = HeaderName::from_static("session_id");

const EFFORT_VARIANTS: &[&str] = &["high", "medium", "low", "minimal"];

/// Upstream that authenticates with a signed-in ChatGPT session
pub struct SessionProvider {
    name: String,
    client: Client,
    endpoint: Option<Url>,
    credentials: Arc<dyn CredentialProvider>,
    settings: AdapterSettings,
}

impl SessionProvider {
    pub fn new(name: String, config: &ProviderConfig, settings: AdapterSettings, client: Client) -> Self {
        let credentials: Arc<dyn CredentialProvider> = match &config.auth_path {
            Some(path) => Arc::new(AuthFileCredentials::with_path(path.clone())),
            None => Arc::new(AuthFileCredentials::new()),
        };

        let base = config.base_url.as_ref().map_or(DEFAULT_BASE_URL, Url::as_str);
        let endpoint = Url::parse(&format!("{}/codex/responses", base.trim_end_matches('/'))).ok();

        Self {
            name,
            client,
            endpoint,
            credentials,
            settings,
        }
    }

    /// Replace the credential source
    #[must_use]
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    fn headers(&self, session_id: &str) -> Result<HeaderMap, LlmError> {
        let bearer = self.credentials.get_bearer(&self.name)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", bearer.token.expose_secret()), true)?,
        );
        if let Some(account_id) = &bearer.account_id {
            headers.insert(ACCOUNT_ID_HEADER, header_value(account_id, false)?);
        }
        headers.insert(BETA_HEADER, HeaderValue::from_static("responses=experimental"));
        headers.insert(SESSION_HEADER, header_value(session_id, false)?);
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));

        Ok(headers)
    }
}

#[async_trait]
impl Provider for SessionProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Session
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tool_calling: true,
            images: true,
            reasoning: true,
        }
    }

    fn models(&self) -> Vec<String> {
        let mut models = vec!["gpt-5".to_owned()];
        if self.settings.expose_reasoning_models {
            models.extend(EFFORT_VARIANTS.iter().map(|effort| format!("gpt-5-{effort}")));
        }
        models
    }

    fn build_upstream_call(&self, request: &CanonicalRequest) -> Result<UpstreamCall, LlmError> {
        let url = self
            .endpoint
            .clone()
            .ok_or_else(|| LlmError::Internal(anyhow::anyhow!("invalid base URL for provider '{}'", self.name)))?;

        let session_id = request
            .session_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let headers = self.headers(&session_id)?;

        let model = normalize_model_name(
            Some(&request.model),
            self.settings.debug_model.as_deref(),
            &self.settings.default_model,
        );

        let overrides = request
            .reasoning
            .clone()
            .or_else(|| extract_reasoning_from_model_name(&request.model));
        let reasoning = build_reasoning_param(&self.settings.reasoning, overrides.as_ref());

        let body = ResponsesRequest {
            model,
            instructions: self.settings.instructions.to_string(),
            input: to_input(&request.messages),
            tools: to_tools(&request.tools),
            tool_choice: request
                .tool_choice
                .clone()
                .unwrap_or_else(|| Value::String("auto".to_owned())),
            parallel_tool_calls: request.parallel_tool_calls,
            store: false,
            stream: true,
            prompt_cache_key: session_id,
            reasoning: Some(reasoning),
            include: vec!["reasoning.encrypted_content".to_owned()],
        };

        let body = serde_json::to_value(&body).map_err(|e| LlmError::Internal(e.into()))?;

        Ok(UpstreamCall {
            url,
            headers,
            body,
            stream: true,
            truncated: false,
        })
    }

    async fn invoke(&self, call: &UpstreamCall) -> Result<RawResponse, LlmError> {
        super::send(&self.client, &self.name, call).await
    }

    fn parse_complete_response(&self, body: &[u8], state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError> {
        let text = std::str::from_utf8(body).map_err(|e| LlmError::UpstreamProtocol(e.to_string()))?;

        let mut events = Vec::new();
        for data in text.lines().filter_map(|line| line.strip_prefix("data:")) {
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }
            events.extend(self.parse_stream_fragment(data, state)?);
        }
        Ok(events)
    }

    fn parse_stream_fragment(&self, fragment: &str, state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError> {
        let event: ResponsesEvent = serde_json::from_str(fragment)
            .map_err(|e| LlmError::UpstreamProtocol(format!("invalid responses event: {e}")))?;

        Ok(event_to_events(&event, self.settings.reasoning.compat, state))
    }
}

#[cfg(test)]
mod tests {
    use chatmux_config::{ReasoningCompat, ReasoningConfig};
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::stream::{collect, translate};
    use crate::types::{FinishReason, Message, ReasoningOverride, Role, ToolDefinition};

    fn provider(server: &MockServer, compat: ReasoningCompat) -> SessionProvider {
        let mut config = ProviderConfig::of_type(ProviderType::Session);
        config.base_url = Some(Url::parse(&format!("{}/backend-api", server.uri())).unwrap());

        let settings = AdapterSettings {
            reasoning: ReasoningConfig {
                compat,
                ..ReasoningConfig::default()
            },
            ..AdapterSettings::default()
        };

        SessionProvider::new("chatgpt".to_owned(), &config, settings, Client::new())
            .with_credentials(Arc::new(StaticCredentials::new(Some(SecretString::from("session-token")))))
    }

    fn request(model: &str) -> CanonicalRequest {
        CanonicalRequest::new(
            "chatgpt",
            model,
            vec![Message::text(Role::System, "be terse"), Message::text(Role::User, "hi")],
        )
    }

    const SSE: &str = concat!(
        "data: {\"type\":\"response.reasoning_summary_part.added\"}\n\n",
        "data: {\"type\":\"response.reasoning_summary_text.delta\",\"delta\":\"thinking\"}\n\n",
        "data: {\"type\":\"response.output_text.delta\",\"delta\":\"Hello\"}\n\n",
        "data: {\"type\":\"response.completed\",\"response\":{\"usage\":{\"input_tokens\":5,\"output_tokens\":2,\"total_tokens\":7}}}\n\n",
    );

    #[test]
    fn builds_responses_body() {
        let server_uri = "http://127.0.0.1:9";
        let mut config = ProviderConfig::of_type(ProviderType::Session);
        config.base_url = Some(Url::parse(server_uri).unwrap());
        let provider = SessionProvider::new("chatgpt".to_owned(), &config, AdapterSettings::default(), Client::new())
            .with_credentials(Arc::new(StaticCredentials::new(Some(SecretString::from("t")))));

        let mut request = request("gpt-5-high");
        request.session_id = Some("sess-1".to_owned());
        request.tools.push(ToolDefinition {
            name: "look".to_owned(),
            description: Some("look around".to_owned()),
            parameters: None,
        });

        let call = provider.build_upstream_call(&request).unwrap();

        assert_eq!(call.url.as_str(), "http://127.0.0.1:9/codex/responses");
        assert!(call.stream);
        assert_eq!(call.headers.get("session_id").unwrap(), "sess-1");
        assert_eq!(call.headers.get("openai-beta").unwrap(), "responses=experimental");
        assert_eq!(call.body["model"], "gpt-5");
        assert_eq!(call.body["store"], false);
        assert_eq!(call.body["prompt_cache_key"], "sess-1");
        assert_eq!(call.body["tool_choice"], "auto");
        assert_eq!(call.body["reasoning"], json!({"effort": "high", "summary": "auto"}));
        assert_eq!(call.body["input"][0]["content"][0]["text"], "be terse");
        assert_eq!(call.body["tools"][0]["name"], "look");
        assert_eq!(call.body["include"], json!(["reasoning.encrypted_content"]));
    }

    #[test]
    fn summary_none_is_dropped_from_reasoning() {
        let provider = SessionProvider::new(
            "chatgpt".to_owned(),
            &ProviderConfig::of_type(ProviderType::Session),
            AdapterSettings::default(),
            Client::new(),
        )
        .with_credentials(Arc::new(StaticCredentials::new(Some(SecretString::from("t")))));

        let mut request = request("gpt-5");
        request.reasoning = Some(ReasoningOverride {
            effort: Some("low".to_owned()),
            summary: Some("none".to_owned()),
        });

        let call = provider.build_upstream_call(&request).unwrap();
        assert_eq!(call.body["reasoning"], json!({"effort": "low"}));
    }

    #[test]
    fn fresh_session_id_without_client_one() {
        let provider = SessionProvider::new(
            "chatgpt".to_owned(),
            &ProviderConfig::of_type(ProviderType::Session),
            AdapterSettings::default(),
            Client::new(),
        )
        .with_credentials(Arc::new(StaticCredentials::new(Some(SecretString::from("t")))));

        let call = provider.build_upstream_call(&request("gpt-5")).unwrap();
        let key = call.body["prompt_cache_key"].as_str().unwrap();

        assert!(uuid::Uuid::parse_str(key).is_ok());
        assert_eq!(call.headers.get("session_id").unwrap(), key);
    }

    #[test]
    fn missing_session_is_unauthenticated() {
        let provider = SessionProvider::new(
            "chatgpt".to_owned(),
            &ProviderConfig::of_type(ProviderType::Session),
            AdapterSettings::default(),
            Client::new(),
        )
        .with_credentials(Arc::new(StaticCredentials::new(None)));

        let error = provider.build_upstream_call(&request("gpt-5")).unwrap_err();
        assert!(matches!(error, LlmError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn streams_inline_think_block() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/backend-api/codex/responses"))
            .and(header("authorization", "Bearer session-token"))
            .and(body_partial_json(json!({"stream": true, "store": false})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(SSE),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server, ReasoningCompat::ThinkTags));
        let call = provider.build_upstream_call(&request("gpt-5")).unwrap();
        let raw = provider.invoke(&call).await.unwrap();

        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(aggregate.content, "<think>thinking</think>Hello");
        assert_eq!(aggregate.reasoning, "");
        assert_eq!(aggregate.finish_reason, Some(FinishReason::Stop));
        assert_eq!(aggregate.usage.map(|u| u.total_tokens), Some(7));
    }

    #[tokio::test]
    async fn streams_separate_reasoning() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(SSE),
            )
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server, ReasoningCompat::O3));
        let call = provider.build_upstream_call(&request("gpt-5")).unwrap();
        let raw = provider.invoke(&call).await.unwrap();

        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(aggregate.content, "Hello");
        assert_eq!(aggregate.reasoning, "thinking");
    }

    #[tokio::test]
    async fn rate_limit_is_surfaced_for_retry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
            .mount(&server)
            .await;

        let provider = provider(&server, ReasoningCompat::O3);
        let call = provider.build_upstream_call(&request("gpt-5")).unwrap();
        let error = provider.invoke(&call).await.unwrap_err();

        assert!(matches!(error, LlmError::UpstreamRateLimited { retry_after: Some(_) }));
    }

    #[test]
    fn reasoning_variants_listed_when_exposed() {
        let settings = AdapterSettings {
            expose_reasoning_models: true,
            ..AdapterSettings::default()
        };
        let provider = SessionProvider::new(
            "chatgpt".to_owned(),
            &ProviderConfig::of_type(ProviderType::Session),
            settings,
            Client::new(),
        );

        assert_eq!(
            provider.models(),
            vec!["gpt-5", "gpt-5-high", "gpt-5-medium", "gpt-5-low", "gpt-5-minimal"]
        );
    }
}
