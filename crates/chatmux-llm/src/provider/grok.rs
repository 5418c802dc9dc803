//! xAI Grok chat completions

use std::sync::Arc;

use async_trait::async_trait;
use chatmux_config::{ProviderConfig, ProviderType};
use reqwest::Client;
use url::Url;

use super::compatible::{bearer_headers, chat_body, completions_url, parse_chunk, parse_response, prepared_messages};
use super::{AdapterSettings, Provider, ProviderCapabilities, RawResponse, UpstreamCall};
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::error::LlmError;
use crate::stream::StreamState;
use crate::types::{CanonicalEvent, CanonicalRequest};

const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";

/// Upstream model every request is sent to
const MODEL: &str = "grok-beta";

/// Near-passthrough adapter; Grok already speaks the chunk schema
pub struct GrokProvider {
    name: String,
    client: Client,
    endpoint: Option<Url>,
    credentials: Arc<dyn CredentialProvider>,
    settings: AdapterSettings,
}

impl GrokProvider {
    pub fn new(name: String, config: &ProviderConfig, settings: AdapterSettings, client: Client) -> Self {
        Self {
            name,
            client,
            endpoint: completions_url(config.base_url.as_ref(), DEFAULT_BASE_URL),
            credentials: Arc::new(StaticCredentials::new(config.api_key.clone())),
            settings,
        }
    }
}

#[async_trait]
impl Provider for GrokProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Grok
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tool_calling: true,
            images: true,
            reasoning: true,
        }
    }

    fn models(&self) -> Vec<String> {
        vec![MODEL.to_owned()]
    }

    fn build_upstream_call(&self, request: &CanonicalRequest) -> Result<UpstreamCall, LlmError> {
        let url = self
            .endpoint
            .clone()
            .ok_or_else(|| LlmError::Internal(anyhow::anyhow!("invalid base URL for provider '{}'", self.name)))?;

        let headers = bearer_headers(self.credentials.as_ref(), &self.name, request.stream)?;
        let messages = prepared_messages(request, &self.settings);
        let body = chat_body(request, MODEL.to_owned(), &messages);

        Ok(UpstreamCall {
            url,
            headers,
            body: serde_json::to_value(&body).map_err(|e| LlmError::Internal(e.into()))?,
            stream: request.stream,
            truncated: false,
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

#[cfg(test)]
mod tests {
    use secrecy::SecretString;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::stream::{collect, translate};
    use crate::types::{FinishReason, Message, Role, ToolCall, Usage};

    fn provider(server: &MockServer, api_key: Option<&str>) -> GrokProvider {
        let mut config = ProviderConfig::of_type(ProviderType::Grok);
        config.base_url = Some(Url::parse(&format!("{}/v1", server.uri())).unwrap());
        config.api_key = api_key.map(SecretString::from);

        GrokProvider::new("grok".to_owned(), &config, AdapterSettings::default(), Client::new())
    }

    fn request(stream: bool) -> CanonicalRequest {
        let mut request = CanonicalRequest::new("grok", "anything", vec![Message::text(Role::User, "hi")]);
        request.stream = stream;
        request
    }

    #[tokio::test]
    async fn forces_model_and_injects_base_prompt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer xai-key"))
            .and(body_partial_json(json!({"model": "grok-beta", "temperature": 0.7, "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "x", "object": "chat.completion", "created": 1, "model": "grok-beta",
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "hello"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1, "total_tokens": 4}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server, Some("xai-key")));
        let call = provider.build_upstream_call(&request(false)).unwrap();
        assert_eq!(call.body["messages"][0]["role"], "system");
        assert_eq!(call.body["messages"][1]["content"], "hi");

        let raw = provider.invoke(&call).await.unwrap();
        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(aggregate.content, "hello");
        assert_eq!(aggregate.finish_reason, Some(FinishReason::Stop));
        assert_eq!(aggregate.usage, Some(Usage::new(3, 1, Some(4))));
    }

    #[tokio::test]
    async fn streams_tool_calls() {
        let sse = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"look\",\"arguments\":\"{\\\"a\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"1}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: [DONE]\n\n",
        );

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server, Some("xai-key")));
        let call = provider.build_upstream_call(&request(true)).unwrap();
        let raw = provider.invoke(&call).await.unwrap();
        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(
            aggregate.tool_calls,
            vec![ToolCall {
                id: "call_1".to_owned(),
                name: "look".to_owned(),
                arguments: "{\"a\":1}".to_owned(),
            }]
        );
        assert_eq!(aggregate.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(aggregate.usage, None);
    }

    #[tokio::test]
    async fn missing_api_key_is_unauthenticated() {
        let server = MockServer::start().await;
        let error = provider(&server, Some("")).build_upstream_call(&request(false)).unwrap_err();
        assert!(matches!(error, LlmError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn server_error_is_not_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream overloaded"))
            .mount(&server)
            .await;

        let provider = provider(&server, Some("xai-key"));
        let call = provider.build_upstream_call(&request(false)).unwrap();
        let error = provider.invoke(&call).await.unwrap_err();

        assert!(matches!(error, LlmError::UpstreamStatus { status: 503, .. }));
    }
}
