//! Qwen web chat API

use std::sync::Arc;

use async_trait::async_trait;
use chatmux_config::{ProviderConfig, ProviderType};
use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, COOKIE, HeaderMap, HeaderName, HeaderValue, ORIGIN, REFERER};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use url::Url;
use uuid::Uuid;

use super::{AdapterSettings, Provider, ProviderCapabilities, RawResponse, UpstreamCall, header_value};
use crate::convert::openai::with_base_instructions;
use crate::credentials::{CredentialProvider, StaticCredentials};
use crate::error::LlmError;
use crate::protocol::openai::OpenAiMessage;
use crate::protocol::qwen::{QwenDelta, QwenFragment, QwenRequest};
use crate::stream::StreamState;
use crate::types::{CanonicalEvent, CanonicalRequest, ErrorKind, FinishReason, Usage};

const DEFAULT_ENDPOINT: &str = "https://chat.qwen.ai/api/v2/chat/completions";
const WEB_ORIGIN: &str = "https://chat.qwen.ai";
const DEFAULT_CHAT_ID: &str = "25e701db-821b-4299-b6b7-8306cbe40eb4";
const DEFAULT_MODEL: &str = "qwen3-max-preview";

const BX_VERSION_HEADER: HeaderName = HeaderName::from_static("bx-v");
const SOURCE_HEADER: HeaderName = HeaderName::from_static("source");
const VERSION_HEADER: HeaderName = HeaderName::from_static("version");
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

const THINK_PHASE: &str = "think";
const FINISHED: &str = "finished";

fn parse_chat_id(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}

/// Adapter for the Qwen web chat backend
///
/// Authenticates with a bearer token and the browser's cookie header.
/// Its fragments are re-parsed in full: reasoning arrives as a `think`
/// phase and tool calls carry an explicit index.
pub struct QwenProvider {
    name: String,
    client: Client,
    endpoint: Url,
    credentials: Arc<dyn CredentialProvider>,
    cookies: Option<SecretString>,
    model: String,
    chat_id: Uuid,
    settings: AdapterSettings,
}

impl QwenProvider {
    pub fn new(
        name: String,
        config: &ProviderConfig,
        settings: AdapterSettings,
        client: Client,
    ) -> Result<Self, LlmError> {
        let endpoint = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(DEFAULT_ENDPOINT).map_err(|e| LlmError::Internal(e.into()))?,
        };

        let chat_id = match &config.chat_id {
            Some(id) => parse_chat_id(id).ok_or_else(|| {
                LlmError::Internal(anyhow::anyhow!("chat_id of provider '{name}' is not a UUID"))
            })?,
            None => parse_chat_id(DEFAULT_CHAT_ID)
                .ok_or_else(|| LlmError::Internal(anyhow::anyhow!("invalid default chat id")))?,
        };

        Ok(Self {
            client,
            endpoint,
            credentials: Arc::new(StaticCredentials::new(config.api_key.clone())),
            cookies: config
                .cookies
                .clone()
                .filter(|c| !c.expose_secret().trim().is_empty()),
            model: config
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_owned()),
            chat_id,
            settings,
            name,
        })
    }

    fn headers(&self, chat_id: &Uuid) -> Result<HeaderMap, LlmError> {
        let bearer = self.credentials.get_bearer(&self.name)?;
        let Some(cookies) = &self.cookies else {
            return Err(LlmError::Unauthenticated(format!(
                "missing cookies for provider '{}'",
                self.name
            )));
        };

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            header_value(&format!("Bearer {}", bearer.token.expose_secret()), true)?,
        );
        headers.insert(COOKIE, header_value(cookies.expose_secret(), true)?);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json; charset=UTF-8"));
        headers.insert(REFERER, header_value(&format!("{WEB_ORIGIN}/c/{chat_id}"), false)?);
        headers.insert(ORIGIN, HeaderValue::from_static(WEB_ORIGIN));
        headers.insert(BX_VERSION_HEADER, HeaderValue::from_static("2.5.31"));
        headers.insert(SOURCE_HEADER, HeaderValue::from_static("web"));
        headers.insert(VERSION_HEADER, HeaderValue::from_static("0.0.209"));
        headers.insert(REQUEST_ID_HEADER, header_value(&Uuid::new_v4().to_string(), false)?);

        Ok(headers)
    }

    /// Canonical events of one choice payload
    fn delta_events(delta: &QwenDelta, events: &mut Vec<CanonicalEvent>) {
        if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
            if delta.phase.as_deref() == Some(THINK_PHASE) {
                events.push(CanonicalEvent::reasoning(text));
            } else {
                events.push(CanonicalEvent::content(text));
            }
        }

        for call in &delta.tool_calls {
            let function = call.function.as_ref();
            events.push(CanonicalEvent::ToolCallDelta {
                index: call.index,
                id: call.id.clone(),
                name: call.name.clone().or_else(|| function.and_then(|f| f.name.clone())),
                arguments: call
                    .arguments
                    .clone()
                    .or_else(|| function.and_then(|f| f.arguments.clone())),
            });
        }
    }

    /// Close the response unless the fragment already did
    ///
    /// Tool-call deltas in `events` are not folded into `state` yet, so they
    /// count toward the `tool_calls` default here.
    fn push_completion(state: &mut StreamState, events: &mut Vec<CanonicalEvent>) {
        if events.iter().any(CanonicalEvent::is_terminal) {
            return;
        }

        let has_calls = events
            .iter()
            .any(|e| matches!(e, CanonicalEvent::ToolCallDelta { .. }));
        if has_calls {
            state.record_finish(FinishReason::ToolCalls);
        }

        events.push(state.completion());
    }

    /// Translate one parsed fragment; returns whether it was the last one
    fn fragment_events(fragment: &QwenFragment, state: &mut StreamState, events: &mut Vec<CanonicalEvent>) -> bool {
        if let Some(error) = &fragment.error {
            events.push(CanonicalEvent::Error {
                kind: ErrorKind::UpstreamStatus,
                message: error
                    .message
                    .clone()
                    .or_else(|| error.code.clone())
                    .unwrap_or_else(|| "qwen reported an error".to_owned()),
            });
            return true;
        }

        if let Some(text) = fragment.content.as_deref().filter(|t| !t.is_empty()) {
            events.push(CanonicalEvent::content(text));
        }

        let mut finished = fragment.finished.unwrap_or(false);

        for choice in &fragment.choices {
            if let Some(delta) = choice.delta.as_ref().or(choice.message.as_ref()) {
                Self::delta_events(delta, events);

                // The think phase reports its own `finished` before the answer starts
                if delta.status.as_deref() == Some(FINISHED) && delta.phase.as_deref() != Some(THINK_PHASE) {
                    finished = true;
                }
            }

            if let Some(reason) = &choice.finish_reason {
                state.record_finish(FinishReason::parse(reason));
            }
        }

        if let Some(usage) = fragment.usage {
            state.record_usage(Usage::new(usage.input_tokens, usage.output_tokens, usage.total_tokens));
        }

        finished
    }
}

#[async_trait]
impl Provider for QwenProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ProviderType {
        ProviderType::Qwen
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            tool_calling: false,
            images: true,
            reasoning: true,
        }
    }

    fn models(&self) -> Vec<String> {
        vec![self.model.clone()]
    }

    fn build_upstream_call(&self, request: &CanonicalRequest) -> Result<UpstreamCall, LlmError> {
        if !request.tools.is_empty() {
            return Err(LlmError::UnsupportedFeature(format!(
                "tool definitions are not supported by provider '{}'",
                self.name
            )));
        }

        let chat_id = match request.chat_id.as_deref() {
            Some(id) => parse_chat_id(id).ok_or_else(|| LlmError::InvalidRequest("chat_id must be a UUID".to_owned()))?,
            None => self.chat_id,
        };

        let headers = self.headers(&chat_id)?;

        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("chat_id", &chat_id.to_string());

        let messages = with_base_instructions(
            &request.messages,
            &self.settings.instructions,
            self.settings.inject_base_prompt,
        );

        let body = QwenRequest {
            model: self.model.clone(),
            messages: messages.iter().map(OpenAiMessage::from).collect(),
            stream: request.stream,
            incremental_output: true,
            chat_mode: "normal".to_owned(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

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
        let fragment: QwenFragment =
            serde_json::from_slice(body).map_err(|e| LlmError::UpstreamProtocol(format!("invalid qwen response: {e}")))?;

        let mut events = Vec::new();
        Self::fragment_events(&fragment, state, &mut events);

        Self::push_completion(state, &mut events);
        Ok(events)
    }

    fn parse_stream_fragment(&self, fragment: &str, state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError> {
        let fragment: QwenFragment = serde_json::from_str(fragment)
            .map_err(|e| LlmError::UpstreamProtocol(format!("invalid qwen fragment: {e}")))?;

        let mut events = Vec::new();
        let finished = Self::fragment_events(&fragment, state, &mut events);

        if finished {
            Self::push_completion(state, &mut events);
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::stream::{collect, translate};
    use crate::types::{Message, Role, ToolCall, ToolDefinition};

    fn config(server: &MockServer, cookies: Option<&str>) -> ProviderConfig {
        let mut config = ProviderConfig::of_type(ProviderType::Qwen);
        config.base_url = Some(Url::parse(&format!("{}/api/v2/chat/completions", server.uri())).unwrap());
        config.api_key = Some(SecretString::from("qwen-token"));
        config.cookies = cookies.map(SecretString::from);
        config
    }

    fn provider(server: &MockServer) -> QwenProvider {
        QwenProvider::new(
            "qwen".to_owned(),
            &config(server, Some("ssxmod=1; token=abc")),
            AdapterSettings {
                inject_base_prompt: false,
                ..AdapterSettings::default()
            },
            Client::new(),
        )
        .unwrap()
    }

    fn request(stream: bool) -> CanonicalRequest {
        let mut request = CanonicalRequest::new("qwen", "qwen", vec![Message::text(Role::User, "hi")]);
        request.stream = stream;
        request
    }

    fn sse(fragments: &[serde_json::Value]) -> String {
        fragments.iter().map(|f| format!("data: {f}\n\n")).collect()
    }

    #[tokio::test]
    async fn streams_phases_and_indexed_tool_calls() {
        let body = sse(&[
            json!({"choices": [{"delta": {"phase": "think", "content": "hmm"}}]}),
            json!({"choices": [{"delta": {"phase": "think", "status": "finished", "content": ""}}]}),
            json!({"choices": [{"delta": {"phase": "answer", "content": "Hi"}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 1, "id": "t1", "name": "look", "arguments": "{\"q\":"}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 0, "id": "t0", "function": {"name": "find", "arguments": "{}"}}]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [{"index": 1, "arguments": "2}"}]}}]}),
            json!({"choices": [{"delta": {"phase": "answer", "status": "finished", "content": ""}}],
                   "usage": {"input_tokens": 4, "output_tokens": 6}}),
            json!({"choices": [{"delta": {"content": "after"}}]}),
        ]);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/chat/completions"))
            .and(query_param("chat_id", DEFAULT_CHAT_ID))
            .and(header("authorization", "Bearer qwen-token"))
            .and(header("cookie", "ssxmod=1; token=abc"))
            .and(header("source", "web"))
            .and(body_partial_json(
                json!({"model": "qwen3-max-preview", "incremental_output": true, "chat_mode": "normal", "stream": true}),
            ))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server));
        let call = provider.build_upstream_call(&request(true)).unwrap();
        let raw = provider.invoke(&call).await.unwrap();
        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(aggregate.reasoning, "hmm");
        assert_eq!(aggregate.content, "Hi");
        assert_eq!(
            aggregate.tool_calls,
            vec![
                ToolCall {
                    id: "t0".to_owned(),
                    name: "find".to_owned(),
                    arguments: "{}".to_owned(),
                },
                ToolCall {
                    id: "t1".to_owned(),
                    name: "look".to_owned(),
                    arguments: "{\"q\":2}".to_owned(),
                },
            ]
        );
        assert_eq!(aggregate.finish_reason, Some(FinishReason::ToolCalls));
        assert_eq!(aggregate.usage, Some(Usage::new(4, 6, None)));
    }

    #[tokio::test]
    async fn tool_call_in_the_finishing_fragment() {
        let body = sse(&[json!({"choices": [{"delta": {
            "phase": "answer",
            "status": "finished",
            "tool_calls": [{"index": 0, "id": "t0", "name": "look", "arguments": "{}"}]
        }}]})]);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server));
        let call = provider.build_upstream_call(&request(true)).unwrap();
        let raw = provider.invoke(&call).await.unwrap();
        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(
            aggregate.tool_calls,
            vec![ToolCall {
                id: "t0".to_owned(),
                name: "look".to_owned(),
                arguments: "{}".to_owned(),
            }]
        );
        assert_eq!(aggregate.finish_reason, Some(FinishReason::ToolCalls));
    }

    #[tokio::test]
    async fn finishing_fragment_closes_with_tool_calls() {
        let server = MockServer::start().await;
        let provider = provider(&server);
        let mut state = StreamState::default();

        let fragment = json!({
            "choices": [{"delta": {"tool_calls": [{"index": 0, "id": "t0", "name": "look", "arguments": "{}"}]}}],
            "finished": true
        });
        let events = provider
            .parse_stream_fragment(&fragment.to_string(), &mut state)
            .unwrap();

        assert!(matches!(events.first(), Some(CanonicalEvent::ToolCallDelta { index: 0, .. })));
        assert!(matches!(
            events.last(),
            Some(CanonicalEvent::Done {
                finish_reason: FinishReason::ToolCalls,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn legacy_flat_fragments() {
        let body = sse(&[
            json!({"content": "Hel", "finished": false}),
            json!({"content": "lo", "finished": true}),
        ]);

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server));
        let call = provider.build_upstream_call(&request(true)).unwrap();
        let raw = provider.invoke(&call).await.unwrap();
        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(aggregate.content, "Hello");
        assert_eq!(aggregate.finish_reason, Some(FinishReason::Stop));
    }

    #[tokio::test]
    async fn non_streaming_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "whole answer"}}],
                "usage": {"prompt_tokens": 2, "completion_tokens": 3, "total_tokens": 5}
            })))
            .mount(&server)
            .await;

        let provider = Arc::new(provider(&server));
        let call = provider.build_upstream_call(&request(false)).unwrap();
        let raw = provider.invoke(&call).await.unwrap();
        let aggregate = collect(translate(provider, raw, None)).await;

        assert_eq!(aggregate.content, "whole answer");
        assert_eq!(aggregate.usage, Some(Usage::new(2, 3, Some(5))));
    }

    #[tokio::test]
    async fn tool_definitions_are_unsupported() {
        let server = MockServer::start().await;
        let mut request = request(false);
        request.tools.push(ToolDefinition {
            name: "look".to_owned(),
            description: None,
            parameters: None,
        });

        let error = provider(&server).build_upstream_call(&request).unwrap_err();
        assert!(matches!(error, LlmError::UnsupportedFeature(_)));
    }

    #[tokio::test]
    async fn chat_id_override_must_be_uuid() {
        let server = MockServer::start().await;
        let provider = provider(&server);

        let mut request = request(false);
        request.chat_id = Some("not-a-uuid".to_owned());
        assert!(matches!(
            provider.build_upstream_call(&request).unwrap_err(),
            LlmError::InvalidRequest(_)
        ));

        let id = Uuid::new_v4().to_string();
        request.chat_id = Some(id.clone());
        let call = provider.build_upstream_call(&request).unwrap();
        assert!(call.url.as_str().ends_with(&format!("?chat_id={id}")));
        assert_eq!(call.headers.get(REFERER).unwrap().to_str().unwrap(), format!("{WEB_ORIGIN}/c/{id}"));
    }

    #[tokio::test]
    async fn missing_cookies_are_unauthenticated() {
        let server = MockServer::start().await;
        let provider = QwenProvider::new(
            "qwen".to_owned(),
            &config(&server, Some(" ")),
            AdapterSettings::default(),
            Client::new(),
        )
        .unwrap();

        assert!(matches!(
            provider.build_upstream_call(&request(false)).unwrap_err(),
            LlmError::Unauthenticated(_)
        ));
    }

    #[tokio::test]
    async fn fragment_error_ends_the_stream() {
        let server = MockServer::start().await;
        let provider = provider(&server);
        let mut state = StreamState::default();

        let events = provider
            .parse_stream_fragment(r#"{"error": {"message": "session expired"}}"#, &mut state)
            .unwrap();

        assert_eq!(
            events,
            vec![CanonicalEvent::Error {
                kind: ErrorKind::UpstreamStatus,
                message: "session expired".to_owned(),
            }]
        );
    }
}
