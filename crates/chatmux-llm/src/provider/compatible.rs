//! Plumbing shared by chat-completions shaped upstreams

use http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use url::Url;

use super::{AdapterSettings, header_value};
use crate::convert::openai::{chunk_to_events, response_to_events, tools_to_openai, with_base_instructions};
use crate::credentials::CredentialProvider;
use crate::error::LlmError;
use crate::protocol::openai::{OpenAiMessage, OpenAiRequest, OpenAiResponse, OpenAiStreamChunk, OpenAiStreamOptions};
use crate::stream::StreamState;
use crate::types::{CanonicalEvent, CanonicalRequest, Message};

/// Temperature sent when the client gives none
pub(crate) const DEFAULT_TEMPERATURE: f64 = 0.7;

/// `{base}/chat/completions`, `None` when the base cannot be joined
pub(crate) fn completions_url(base: Option<&Url>, default_base: &str) -> Option<Url> {
    let base = base.map_or(default_base, Url::as_str);
    Url::parse(&format!("{}/chat/completions", base.trim_end_matches('/'))).ok()
}

/// Bearer authorization plus JSON or event-stream accept
pub(crate) fn bearer_headers(
    credentials: &dyn CredentialProvider,
    provider: &str,
    stream: bool,
) -> Result<HeaderMap, LlmError> {
    let bearer = credentials.get_bearer(provider)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        header_value(&format!("Bearer {}", bearer.token.expose_secret()), true)?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static(if stream { "text/event-stream" } else { "application/json" }),
    );

    Ok(headers)
}

/// Conversation with the base instructions applied when enabled
pub(crate) fn prepared_messages(request: &CanonicalRequest, settings: &AdapterSettings) -> Vec<Message> {
    with_base_instructions(&request.messages, &settings.instructions, settings.inject_base_prompt)
}

/// Chat completion body for the given upstream model and messages
pub(crate) fn chat_body(request: &CanonicalRequest, model: String, messages: &[Message]) -> OpenAiRequest {
    OpenAiRequest {
        model,
        messages: messages.iter().map(OpenAiMessage::from).collect(),
        stream: request.stream,
        temperature: Some(request.temperature.unwrap_or(DEFAULT_TEMPERATURE)),
        max_tokens: request.max_tokens,
        tools: tools_to_openai(&request.tools),
        tool_choice: request.tool_choice.clone(),
        stream_options: (request.stream && request.include_usage)
            .then_some(OpenAiStreamOptions { include_usage: true }),
    }
}

pub(crate) fn parse_chunk(fragment: &str, state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(fragment)
        .map_err(|e| LlmError::UpstreamProtocol(format!("invalid stream chunk: {e}")))?;

    Ok(chunk_to_events(&chunk, state))
}

pub(crate) fn parse_response(body: &[u8], state: &mut StreamState) -> Result<Vec<CanonicalEvent>, LlmError> {
    let response: OpenAiResponse =
        serde_json::from_slice(body).map_err(|e| LlmError::UpstreamProtocol(format!("invalid response: {e}")))?;

    Ok(response_to_events(&response, state))
}
