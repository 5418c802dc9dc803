//! Pre-admission validation
//!
//! Turns an inbound client request into a [`CanonicalRequest`] or rejects
//! it. Runs strictly before the admission gate, so a rejection never holds
//! a concurrency slot or reaches an upstream.

use chatmux_config::{LlmConfig, ProviderType, RequestLimits};

use crate::error::LlmError;
use crate::image::normalize_message_images;
use crate::normalize::normalize_model_name;
use crate::protocol::openai::{ChatCompletionRequest, TextCompletionRequest};
use crate::provider::Provider;
use crate::types::{CanonicalRequest, Content, ContentPart, Message, Role};

/// Models the session backend accepts after normalization
const SESSION_MODELS: &[&str] = &["gpt-5", "gpt-5-codex", "codex-mini-latest"];

/// Request metadata that does not travel in the JSON body
#[derive(Debug, Clone, Copy, Default)]
pub struct Inbound<'a> {
    /// Size of the raw request body
    pub body_bytes: usize,
    /// Client conversation id (`x-session-id`)
    pub session_id: Option<&'a str>,
    /// Qwen conversation override (`chat_id` query)
    pub chat_id: Option<&'a str>,
}

/// Checks request shape and size limits
#[derive(Debug, Clone)]
pub struct Validator {
    limits: RequestLimits,
    default_model: String,
    debug_model: Option<String>,
}

fn message_bytes(message: &Message) -> usize {
    let content = match &message.content {
        Content::Text(text) => text.len(),
        Content::Parts(parts) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => text.len(),
                ContentPart::Image { url, .. } => url.len(),
            })
            .sum(),
    };

    let calls: usize = message
        .tool_calls
        .iter()
        .map(|call| call.name.len() + call.arguments.len())
        .sum();

    content + calls
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_owned)
}

impl Validator {
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            limits: config.limits,
            default_model: config.default_model.clone(),
            debug_model: non_blank(config.debug_model.as_deref()),
        }
    }

    pub const fn max_body_bytes(&self) -> usize {
        self.limits.max_body_bytes
    }

    fn check_body(&self, inbound: &Inbound<'_>) -> Result<(), LlmError> {
        if inbound.body_bytes > self.limits.max_body_bytes {
            return Err(LlmError::InvalidRequest(format!(
                "request body of {} bytes exceeds the limit of {} bytes",
                inbound.body_bytes, self.limits.max_body_bytes
            )));
        }
        Ok(())
    }

    fn check_messages(&self, messages: &[Message]) -> Result<(), LlmError> {
        if messages.is_empty() {
            return Err(LlmError::InvalidRequest("messages must not be empty".to_owned()));
        }

        if messages.len() > self.limits.max_messages {
            return Err(LlmError::InvalidRequest(format!(
                "too many messages: {} (limit {})",
                messages.len(),
                self.limits.max_messages
            )));
        }

        if let Some((index, size)) = messages
            .iter()
            .map(message_bytes)
            .enumerate()
            .find(|(_, size)| *size > self.limits.max_message_bytes)
        {
            return Err(LlmError::InvalidRequest(format!(
                "message {index} is {size} bytes (limit {})",
                self.limits.max_message_bytes
            )));
        }

        Ok(())
    }

    fn check_model(&self, provider: &dyn Provider, requested: &str) -> Result<(), LlmError> {
        if provider.kind() != ProviderType::Session || self.debug_model.is_some() {
            return Ok(());
        }

        let model = normalize_model_name(Some(requested), None, &self.default_model);
        if SESSION_MODELS.contains(&model.as_str()) {
            Ok(())
        } else {
            Err(LlmError::InvalidRequest(format!("unsupported model: {requested}")))
        }
    }

    fn requested_model(&self, model: Option<&str>) -> String {
        non_blank(model).unwrap_or_else(|| self.default_model.clone())
    }

    /// Validate a chat completion request
    pub fn chat(
        &self,
        request: ChatCompletionRequest,
        inbound: &Inbound<'_>,
        provider: &dyn Provider,
    ) -> Result<CanonicalRequest, LlmError> {
        self.check_body(inbound)?;

        let mut messages: Vec<Message> = request.messages.into_iter().map(Into::into).collect();
        self.check_messages(&messages)?;

        let model = self.requested_model(request.model.as_deref());
        self.check_model(provider, &model)?;

        normalize_message_images(&mut messages);

        let mut canonical = CanonicalRequest::new(provider.name(), model, messages);
        canonical.stream = request.stream.unwrap_or(false);
        canonical.tools = request.tools.unwrap_or_default().into_iter().map(Into::into).collect();
        canonical.tool_choice = request.tool_choice;
        canonical.parallel_tool_calls = request.parallel_tool_calls.unwrap_or(false);
        canonical.reasoning = request.reasoning;
        canonical.max_tokens = request.max_tokens;
        canonical.temperature = request.temperature;
        canonical.session_id = non_blank(inbound.session_id);
        canonical.chat_id = non_blank(inbound.chat_id);
        canonical.include_usage = request.stream_options.is_some_and(|o| o.include_usage);

        Ok(canonical)
    }

    /// Validate a text completion request as a single user turn
    pub fn text(
        &self,
        request: TextCompletionRequest,
        inbound: &Inbound<'_>,
        provider: &dyn Provider,
    ) -> Result<CanonicalRequest, LlmError> {
        self.check_body(inbound)?;

        let prompt = request.prompt.map(|p| p.into_text()).unwrap_or_default();
        if prompt.trim().is_empty() {
            return Err(LlmError::InvalidRequest("prompt must not be empty".to_owned()));
        }

        let messages = vec![Message::text(Role::User, prompt)];
        self.check_messages(&messages)?;

        let model = self.requested_model(request.model.as_deref());
        self.check_model(provider, &model)?;

        let mut canonical = CanonicalRequest::new(provider.name(), model, messages);
        canonical.stream = request.stream.unwrap_or(false);
        canonical.reasoning = request.reasoning;
        canonical.max_tokens = request.max_tokens;
        canonical.temperature = request.temperature;
        canonical.session_id = non_blank(inbound.session_id);
        canonical.chat_id = non_blank(inbound.chat_id);
        canonical.include_usage = request.stream_options.is_some_and(|o| o.include_usage);

        Ok(canonical)
    }
}
