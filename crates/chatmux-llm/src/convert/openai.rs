//! Conversion between internal types and `OpenAI` wire format

use chatmux_config::ReasoningCompat;
use serde_json::{Value, json};

use crate::protocol::openai::{
    OpenAiChoice, OpenAiChoiceMessage, OpenAiContent, OpenAiContentPart, OpenAiFunction, OpenAiFunctionCall,
    OpenAiImageUrl, OpenAiMessage, OpenAiResponse, OpenAiStreamChoice, OpenAiStreamChunk, OpenAiStreamDelta,
    OpenAiStreamFunctionCall, OpenAiStreamToolCall, OpenAiTool, OpenAiToolCall, OpenAiUsage,
};
use crate::stream::{Aggregate, StreamState};
use crate::types::{CanonicalEvent, Content, ContentPart, FinishReason, Message, Role, ToolCall, ToolDefinition, Usage};

// -- Inbound: OpenAI wire format -> internal types --

impl From<OpenAiMessage> for Message {
    fn from(msg: OpenAiMessage) -> Self {
        let role = match msg.role.as_str() {
            "system" | "developer" => Role::System,
            "assistant" => Role::Assistant,
            "tool" => Role::Tool,
            _ => Role::User,
        };

        let content = match msg.content {
            Some(OpenAiContent::Text(text)) => Content::Text(text),
            Some(OpenAiContent::Parts(parts)) => Content::Parts(parts.into_iter().map(Into::into).collect()),
            None => Content::Text(String::new()),
        };

        let tool_calls = msg
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .filter(|tc| tc.tool_type == "function")
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Self {
            role,
            content,
            name: msg.name,
            tool_calls,
            tool_call_id: msg.tool_call_id,
        }
    }
}

impl From<OpenAiContentPart> for ContentPart {
    fn from(part: OpenAiContentPart) -> Self {
        match part {
            OpenAiContentPart::Text { text } => Self::Text { text },
            OpenAiContentPart::ImageUrl { image_url } => match image_url {
                OpenAiImageUrl::Object { url, detail } => Self::Image { url, detail },
                OpenAiImageUrl::Url(url) => Self::Image { url, detail: None },
            },
        }
    }
}

impl From<OpenAiTool> for ToolDefinition {
    fn from(tool: OpenAiTool) -> Self {
        Self {
            name: tool.function.name,
            description: tool.function.description,
            parameters: tool.function.parameters,
        }
    }
}

// -- Outbound: internal request -> OpenAI wire request (for sending to provider) --

impl From<&Message> for OpenAiMessage {
    fn from(msg: &Message) -> Self {
        let content = match &msg.content {
            Content::Text(text) if text.is_empty() && !msg.tool_calls.is_empty() => None,
            Content::Text(text) => Some(OpenAiContent::Text(text.clone())),
            Content::Parts(parts) => Some(OpenAiContent::Parts(parts.iter().map(Into::into).collect())),
        };

        let tool_calls = (!msg.tool_calls.is_empty()).then(|| msg.tool_calls.iter().map(Into::into).collect());

        Self {
            role: msg.role.as_str().to_owned(),
            content,
            name: msg.name.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl From<&ContentPart> for OpenAiContentPart {
    fn from(part: &ContentPart) -> Self {
        match part {
            ContentPart::Text { text } => Self::Text { text: text.clone() },
            ContentPart::Image { url, detail } => Self::ImageUrl {
                image_url: OpenAiImageUrl::Object {
                    url: url.clone(),
                    detail: detail.clone(),
                },
            },
        }
    }
}

impl From<&ToolCall> for OpenAiToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            tool_type: "function".to_owned(),
            function: OpenAiFunctionCall {
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            },
        }
    }
}

/// Tool definitions in `OpenAI` shape, `None` when there are none
pub fn tools_to_openai(tools: &[ToolDefinition]) -> Option<Vec<OpenAiTool>> {
    (!tools.is_empty()).then(|| {
        tools
            .iter()
            .map(|tool| OpenAiTool {
                tool_type: "function".to_owned(),
                function: OpenAiFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect()
    })
}

/// Prepend the base instructions as a system message
///
/// Only when enabled and the conversation has no system message yet.
pub fn with_base_instructions(messages: &[Message], instructions: &str, inject: bool) -> Vec<Message> {
    let has_system = messages.iter().any(|m| m.role == Role::System);

    if !inject || has_system || instructions.trim().is_empty() {
        return messages.to_vec();
    }

    let mut out = Vec::with_capacity(messages.len() + 1);
    out.push(Message::text(Role::System, instructions));
    out.extend_from_slice(messages);
    out
}

// -- Upstream responses -> canonical events --

/// Reasoning text from either spelling an upstream may use
fn reasoning_text(reasoning: Option<&Value>, reasoning_content: Option<&str>) -> Option<String> {
    let from_value = match reasoning {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Object(object)) => object.get("content").and_then(Value::as_array).map(|parts| {
            parts
                .iter()
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        }),
        _ => None,
    };

    from_value
        .or_else(|| reasoning_content.map(str::to_owned))
        .filter(|text| !text.is_empty())
}

fn usage_from_openai(usage: OpenAiUsage) -> Usage {
    Usage::new(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens)
}

/// Convert an `OpenAI` stream chunk into canonical events
///
/// Finish reason and usage are recorded on the state; the terminal event is
/// produced once the upstream signals the end.
pub fn chunk_to_events(chunk: &OpenAiStreamChunk, state: &mut StreamState) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();

    for choice in chunk.choices.iter().filter(|c| c.index == 0) {
        let delta = &choice.delta;

        if let Some(text) = reasoning_text(delta.reasoning.as_ref(), delta.reasoning_content.as_deref()) {
            events.push(CanonicalEvent::reasoning(text));
        }

        if let Some(content) = &delta.content {
            events.push(CanonicalEvent::content(content.clone()));
        }

        for call in delta.tool_calls.iter().flatten() {
            let function = call.function.as_ref();
            events.push(CanonicalEvent::ToolCallDelta {
                index: call.index,
                id: call.id.clone(),
                name: function.and_then(|f| f.name.clone()),
                arguments: function.and_then(|f| f.arguments.clone()),
            });
        }

        if let Some(reason) = &choice.finish_reason {
            state.record_finish(FinishReason::parse(reason));
        }
    }

    if let Some(usage) = chunk.usage {
        state.record_usage(usage_from_openai(usage));
    }

    events
}

/// Convert a complete `OpenAI` response into a `Done`-terminated batch
pub fn response_to_events(response: &OpenAiResponse, state: &mut StreamState) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();

    if let Some(choice) = response.choices.first() {
        let message = &choice.message;

        if let Some(text) = reasoning_text(message.reasoning.as_ref(), message.reasoning_content.as_deref()) {
            events.push(CanonicalEvent::reasoning(text));
        }

        if let Some(content) = &message.content {
            events.push(CanonicalEvent::content(content.clone()));
        }

        let calls = message.tool_calls.as_deref().unwrap_or_default();
        for (index, call) in (0_u32..).zip(calls) {
            events.push(CanonicalEvent::ToolCallDelta {
                index,
                id: Some(call.id.clone()),
                name: Some(call.function.name.clone()),
                arguments: Some(call.function.arguments.clone()),
            });
        }

        if let Some(reason) = &choice.finish_reason {
            state.record_finish(FinishReason::parse(reason));
        }
        if !calls.is_empty() {
            state.record_finish(FinishReason::ToolCalls);
        }
    }

    if let Some(usage) = response.usage {
        state.record_usage(usage_from_openai(usage));
    }

    events.push(state.completion());
    events
}

// -- Canonical events -> client wire format --

/// Finish reason as sent on the wire
pub const fn finish_reason_wire(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}

pub const fn openai_usage(usage: Usage) -> OpenAiUsage {
    OpenAiUsage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: Some(usage.total_tokens),
    }
}

/// Reasoning field pair in the configured framing
fn framed_reasoning(text: &str, compat: ReasoningCompat) -> (Option<Value>, Option<String>) {
    match compat {
        ReasoningCompat::Legacy => (Some(Value::String(text.to_owned())), Some(text.to_owned())),
        ReasoningCompat::ThinkTags | ReasoningCompat::O3 => {
            (Some(json!({ "content": [{ "type": "text", "text": text }] })), None)
        }
    }
}

/// Identity fields shared by every chunk of one response
#[derive(Debug, Clone)]
pub struct ChunkContext {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub compat: ReasoningCompat,
}

impl ChunkContext {
    fn chunk(&self, delta: OpenAiStreamDelta, finish_reason: Option<&str>) -> OpenAiStreamChunk {
        OpenAiStreamChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAiStreamChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_owned),
            }],
            usage: None,
        }
    }

    /// Chunk for a content, tool call, or reasoning delta
    pub fn delta_chunk(&self, event: &CanonicalEvent, first: bool) -> Option<OpenAiStreamChunk> {
        let mut delta = OpenAiStreamDelta {
            role: first.then(|| "assistant".to_owned()),
            ..OpenAiStreamDelta::default()
        };

        match event {
            CanonicalEvent::ContentDelta { text } => delta.content = Some(text.clone()),
            CanonicalEvent::ReasoningDelta { text } => {
                (delta.reasoning, delta.reasoning_summary) = framed_reasoning(text, self.compat);
            }
            CanonicalEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => {
                delta.tool_calls = Some(vec![OpenAiStreamToolCall {
                    index: *index,
                    id: id.clone(),
                    tool_type: id.as_ref().map(|_| "function".to_owned()),
                    function: Some(OpenAiStreamFunctionCall {
                        name: name.clone(),
                        arguments: Some(arguments.clone().unwrap_or_default()),
                    }),
                }]);
            }
            CanonicalEvent::Done { .. } | CanonicalEvent::Error { .. } => return None,
        }

        Some(self.chunk(delta, None))
    }

    /// Chunk carrying the finish reason
    pub fn finish_chunk(&self, reason: FinishReason) -> OpenAiStreamChunk {
        self.chunk(OpenAiStreamDelta::default(), Some(finish_reason_wire(reason)))
    }

    /// Trailing usage chunk with no choices
    pub fn usage_chunk(&self, usage: Usage) -> OpenAiStreamChunk {
        OpenAiStreamChunk {
            choices: Vec::new(),
            usage: Some(openai_usage(usage)),
            ..self.chunk(OpenAiStreamDelta::default(), None)
        }
    }

    /// Non-streaming `chat.completion` object
    pub fn completion(&self, aggregate: &Aggregate) -> OpenAiResponse {
        let tool_calls: Vec<OpenAiToolCall> = aggregate.tool_calls.iter().map(Into::into).collect();

        let (reasoning, reasoning_summary) = if aggregate.reasoning.is_empty() {
            (None, None)
        } else {
            framed_reasoning(&aggregate.reasoning, self.compat)
        };

        let content = if aggregate.content.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(aggregate.content.clone())
        };

        OpenAiResponse {
            id: self.id.clone(),
            object: "chat.completion".to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![OpenAiChoice {
                index: 0,
                message: OpenAiChoiceMessage {
                    role: "assistant".to_owned(),
                    content,
                    tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                    reasoning,
                    reasoning_content: None,
                    reasoning_summary,
                },
                finish_reason: Some(finish_reason_wire(aggregate.finish_reason.unwrap_or(FinishReason::Stop)).to_owned()),
            }],
            usage: aggregate.usage.map(openai_usage),
        }
    }
}
