//! Conversion between internal types and the Responses API format

use chatmux_config::ReasoningCompat;
use serde_json::json;

use crate::protocol::responses::{InputContent, InputItem, ResponsesEvent, ResponsesItem, ResponsesTool};
use crate::stream::StreamState;
use crate::types::{
    CanonicalEvent, Content, ContentPart, ErrorKind, FinishReason, Message, Role, ToolDefinition, Usage,
};

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

// -- Outbound: internal request -> responses input --

fn input_content(content: &Content, role: Role) -> Vec<InputContent> {
    let text_block = |text: String| {
        if role == Role::Assistant {
            InputContent::OutputText { text }
        } else {
            InputContent::InputText { text }
        }
    };

    match content {
        Content::Text(text) if text.is_empty() => Vec::new(),
        Content::Text(text) => vec![text_block(text.clone())],
        Content::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } if text.is_empty() => None,
                ContentPart::Text { text } => Some(text_block(text.clone())),
                // The backend only accepts images on user turns
                ContentPart::Image { .. } if role == Role::Assistant => None,
                ContentPart::Image { url, .. } => Some(InputContent::InputImage { image_url: url.clone() }),
            })
            .collect(),
    }
}

/// Conversation as a responses `input` list
///
/// System messages are moved to the front as user turns since the backend
/// takes its system prompt from `instructions` only. Assistant tool calls
/// and tool results become `function_call` / `function_call_output` items.
pub fn to_input(messages: &[Message]) -> Vec<InputItem> {
    let (system, rest): (Vec<&Message>, Vec<&Message>) = messages.iter().partition(|m| m.role == Role::System);

    let mut input = Vec::with_capacity(messages.len());

    for message in system {
        let content = input_content(&message.content, Role::User);
        if !content.is_empty() {
            input.push(InputItem::Message {
                role: Role::User.as_str().to_owned(),
                content,
            });
        }
    }

    for message in rest {
        match message.role {
            Role::Tool => input.push(InputItem::FunctionCallOutput {
                call_id: message.tool_call_id.clone().unwrap_or_default(),
                output: message.content.as_text(),
            }),
            role => {
                let content = input_content(&message.content, role);
                if !content.is_empty() {
                    input.push(InputItem::Message {
                        role: role.as_str().to_owned(),
                        content,
                    });
                }

                for call in &message.tool_calls {
                    input.push(InputItem::FunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                        call_id: call.id.clone(),
                    });
                }
            }
        }
    }

    input
}

/// Function tools in the flattened responses shape
///
/// Tools without a name are dropped; a missing schema becomes an empty
/// object schema.
pub fn to_tools(tools: &[ToolDefinition]) -> Vec<ResponsesTool> {
    tools
        .iter()
        .filter(|tool| !tool.name.trim().is_empty())
        .map(|tool| ResponsesTool {
            tool_type: "function".to_owned(),
            name: tool.name.clone(),
            description: tool.description.clone().unwrap_or_default(),
            strict: false,
            parameters: tool
                .parameters
                .clone()
                .unwrap_or_else(|| json!({ "type": "object", "properties": {} })),
        })
        .collect()
}

// -- Inbound: responses events -> canonical events --

fn tool_key(event: &ResponsesEvent, item: Option<&ResponsesItem>) -> Option<String> {
    event
        .output_index
        .map(|index| index.to_string())
        .or_else(|| event.item_id.clone())
        .or_else(|| item.and_then(|i| i.id.clone()))
}

fn close_think(state: &mut StreamState, events: &mut Vec<CanonicalEvent>) {
    if state.think_open && !state.think_closed {
        events.push(CanonicalEvent::content(THINK_CLOSE));
        state.think_open = false;
        state.think_closed = true;
    }
}

fn reasoning_delta(
    text: &str,
    summary: bool,
    compat: ReasoningCompat,
    state: &mut StreamState,
    events: &mut Vec<CanonicalEvent>,
) {
    let separate = summary && std::mem::take(&mut state.paragraph_pending);

    match compat {
        ReasoningCompat::ThinkTags => {
            if state.think_closed {
                return;
            }
            if !state.think_open {
                events.push(CanonicalEvent::content(THINK_OPEN));
                state.think_open = true;
            }
            if separate {
                events.push(CanonicalEvent::content("\n"));
            }
            events.push(CanonicalEvent::content(text));
        }
        ReasoningCompat::O3 => {
            if separate {
                events.push(CanonicalEvent::reasoning("\n"));
            }
            events.push(CanonicalEvent::reasoning(text));
        }
        ReasoningCompat::Legacy => events.push(CanonicalEvent::reasoning(text)),
    }
}

/// Translate one responses stream event
///
/// Reasoning is either inlined into the content as a `<think>` block or
/// emitted as reasoning deltas, depending on `compat`.
pub fn event_to_events(event: &ResponsesEvent, compat: ReasoningCompat, state: &mut StreamState) -> Vec<CanonicalEvent> {
    let mut events = Vec::new();
    let delta = event.delta.as_deref().unwrap_or_default();

    match event.kind.as_str() {
        "response.output_text.delta" => {
            close_think(state, &mut events);
            events.push(CanonicalEvent::content(delta));
        }
        "response.output_item.added" | "response.output_item.done" => {
            let Some(item) = event.item.as_ref().filter(|i| i.kind == "function_call") else {
                return events;
            };
            let Some(key) = tool_key(event, Some(item)) else {
                return events;
            };

            let index = state.tool_index(&key);
            let done = event.kind == "response.output_item.done";

            // Arguments only when none were streamed for this call
            let arguments = if done && state.tool_call(index).is_none_or(|call| call.arguments.is_empty()) {
                item.arguments.clone()
            } else {
                None
            };

            events.push(CanonicalEvent::ToolCallDelta {
                index,
                id: item.call_id.clone().or_else(|| item.id.clone()),
                name: item.name.clone(),
                arguments,
            });
        }
        "response.function_call_arguments.delta" => {
            if let Some(key) = tool_key(event, None) {
                let index = state.tool_index(&key);
                events.push(CanonicalEvent::ToolCallDelta {
                    index,
                    id: None,
                    name: None,
                    arguments: Some(delta.to_owned()),
                });
            }
        }
        "response.reasoning_summary_part.added" => {
            if state.saw_summary {
                state.paragraph_pending = true;
            } else {
                state.saw_summary = true;
            }
        }
        "response.reasoning_summary_text.delta" => reasoning_delta(delta, true, compat, state, &mut events),
        "response.reasoning_text.delta" => reasoning_delta(delta, false, compat, state, &mut events),
        "response.failed" => {
            let message = event
                .response
                .as_ref()
                .and_then(|r| r.error.as_ref())
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| "response.failed".to_owned());

            events.push(CanonicalEvent::Error {
                kind: ErrorKind::UpstreamStatus,
                message,
            });
        }
        "response.incomplete" => {
            close_think(state, &mut events);
            state.record_finish(FinishReason::Length);
            events.push(state.completion());
        }
        "response.completed" => {
            if let Some(usage) = event.response.as_ref().and_then(|r| r.usage) {
                state.record_usage(Usage::new(usage.input_tokens, usage.output_tokens, usage.total_tokens));
            }
            close_think(state, &mut events);
            events.push(state.completion());
        }
        other => tracing::trace!(event = other, "ignoring responses event"),
    }

    events
}
