//! Responses API wire format used by the ChatGPT session backend

use serde::{Deserialize, Serialize};

use crate::normalize::ReasoningParam;

// -- Request types --

/// Body posted to the `codex/responses` endpoint
#[derive(Debug, Clone, Serialize)]
pub struct ResponsesRequest {
    pub model: String,
    pub instructions: String,
    pub input: Vec<InputItem>,
    pub tools: Vec<ResponsesTool>,
    pub tool_choice: serde_json::Value,
    pub parallel_tool_calls: bool,
    pub store: bool,
    pub stream: bool,
    /// Upstream prompt cache key, the client session id
    pub prompt_cache_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningParam>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
}

/// One entry of the `input` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputItem {
    Message {
        role: String,
        content: Vec<InputContent>,
    },
    FunctionCall {
        name: String,
        arguments: String,
        call_id: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
}

/// Content block of an input message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputContent {
    InputText { text: String },
    OutputText { text: String },
    InputImage { image_url: String },
}

/// Flattened function tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponsesTool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    pub strict: bool,
    pub parameters: serde_json::Value,
}

// -- Stream event types --

/// Server-sent event of the responses stream
///
/// Only the fields the translator reads are modelled; everything else is
/// ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub delta: Option<String>,
    #[serde(default)]
    pub item: Option<ResponsesItem>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub output_index: Option<u32>,
    #[serde(default)]
    pub summary_index: Option<u32>,
    #[serde(default)]
    pub response: Option<ResponsesEnvelope>,
}

/// Output item announced by `response.output_item.*`
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesItem {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Response object carried by `response.completed` and `response.failed`
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesEnvelope {
    #[serde(default)]
    pub usage: Option<ResponsesUsage>,
    #[serde(default)]
    pub error: Option<ResponsesError>,
}

/// Token accounting of a finished response
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ResponsesUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// Failure detail of `response.failed`
#[derive(Debug, Clone, Deserialize)]
pub struct ResponsesError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}
