//! Qwen web chat API wire format types

use serde::{Deserialize, Serialize};

use super::openai::OpenAiMessage;

/// Body posted to `api/v2/chat/completions`
#[derive(Debug, Clone, Serialize)]
pub struct QwenRequest {
    pub model: String,
    pub messages: Vec<OpenAiMessage>,
    pub stream: bool,
    pub incremental_output: bool,
    pub chat_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// One streamed fragment
///
/// Two shapes occur in the wild: a flat `{content, finished}` object and a
/// chat-completions-like object whose deltas carry a `phase` and `status`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenFragment {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub finished: Option<bool>,
    #[serde(default)]
    pub choices: Vec<QwenChoice>,
    #[serde(default)]
    pub usage: Option<QwenUsage>,
    #[serde(default)]
    pub error: Option<QwenError>,
}

/// Choice of a fragment or of a complete response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenChoice {
    #[serde(default)]
    pub delta: Option<QwenDelta>,
    #[serde(default)]
    pub message: Option<QwenDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Incremental or complete assistant payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenDelta {
    #[serde(default)]
    pub content: Option<String>,
    /// `think` marks reasoning text, `answer` regular output
    #[serde(default)]
    pub phase: Option<String>,
    /// `finished` on the last fragment
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<QwenToolCall>,
}

/// Tool call fragment keyed by an explicit index
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenToolCall {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
    /// Some fragments nest name and arguments the `OpenAI` way
    #[serde(default)]
    pub function: Option<QwenFunction>,
}

/// Nested function payload of a tool call fragment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenFunction {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

/// Token usage, reported with either spelling
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct QwenUsage {
    #[serde(default, alias = "prompt_tokens")]
    pub input_tokens: u64,
    #[serde(default, alias = "completion_tokens")]
    pub output_tokens: u64,
    #[serde(default)]
    pub total_tokens: Option<u64>,
}

/// Error object embedded in a fragment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QwenError {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}
