use serde::{Deserialize, Serialize};

use super::message::{Message, ToolDefinition};

/// Client-supplied reasoning options
///
/// Values are kept as raw strings; unknown values are ignored when the
/// reasoning parameter is built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// Provider-independent chat request
///
/// Built once by the validator and only read afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRequest {
    /// Model as requested by the client
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<serde_json::Value>,
    pub parallel_tool_calls: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Configured provider name
    pub provider: String,
    /// Client conversation id, reused as the upstream cache key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Qwen conversation id override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    /// Report usage on the terminal streaming chunk
    pub include_usage: bool,
}

impl CanonicalRequest {
    /// A request with defaults for everything but the essentials
    pub fn new(provider: impl Into<String>, model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
            tools: Vec::new(),
            tool_choice: None,
            parallel_tool_calls: false,
            reasoning: None,
            max_tokens: None,
            temperature: None,
            provider: provider.into(),
            session_id: None,
            chat_id: None,
            include_usage: false,
        }
    }
}
