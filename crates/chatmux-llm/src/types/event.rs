use serde::Serialize;

/// Why generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    /// Map an upstream finish reason string
    pub fn parse(value: &str) -> Self {
        match value {
            "length" | "max_tokens" => Self::Length,
            "tool_calls" | "function_call" | "tool_use" => Self::ToolCalls,
            "content_filter" => Self::ContentFilter,
            _ => Self::Stop,
        }
    }
}

/// Token counts reported by the upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub const fn new(prompt_tokens: u64, completion_tokens: u64, total_tokens: Option<u64>) -> Self {
        let total_tokens = match total_tokens {
            Some(total) => total,
            None => prompt_tokens + completion_tokens,
        };

        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Category of a terminal stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    UpstreamRateLimited,
    UpstreamProtocol,
    UpstreamTransport,
    UpstreamStatus,
    Unauthenticated,
    Internal,
}

/// Unit of the translated response stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CanonicalEvent {
    ContentDelta {
        text: String,
    },
    ToolCallDelta {
        index: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
    ReasoningDelta {
        text: String,
    },
    Done {
        finish_reason: FinishReason,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl CanonicalEvent {
    pub fn content(text: impl Into<String>) -> Self {
        Self::ContentDelta { text: text.into() }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self::ReasoningDelta { text: text.into() }
    }

    pub const fn done(finish_reason: FinishReason) -> Self {
        Self::Done {
            finish_reason,
            usage: None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}
