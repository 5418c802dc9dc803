use std::path::PathBuf;

use indexmap::IndexMap;
use secrecy::SecretString;
use serde::Deserialize;
use url::Url;

/// Provider and request-shaping configuration
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LlmConfig {
    /// Provider used when a request does not name one
    #[serde(default = "default_provider")]
    pub default_provider: String,
    /// Model used when a request does not name one
    #[serde(default = "default_model")]
    pub default_model: String,
    /// When non-blank, replaces every requested model name
    #[serde(default)]
    pub debug_model: Option<String>,
    /// List the `gpt-5-<effort>` variants in the model listing
    #[serde(default)]
    pub expose_reasoning_models: bool,
    /// Prepend base instructions as a system message for direct APIs
    #[serde(default = "default_true")]
    pub inject_base_prompt: bool,
    /// File holding the base instructions text
    #[serde(default)]
    pub base_instructions_path: Option<PathBuf>,
    /// Reasoning defaults
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    /// Pre-admission request limits
    #[serde(default)]
    pub limits: RequestLimits,
    /// Provider configurations keyed by name
    #[serde(default = "default_providers")]
    pub providers: IndexMap<String, ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: default_provider(),
            default_model: default_model(),
            debug_model: None,
            expose_reasoning_models: false,
            inject_base_prompt: true,
            base_instructions_path: None,
            reasoning: ReasoningConfig::default(),
            limits: RequestLimits::default(),
            providers: default_providers(),
        }
    }
}

/// Configuration for a single upstream provider
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Adapter variant
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// Bearer credential for direct APIs
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Cookie header value (Qwen)
    #[serde(default)]
    pub cookies: Option<SecretString>,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<Url>,
    /// Model override (Qwen)
    #[serde(default)]
    pub model: Option<String>,
    /// Default conversation id (Qwen), must be a UUID
    #[serde(default)]
    pub chat_id: Option<String>,
    /// Explicit `auth.json` location (session backend)
    #[serde(default)]
    pub auth_path: Option<PathBuf>,
}

impl ProviderConfig {
    /// A provider config with only its type set
    pub const fn of_type(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            api_key: None,
            cookies: None,
            base_url: None,
            model: None,
            chat_id: None,
            auth_path: None,
        }
    }
}

/// Supported upstream adapters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, strum::Display, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ProviderType {
    /// ChatGPT session backend (codex responses API)
    Session,
    /// xAI Grok chat completions
    Grok,
    /// OpenRouter chat completions
    Openrouter,
    /// Qwen web chat API
    Qwen,
}

/// Reasoning defaults applied when a request carries no override
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub effort: ReasoningEffort,
    #[serde(default)]
    pub summary: ReasoningSummary,
    #[serde(default)]
    pub compat: ReasoningCompat,
}

/// How much reasoning the upstream should spend
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ReasoningEffort {
    Minimal,
    Low,
    #[default]
    Medium,
    High,
}

/// Reasoning summary verbosity; `None` omits the summary field upstream
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ReasoningSummary {
    #[default]
    Auto,
    Concise,
    Detailed,
    None,
}

/// How reasoning text is surfaced to clients
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum ReasoningCompat {
    /// Inline inside `<think>` tags in the content
    #[default]
    ThinkTags,
    /// Separate `reasoning` field
    O3,
    /// Separate `reasoning_summary` field
    Legacy,
}

/// Limits enforced before a request is admitted
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestLimits {
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            max_message_bytes: default_max_message_bytes(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_provider() -> String {
    "chatgpt".to_owned()
}

fn default_model() -> String {
    "gpt-5".to_owned()
}

const fn default_true() -> bool {
    true
}

fn default_providers() -> IndexMap<String, ProviderConfig> {
    IndexMap::from([("chatgpt".to_owned(), ProviderConfig::of_type(ProviderType::Session))])
}

const fn default_max_messages() -> usize {
    256
}

const fn default_max_message_bytes() -> usize {
    1024 * 1024
}

const fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}
