//! Core of the chatmux gateway
//!
//! Translates OpenAI-style chat requests into calls against four upstream
//! backends (the `ChatGPT` session backend, Grok, `OpenRouter` and Qwen),
//! bounded by an admission gate and a rate-limit retry policy, and
//! translates every upstream reply back into one canonical event stream.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod convert;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod image;
pub mod normalize;
pub mod protocol;
pub mod provider;
pub mod retry;
#[cfg(feature = "http")]
pub mod router;
pub mod sanitize;
pub mod stream;
pub mod types;
pub mod validate;

pub use error::LlmError;
pub use gateway::{Completion, Gateway, MetricsSnapshot};
pub use provider::{Provider, ProviderCapabilities, ProviderRegistry};
pub use retry::RetryPolicy;
#[cfg(feature = "http")]
pub use router::{LlmState, llm_router};
pub use stream::{Aggregate, EventStream, collect};
pub use types::{CanonicalEvent, CanonicalRequest};
