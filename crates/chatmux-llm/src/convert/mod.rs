//! Mapping between canonical requests/events and upstream wire shapes
//!
//! `openai` covers chat completions (Grok, `OpenRouter` and the client
//! surface); `responses` covers the session backend.

pub mod openai;
pub mod responses;
