//! Provider-independent request and event types
//!
//! Every adapter converts its wire format to and from these.

pub mod event;
pub mod message;
pub mod request;

pub use event::{CanonicalEvent, ErrorKind, FinishReason, Usage};
pub use message::{Content, ContentPart, Message, Role, ToolCall, ToolDefinition};
pub use request::{CanonicalRequest, ReasoningOverride};
