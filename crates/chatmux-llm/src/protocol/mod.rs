//! Wire format types for client-facing and upstream protocols
//!
//! Each module contains pure serde structs matching the respective JSON
//! format. These types are only used for serialization/deserialization at
//! the boundary and are not used internally.

pub mod openai;
pub mod qwen;
pub mod responses;
