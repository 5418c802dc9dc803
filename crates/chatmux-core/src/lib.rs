//! Shared building blocks for chatmux crates

#![allow(clippy::must_use_candidate)]

mod error;

pub use error::{HttpError, retry_after_secs};
