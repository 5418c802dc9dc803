//! Shared fixtures for the end-to-end tests
//!
//! Each test binary uses a different subset.
#![allow(dead_code)]

pub mod config;
pub mod server;
pub mod upstream;

/// `data:` payloads of an SSE body, in order
pub fn sse_frames(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim().to_owned())
        .filter(|data| !data.is_empty())
        .collect()
}
