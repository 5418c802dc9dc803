//! Fake chat-completions upstream for integration tests
//!
//! Speaks the `/v1/chat/completions` schema, records when each call started
//! and finished, and can be scripted to rate limit or stall.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One call the upstream served
#[derive(Debug, Clone)]
pub struct Call {
    pub started: Instant,
    pub finished: Instant,
    pub body: Value,
    pub headers: HeaderMap,
}

struct UpstreamState {
    calls: Mutex<Vec<Call>>,
    attempts: AtomicU32,
    /// Remaining calls answered with 429
    rate_limited: AtomicU32,
    retry_after: Option<String>,
    latency: Duration,
    reply: String,
}

pub struct FakeUpstream {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<UpstreamState>,
}

pub struct FakeUpstreamBuilder {
    rate_limited: u32,
    retry_after: Option<String>,
    latency: Duration,
    reply: String,
}

impl FakeUpstreamBuilder {
    /// Answer the first `n` calls with 429
    pub fn rate_limited(mut self, n: u32, retry_after: Option<&str>) -> Self {
        self.rate_limited = n;
        self.retry_after = retry_after.map(str::to_owned);
        self
    }

    /// Hold every successful reply for `latency`
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn reply(mut self, reply: &str) -> Self {
        reply.clone_into(&mut self.reply);
        self
    }

    pub async fn start(self) -> anyhow::Result<FakeUpstream> {
        let state = Arc::new(UpstreamState {
            calls: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
            rate_limited: AtomicU32::new(self.rate_limited),
            retry_after: self.retry_after,
            latency: self.latency,
            reply: self.reply,
        });

        let app = Router::new()
            .route("/v1/chat/completions", routing::post(chat_completions))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .ok();
        });

        Ok(FakeUpstream { addr, shutdown, state })
    }
}

impl FakeUpstream {
    pub fn builder() -> FakeUpstreamBuilder {
        FakeUpstreamBuilder {
            rate_limited: 0,
            retry_after: None,
            latency: Duration::ZERO,
            reply: "Hello from the fake upstream".to_owned(),
        }
    }

    pub async fn start() -> anyhow::Result<Self> {
        Self::builder().start().await
    }

    /// Base URL providers are configured with
    pub fn base_url(&self) -> String {
        format!("http://{}/v1", self.addr)
    }

    /// Every call that got past the rate limiter, in completion order
    pub fn calls(&self) -> Vec<Call> {
        self.state.calls.lock().expect("calls lock").clone()
    }

    /// Every call received, 429s included
    pub fn attempts(&self) -> u32 {
        self.state.attempts.load(Ordering::SeqCst)
    }
}

impl Drop for FakeUpstream {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn chat_completions(State(state): State<Arc<UpstreamState>>, headers: HeaderMap, Json(body): Json<Value>) -> Response {
    let started = Instant::now();
    state.attempts.fetch_add(1, Ordering::SeqCst);

    let limited = state
        .rate_limited
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if limited {
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"message": "slow down"}})),
        )
            .into_response();
        if let Some(retry_after) = &state.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, retry_after.parse().expect("valid header"));
        }
        return response;
    }

    tokio::time::sleep(state.latency).await;

    let stream = body["stream"].as_bool().unwrap_or(false);
    let model = body["model"].as_str().unwrap_or_default().to_owned();

    state.calls.lock().expect("calls lock").push(Call {
        started,
        finished: Instant::now(),
        body,
        headers,
    });

    if stream {
        sse_reply(&state.reply, &model)
    } else {
        Json(json!({
            "id": "chatcmpl-fake",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": model,
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": state.reply},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 6, "total_tokens": 11}
        }))
        .into_response()
    }
}

/// Reply split into word chunks, a finish chunk, a usage chunk, then `[DONE]`
fn sse_reply(reply: &str, model: &str) -> Response {
    let mut body = String::new();

    for (index, word) in reply.split_inclusive(' ').enumerate() {
        let mut delta = json!({"content": word});
        if index == 0 {
            delta["role"] = json!("assistant");
        }
        let chunk = json!({
            "id": "chatcmpl-fake",
            "object": "chat.completion.chunk",
            "model": model,
            "choices": [{"index": 0, "delta": delta, "finish_reason": null}]
        });
        body.push_str(&format!("data: {chunk}\n\n"));
    }

    let finish = json!({
        "id": "chatcmpl-fake",
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
    });
    body.push_str(&format!("data: {finish}\n\n"));

    let usage = json!({
        "id": "chatcmpl-fake",
        "object": "chat.completion.chunk",
        "model": model,
        "choices": [],
        "usage": {"prompt_tokens": 5, "completion_tokens": 6, "total_tokens": 11}
    });
    body.push_str(&format!("data: {usage}\n\n"));
    body.push_str("data: [DONE]\n\n");

    ([(header::CONTENT_TYPE, "text/event-stream")], body).into_response()
}
