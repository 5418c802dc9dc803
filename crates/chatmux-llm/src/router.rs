//! Axum route handlers for the OpenAI-compatible endpoints

use std::convert::Infallible;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing};
use chatmux_config::ReasoningCompat;
use chatmux_core::{HttpError, retry_after_secs};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::convert::openai::{ChunkContext, finish_reason_wire, openai_usage};
use crate::error::LlmError;
use crate::gateway::{Completion, Gateway};
use crate::protocol::openai::{
    ChatCompletionRequest, OpenAiModel, OpenAiModelList, TextChoice, TextCompletion, TextCompletionRequest,
};
use crate::stream::{Aggregate, collect};
use crate::types::{CanonicalEvent, CanonicalRequest, ErrorKind, FinishReason};
use crate::validate::Inbound;

const SESSION_ID_HEADER: &str = "x-session-id";

const TRUNCATED_HEADER: HeaderName = HeaderName::from_static("x-context-truncated");

const DONE_FRAME: &str = "[DONE]";

/// Shared state for the LLM route handlers
#[derive(Clone)]
pub struct LlmState {
    gateway: Gateway,
    compat: ReasoningCompat,
}

impl LlmState {
    pub const fn new(gateway: Gateway, compat: ReasoningCompat) -> Self {
        Self { gateway, compat }
    }

    pub const fn gateway(&self) -> &Gateway {
        &self.gateway
    }
}

/// Query parameters accepted by the completion endpoints
#[derive(Debug, Default, Deserialize)]
struct CompletionQuery {
    provider: Option<String>,
    chat_id: Option<String>,
}

/// Build the LLM router with all endpoints
pub fn llm_router(state: LlmState) -> Router {
    Router::new()
        .route("/v1/chat/completions", routing::post(chat_completions))
        .route("/v1/completions", routing::post(text_completions))
        .route("/v1/models", routing::get(list_models))
        .with_state(state)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn response_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}

/// Read and parse a JSON body under the configured size limit
async fn read_json<T: DeserializeOwned>(body: Body, limit: usize) -> Result<(T, usize), LlmError> {
    let bytes = axum::body::to_bytes(body, limit.saturating_add(1))
        .await
        .map_err(|_| LlmError::InvalidRequest(format!("request body unreadable or larger than {limit} bytes")))?;

    let parsed = serde_json::from_slice(&bytes)
        .map_err(|e| LlmError::InvalidRequest(format!("invalid JSON body: {e}")))?;

    Ok((parsed, bytes.len()))
}

fn session_id(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_ID_HEADER).and_then(|v| v.to_str().ok())
}

/// Validate and admit a request, counting pre-admission rejections
async fn admit<T, F>(
    state: &LlmState,
    query: &CompletionQuery,
    headers: &HeaderMap,
    body: Body,
    validate: F,
) -> Result<(Completion, bool), LlmError>
where
    T: DeserializeOwned,
    F: FnOnce(T, &Inbound<'_>, &dyn crate::provider::Provider) -> Result<CanonicalRequest, LlmError>,
{
    let gateway = &state.gateway;

    let prepared = async {
        let provider = gateway.provider(query.provider.as_deref())?;
        let (parsed, body_bytes) = read_json(body, gateway.validator().max_body_bytes()).await?;

        let inbound = Inbound {
            body_bytes,
            session_id: session_id(headers),
            chat_id: query.chat_id.as_deref(),
        };

        validate(parsed, &inbound, provider.as_ref())
    }
    .await;

    let request = match prepared {
        Ok(request) => request,
        Err(error) => {
            tracing::debug!(error = %error, "request rejected before admission");
            gateway.record_rejection();
            return Err(error);
        }
    };

    let include_usage = request.include_usage;
    let completion = gateway.handle(request, gateway.deadline()).await?;
    Ok((completion, include_usage))
}

// -- Handlers --

/// Handle `POST /v1/chat/completions`
async fn chat_completions(
    State(state): State<LlmState>,
    Query(query): Query<CompletionQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let admitted = admit(&state, &query, &headers, body, |request: ChatCompletionRequest, inbound, provider| {
        state.gateway.validator().chat(request, inbound, provider)
    })
    .await;

    let (completion, include_usage) = match admitted {
        Ok(admitted) => admitted,
        Err(error) => return error_response(&error),
    };

    let context = ChunkContext {
        id: response_id("chatcmpl"),
        model: completion.model.clone(),
        created: unix_now(),
        compat: state.compat,
    };
    let truncated = completion.truncated;

    let response = if completion.stream {
        chat_stream(completion, context, include_usage).into_response()
    } else {
        let aggregate = collect(completion.events).await;
        match aggregate_failure(&aggregate) {
            Some(response) => response,
            None => Json(context.completion(&aggregate)).into_response(),
        }
    };

    with_truncation_header(response, truncated)
}

/// Handle `POST /v1/completions`
async fn text_completions(
    State(state): State<LlmState>,
    Query(query): Query<CompletionQuery>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let admitted = admit(&state, &query, &headers, body, |request: TextCompletionRequest, inbound, provider| {
        state.gateway.validator().text(request, inbound, provider)
    })
    .await;

    let (completion, include_usage) = match admitted {
        Ok(admitted) => admitted,
        Err(error) => return error_response(&error),
    };

    let frame = TextFrame {
        id: response_id("cmpl"),
        model: completion.model.clone(),
        created: unix_now(),
    };
    let truncated = completion.truncated;

    let response = if completion.stream {
        text_stream(completion, frame, include_usage).into_response()
    } else {
        let aggregate = collect(completion.events).await;
        match aggregate_failure(&aggregate) {
            Some(response) => response,
            None => Json(frame.completion(&aggregate)).into_response(),
        }
    };

    with_truncation_header(response, truncated)
}

/// Handle `GET /v1/models`
async fn list_models(State(state): State<LlmState>) -> Response {
    let data = state
        .gateway
        .models()
        .into_iter()
        .map(|(id, owned_by)| OpenAiModel {
            id,
            object: "model".to_owned(),
            owned_by,
        })
        .collect();

    Json(OpenAiModelList {
        object: "list".to_owned(),
        data,
    })
    .into_response()
}

// -- Framing --

fn with_truncation_header(mut response: Response, truncated: bool) -> Response {
    if truncated {
        response.headers_mut().insert(TRUNCATED_HEADER, HeaderValue::from_static("true"));
    }
    response
}

fn data_frame<T: serde::Serialize>(payload: &T) -> Event {
    Event::default().data(serde_json::to_string(payload).unwrap_or_default())
}

fn error_frame(kind: ErrorKind, message: &str) -> Event {
    data_frame(&json!({
        "error": {
            "message": message,
            "type": stream_error_type(kind),
            "code": kind.as_ref(),
        }
    }))
}

const fn stream_error_type(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::UpstreamRateLimited => "rate_limit",
        ErrorKind::Unauthenticated => "authentication_error",
        ErrorKind::Internal => "internal_error",
        ErrorKind::UpstreamProtocol | ErrorKind::UpstreamTransport | ErrorKind::UpstreamStatus => "upstream",
    }
}

const fn aggregate_status(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UpstreamRateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        ErrorKind::UpstreamProtocol | ErrorKind::UpstreamTransport | ErrorKind::UpstreamStatus => {
            StatusCode::BAD_GATEWAY
        }
    }
}

/// Error reply for a non-streaming response that ended in `Error`
fn aggregate_failure(aggregate: &Aggregate) -> Option<Response> {
    let (kind, message) = aggregate.error.as_ref()?;

    let body = json!({
        "error": {
            "message": message,
            "type": stream_error_type(*kind),
            "code": kind.as_ref(),
        }
    });

    Some((aggregate_status(*kind), Json(body)).into_response())
}

/// SSE stream of `chat.completion.chunk` frames ending in `[DONE]`
fn chat_stream(
    completion: Completion,
    context: ChunkContext,
    include_usage: bool,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut first = true;

    let frames = completion
        .events
        .flat_map(move |event| {
            let frames = match &event {
                CanonicalEvent::Done { finish_reason, usage } => {
                    let mut frames = vec![data_frame(&context.finish_chunk(*finish_reason))];
                    if include_usage && let Some(usage) = usage {
                        frames.push(data_frame(&context.usage_chunk(*usage)));
                    }
                    frames
                }
                CanonicalEvent::Error { kind, message } => vec![error_frame(*kind, message)],
                delta => context
                    .delta_chunk(delta, std::mem::take(&mut first))
                    .map(|chunk| data_frame(&chunk))
                    .into_iter()
                    .collect(),
            };
            stream::iter(frames)
        })
        .chain(stream::once(async { Event::default().data(DONE_FRAME) }))
        .map(Ok);

    Sse::new(frames).keep_alive(KeepAlive::default())
}

/// Identity fields of one text completion response
struct TextFrame {
    id: String,
    model: String,
    created: u64,
}

impl TextFrame {
    fn build(&self, object: &str, text: String, finish_reason: Option<FinishReason>) -> TextCompletion {
        TextCompletion {
            id: self.id.clone(),
            object: object.to_owned(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![TextChoice {
                index: 0,
                text,
                finish_reason: finish_reason.map(|r| finish_reason_wire(r).to_owned()),
            }],
            usage: None,
        }
    }

    fn completion(&self, aggregate: &Aggregate) -> TextCompletion {
        TextCompletion {
            usage: aggregate.usage.map(openai_usage),
            ..self.build(
                "text_completion",
                aggregate.content.clone(),
                Some(aggregate.finish_reason.unwrap_or(FinishReason::Stop)),
            )
        }
    }
}

/// SSE stream of `text_completion.chunk` frames ending in `[DONE]`
///
/// Only content reaches the client; reasoning and tool calls have no
/// place in the text completion shape.
fn text_stream(
    completion: Completion,
    frame: TextFrame,
    include_usage: bool,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let frames = completion
        .events
        .flat_map(move |event| {
            let frames = match event {
                CanonicalEvent::ContentDelta { text } => {
                    vec![data_frame(&frame.build("text_completion.chunk", text, None))]
                }
                CanonicalEvent::Done { finish_reason, usage } => {
                    let mut frames = vec![data_frame(&frame.build(
                        "text_completion.chunk",
                        String::new(),
                        Some(finish_reason),
                    ))];
                    if include_usage && let Some(usage) = usage {
                        let chunk = TextCompletion {
                            choices: Vec::new(),
                            usage: Some(openai_usage(usage)),
                            ..frame.build("text_completion.chunk", String::new(), None)
                        };
                        frames.push(data_frame(&chunk));
                    }
                    frames
                }
                CanonicalEvent::Error { kind, message } => vec![error_frame(kind, &message)],
                CanonicalEvent::ReasoningDelta { .. } | CanonicalEvent::ToolCallDelta { .. } => Vec::new(),
            };
            stream::iter(frames)
        })
        .chain(stream::once(async { Event::default().data(DONE_FRAME) }))
        .map(Ok);

    Sse::new(frames).keep_alive(KeepAlive::default())
}

/// Convert an LLM error to an `OpenAI`-style JSON error response
fn error_response(error: &LlmError) -> Response {
    let status = error.status_code();

    let mut details = serde_json::Map::new();
    if let Some(retry_after) = error.retry_after() {
        details.insert("retry_after".to_owned(), json!(retry_after_secs(retry_after)));
    }
    if let Some(upstream_status) = error.upstream_status() {
        details.insert("upstream_status".to_owned(), json!(upstream_status));
    }

    let mut body = json!({
        "error": {
            "message": error.client_message(),
            "type": error.error_type(),
            "code": status.as_u16(),
        }
    });
    if !details.is_empty() {
        body["error"]["details"] = serde_json::Value::Object(details);
    }

    let mut response = (status, Json(body)).into_response();
    if let Some(retry_after) = error.retry_after() {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    }
    response
}
