//! Stream translation engine
//!
//! Drives one adapter over one upstream response and turns its fragments
//! into canonical events. All reconstruction state for the request lives in
//! a [`StreamState`] owned by the returned stream, so no two requests ever
//! share it.
//!
//! Lifecycle: `Opening` until the first delta, `Streaming` while deltas
//! arrive, `Closing` once a terminal event has been produced, then `Done`
//! (or `Failed` after an upstream error). Nothing is accepted after the
//! terminal event, whatever bytes still arrive.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chatmux_gate::Permit;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;

use crate::error::LlmError;
use crate::provider::{FragmentStream, Provider, RawResponse};
use crate::types::{CanonicalEvent, ErrorKind, FinishReason, ToolCall, Usage};

/// Canonical events of one request, finite and not restartable
pub type EventStream = BoxStream<'static, CanonicalEvent>;

/// Sentinel some upstreams send after the last data frame
const DONE_SENTINEL: &str = "[DONE]";

/// Lifecycle phase of a translation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Opening,
    Streaming,
    Closing,
    Done,
    Failed,
}

/// Accumulated state of one tool call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallState {
    pub id: Option<String>,
    /// First non-empty name wins
    pub name: Option<String>,
    /// Fragments concatenated in arrival order
    pub arguments: String,
}

/// Per-request reconstruction state
#[derive(Debug, Default)]
pub struct StreamState {
    phase: Phase,
    content: String,
    reasoning: String,
    tool_calls: BTreeMap<u32, ToolCallState>,
    tool_keys: HashMap<String, u32>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
    error: Option<(ErrorKind, String)>,
    /// A `<think>` block is open in the content stream
    pub(crate) think_open: bool,
    /// The `<think>` block has been closed and may not reopen
    pub(crate) think_closed: bool,
    /// A new summary part started; separate it from the previous one
    pub(crate) paragraph_pending: bool,
    pub(crate) saw_summary: bool,
}

impl StreamState {
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a terminal event has been produced
    pub const fn is_closed(&self) -> bool {
        matches!(self.phase, Phase::Closing | Phase::Done | Phase::Failed)
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn tool_call(&self, index: u32) -> Option<&ToolCallState> {
        self.tool_calls.get(&index)
    }

    /// Stable tool index for an upstream item key, assigned in first-seen order
    pub fn tool_index(&mut self, key: &str) -> u32 {
        if let Some(index) = self.tool_keys.get(key) {
            return *index;
        }

        let next = u32::try_from(self.tool_keys.len()).unwrap_or(u32::MAX);
        self.tool_keys.insert(key.to_owned(), next);
        next
    }

    /// Whether an upstream item key already has a tool index
    pub fn knows_tool_key(&self, key: &str) -> bool {
        self.tool_keys.contains_key(key)
    }

    /// Remember the upstream finish reason; the first one sticks
    pub fn record_finish(&mut self, reason: FinishReason) {
        if self.finish_reason.is_none() && !self.is_closed() {
            self.finish_reason = Some(reason);
        }
    }

    /// Remember usage reported ahead of the terminal marker
    pub fn record_usage(&mut self, usage: Usage) {
        if !self.is_closed() {
            self.usage = Some(usage);
        }
    }

    /// Terminal event for a cleanly finished response
    ///
    /// Uses the recorded finish reason, else `tool_calls` when any tool call
    /// was seen, else `stop`.
    pub fn completion(&self) -> CanonicalEvent {
        let finish_reason = self.finish_reason.unwrap_or(if self.has_tool_calls() {
            FinishReason::ToolCalls
        } else {
            FinishReason::Stop
        });

        CanonicalEvent::Done {
            finish_reason,
            usage: self.usage,
        }
    }

    /// Fold one adapter event into the state
    ///
    /// Returns the event to forward, or `None` when it carries nothing new
    /// or arrives after the terminal event.
    pub fn apply(&mut self, event: CanonicalEvent) -> Option<CanonicalEvent> {
        if self.is_closed() {
            tracing::trace!(?event, phase = ?self.phase, "dropping event after terminal");
            return None;
        }

        match event {
            CanonicalEvent::ContentDelta { text } => {
                if text.is_empty() {
                    return None;
                }
                self.phase = Phase::Streaming;
                self.content.push_str(&text);
                Some(CanonicalEvent::ContentDelta { text })
            }
            CanonicalEvent::ReasoningDelta { text } => {
                if text.is_empty() {
                    return None;
                }
                self.phase = Phase::Streaming;
                self.reasoning.push_str(&text);
                Some(CanonicalEvent::ReasoningDelta { text })
            }
            CanonicalEvent::ToolCallDelta {
                index,
                id,
                name,
                arguments,
            } => self.apply_tool_delta(index, id, name, arguments),
            CanonicalEvent::Done { finish_reason, usage } => {
                let finish_reason = *self.finish_reason.get_or_insert(finish_reason);
                if usage.is_some() {
                    self.usage = usage;
                }
                self.phase = Phase::Closing;

                Some(CanonicalEvent::Done {
                    finish_reason,
                    usage: self.usage,
                })
            }
            CanonicalEvent::Error { kind, message } => {
                self.phase = Phase::Failed;
                self.error = Some((kind, message.clone()));
                Some(CanonicalEvent::Error { kind, message })
            }
        }
    }

    fn apply_tool_delta(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) -> Option<CanonicalEvent> {
        let id = id.filter(|v| !v.is_empty());
        let name = name.filter(|v| !v.is_empty());
        let arguments = arguments.filter(|v| !v.is_empty());

        if id.is_none() && name.is_none() && arguments.is_none() {
            return None;
        }

        let call = self.tool_calls.entry(index).or_default();

        let id = id.filter(|_| call.id.is_none());
        if let Some(id) = &id {
            call.id = Some(id.clone());
        }

        let name = name.filter(|_| call.name.is_none());
        if let Some(name) = &name {
            call.name = Some(name.clone());
        }

        if let Some(arguments) = &arguments {
            call.arguments.push_str(arguments);
        }

        if id.is_none() && name.is_none() && arguments.is_none() {
            return None;
        }

        self.phase = Phase::Streaming;

        Some(CanonicalEvent::ToolCallDelta {
            index,
            id,
            name,
            arguments,
        })
    }

    /// The upstream has been drained after the terminal event
    fn mark_drained(&mut self) {
        if self.phase == Phase::Closing {
            self.phase = Phase::Done;
        }
    }

    fn into_aggregate(self) -> Aggregate {
        let finish_reason = match self.phase {
            Phase::Closing | Phase::Done => self.finish_reason,
            _ => None,
        };

        Aggregate {
            content: self.content,
            reasoning: self.reasoning,
            tool_calls: self
                .tool_calls
                .into_iter()
                .map(|(index, call)| ToolCall {
                    id: call.id.unwrap_or_else(|| format!("call_{index}")),
                    name: call.name.unwrap_or_default(),
                    arguments: call.arguments,
                })
                .collect(),
            finish_reason,
            usage: self.usage,
            error: self.error,
        }
    }
}

/// Whole response assembled from an event stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregate {
    pub content: String,
    pub reasoning: String,
    pub tool_calls: Vec<ToolCall>,
    /// Set when the stream ended in `Done`
    pub finish_reason: Option<FinishReason>,
    pub usage: Option<Usage>,
    /// Set when the stream ended in `Error`
    pub error: Option<(ErrorKind, String)>,
}

/// Drain an event stream into one aggregate, for non-streaming replies
pub async fn collect(mut events: EventStream) -> Aggregate {
    let mut state = StreamState::default();
    while let Some(event) = events.next().await {
        state.apply(event);
    }
    state.into_aggregate()
}

struct Engine {
    provider: Arc<dyn Provider>,
    fragments: Option<FragmentStream>,
    state: StreamState,
    pending: VecDeque<CanonicalEvent>,
    permit: Option<Permit>,
}

impl Engine {
    fn push(&mut self, event: CanonicalEvent) {
        if let Some(event) = self.state.apply(event) {
            self.pending.push_back(event);
        }
    }

    fn push_all(&mut self, events: Vec<CanonicalEvent>) {
        for event in events {
            self.push(event);
        }
    }

    fn fail(&mut self, error: &LlmError) {
        tracing::warn!(provider = %self.provider.name(), error = %error, "upstream response failed");

        self.push(CanonicalEvent::Error {
            kind: error.kind(),
            message: error.to_string(),
        });
    }

    fn complete(&mut self) {
        let done = self.state.completion();
        self.push(done);
    }

    fn on_fragment(&mut self, fragment: &str) {
        let fragment = fragment.trim();

        if fragment.is_empty() {
            return;
        }

        if fragment == DONE_SENTINEL {
            self.complete();
            return;
        }

        match self.provider.parse_stream_fragment(fragment, &mut self.state) {
            Ok(events) => self.push_all(events),
            Err(error) => self.fail(&error),
        }
    }

    /// Stop reading upstream and give the slot back
    fn finish(&mut self) {
        self.fragments = None;
        if let Some(mut permit) = self.permit.take() {
            permit.release();
        }
        self.state.mark_drained();
    }
}

/// Translate one upstream response into canonical events
///
/// The permit, when given, is held until the terminal event has been pulled
/// or the stream is dropped; dropping the stream early also drops the
/// upstream connection.
pub fn translate(provider: Arc<dyn Provider>, raw: RawResponse, permit: Option<Permit>) -> EventStream {
    let mut engine = Engine {
        provider,
        fragments: None,
        state: StreamState::default(),
        pending: VecDeque::new(),
        permit,
    };

    match raw {
        RawResponse::Complete(body) => {
            match engine.provider.parse_complete_response(&body, &mut engine.state) {
                Ok(events) => engine.push_all(events),
                Err(error) => engine.fail(&error),
            }
            if !engine.state.is_closed() {
                engine.complete();
            }
        }
        RawResponse::Stream(fragments) => engine.fragments = Some(fragments),
    }

    stream::unfold(engine, |mut engine| async move {
        loop {
            if let Some(event) = engine.pending.pop_front() {
                return Some((event, engine));
            }

            if engine.state.is_closed() {
                engine.finish();
                return None;
            }

            let next = match engine.fragments.as_mut() {
                Some(fragments) => fragments.next().await,
                None => None,
            };

            match next {
                Some(Ok(fragment)) => engine.on_fragment(&fragment),
                Some(Err(error)) => engine.fail(&error),
                None => engine.complete(),
            }
        }
    })
    .boxed()
}
