//! Request entry point: admission, retry and translation in one place

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chatmux_config::Config;
use chatmux_gate::{Gate, GateMetrics};
use futures_util::StreamExt;
use serde::Serialize;
use tokio::time::Instant;

use crate::error::LlmError;
use crate::provider::{Provider, ProviderRegistry};
use crate::retry::{RetryPolicy, with_retry};
use crate::stream::{EventStream, translate};
use crate::types::{CanonicalEvent, CanonicalRequest};
use crate::validate::Validator;

/// Context budget reported for `OpenRouter` clients that do not set one
const DEFAULT_CONTEXT_BUDGET: usize = 128_000;

/// An admitted request whose events are ready to be pulled
pub struct Completion {
    /// Provider that served the request
    pub provider: String,
    /// Model as requested by the client
    pub model: String,
    /// Client asked for incremental delivery
    pub stream: bool,
    /// Older history was dropped to fit the context budget
    pub truncated: bool,
    /// Canonical events, ending in `Done` or `Error`
    pub events: EventStream,
}

/// Point-in-time request counters plus the gate snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests_total: u64,
    pub streaming: u64,
    pub non_streaming: u64,
    pub errors: u64,
    pub retries: u64,
    pub truncations: u64,
    pub context_budget: usize,
    pub gate: GateMetrics,
}

#[derive(Debug, Default)]
struct Counters {
    requests_total: AtomicU64,
    streaming: AtomicU64,
    non_streaming: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    truncations: AtomicU64,
}

struct Inner {
    registry: ProviderRegistry,
    gate: Gate,
    retry: RetryPolicy,
    validator: Validator,
    counters: Arc<Counters>,
}

/// Shared gateway state, cheap to clone
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<Inner>,
}

impl Gateway {
    /// Build providers, gate and retry policy from configuration
    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        let registry = ProviderRegistry::from_config(&config.llm)?;
        let gate = Gate::from_config(&config.gate)?;
        let retry = RetryPolicy::from_config(&config.retry)?;

        tracing::info!(
            providers = registry.iter().count(),
            default_provider = %registry.default_provider(),
            max_concurrency = config.gate.max_concurrency,
            "gateway ready"
        );

        Ok(Self::new(registry, gate, retry, Validator::new(&config.llm)))
    }

    pub fn new(registry: ProviderRegistry, gate: Gate, retry: RetryPolicy, validator: Validator) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                gate,
                retry,
                validator,
                counters: Arc::new(Counters::default()),
            }),
        }
    }

    pub fn validator(&self) -> &Validator {
        &self.inner.validator
    }

    /// Resolve a provider by name, the default when `None`
    pub fn provider(&self, name: Option<&str>) -> Result<Arc<dyn Provider>, LlmError> {
        self.inner.registry.get(name)
    }

    /// Model ids of every configured provider, registry order
    pub fn models(&self) -> Vec<(String, String)> {
        self.inner
            .registry
            .iter()
            .flat_map(|provider| {
                let owner = provider.name().to_owned();
                provider.models().into_iter().map(move |model| (model, owner.clone()))
            })
            .collect()
    }

    /// Admission deadline for a request arriving now
    pub fn deadline(&self) -> Instant {
        Instant::now() + self.inner.gate.queue_timeout()
    }

    /// Count a request rejected before it reached [`Gateway::handle`]
    pub fn record_rejection(&self) {
        let counters = &self.inner.counters;
        counters.requests_total.fetch_add(1, Ordering::Relaxed);
        counters.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let counters = &self.inner.counters;
        MetricsSnapshot {
            requests_total: counters.requests_total.load(Ordering::Relaxed),
            streaming: counters.streaming.load(Ordering::Relaxed),
            non_streaming: counters.non_streaming.load(Ordering::Relaxed),
            errors: counters.errors.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            truncations: counters.truncations.load(Ordering::Relaxed),
            context_budget: DEFAULT_CONTEXT_BUDGET,
            gate: self.inner.gate.metrics(),
        }
    }

    /// Run one validated request
    ///
    /// The upstream call is built before admission, so unsupported features
    /// and missing credentials never take a slot. The permit travels with
    /// the returned event stream and is released at its terminal event or
    /// when the stream is dropped.
    pub async fn handle(&self, request: CanonicalRequest, deadline: Instant) -> Result<Completion, LlmError> {
        let counters = &self.inner.counters;
        counters.requests_total.fetch_add(1, Ordering::Relaxed);
        if request.stream {
            counters.streaming.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.non_streaming.fetch_add(1, Ordering::Relaxed);
        }

        let result = self.dispatch(request, deadline).await;
        if let Err(error) = &result {
            counters.errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(error = %error, kind = ?error.kind(), "request failed before streaming");
        }
        result
    }

    async fn dispatch(&self, request: CanonicalRequest, deadline: Instant) -> Result<Completion, LlmError> {
        let provider = self.inner.registry.get(Some(&request.provider))?;
        let call = provider.build_upstream_call(&request)?;

        if call.truncated {
            self.inner.counters.truncations.fetch_add(1, Ordering::Relaxed);
        }

        let permit = self.inner.gate.acquire(deadline).await?;

        tracing::debug!(
            provider = %provider.name(),
            model = %request.model,
            stream = request.stream,
            "request admitted"
        );

        let counters = Arc::clone(&self.inner.counters);
        let raw = with_retry(&self.inner.retry, provider.name(), |attempt| {
            if attempt > 1 {
                counters.retries.fetch_add(1, Ordering::Relaxed);
            }
            provider.invoke(&call)
        })
        .await?;

        let counters = Arc::clone(&self.inner.counters);
        let events = translate(Arc::clone(&provider), raw, Some(permit))
            .inspect(move |event| {
                if matches!(event, CanonicalEvent::Error { .. }) {
                    counters.errors.fetch_add(1, Ordering::Relaxed);
                }
            })
            .boxed();

        Ok(Completion {
            provider: provider.name().to_owned(),
            model: request.model,
            stream: request.stream,
            truncated: call.truncated,
            events,
        })
    }
}
