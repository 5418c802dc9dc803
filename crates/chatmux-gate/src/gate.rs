use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use chatmux_config::GateConfig;
use serde::Serialize;
use tokio::{sync::oneshot, time::Instant};

use crate::{bucket::TokenBucket, error::AdmissionError};

/// Suggested client back-off for admission rejections
const RETRY_AFTER: Duration = Duration::from_secs(2);

/// Gate limits
#[derive(Debug, Clone, Copy)]
pub struct GateSettings {
    pub max_concurrency: usize,
    pub queue_limit: usize,
    pub rate_limit_rps: f64,
    pub queue_timeout: Duration,
}

impl GateSettings {
    pub fn from_config(config: &GateConfig) -> Result<Self, AdmissionError> {
        let queue_timeout = config
            .queue_timeout()
            .map_err(|e| AdmissionError::Config(e.to_string()))?;

        Ok(Self {
            max_concurrency: config.max_concurrency,
            queue_limit: config.queue_limit,
            rate_limit_rps: config.rate_limit_rps,
            queue_timeout,
        })
    }
}

/// Point-in-time view of the gate counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateMetrics {
    pub max_concurrency: usize,
    pub queue_limit: usize,
    pub active: usize,
    pub queue_depth: usize,
    pub admitted: u64,
    pub rejected_queue_full: u64,
    pub rejected_queue_timeout: u64,
}

/// A queued admission request
struct WaitTicket {
    id: u64,
    enqueued_at: Instant,
    tx: oneshot::Sender<()>,
}

struct State {
    available: usize,
    waiters: VecDeque<WaitTicket>,
    next_id: u64,
}

#[derive(Default)]
struct Counters {
    active: AtomicUsize,
    queue_depth: AtomicUsize,
    admitted: AtomicU64,
    rejected_queue_full: AtomicU64,
    rejected_queue_timeout: AtomicU64,
}

struct Shared {
    settings: GateSettings,
    state: Mutex<State>,
    bucket: Option<TokenBucket>,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a freed slot to the oldest live waiter, or return it to the pool
    fn release_locked(&self, state: &mut State) {
        while let Some(ticket) = state.waiters.pop_front() {
            if ticket.tx.send(()).is_ok() {
                self.counters.queue_depth.store(state.waiters.len(), Ordering::Relaxed);
                tracing::trace!(
                    ticket = ticket.id,
                    waited_ms = ticket.enqueued_at.elapsed().as_millis(),
                    "slot handed to queued request"
                );
                return;
            }
        }

        self.counters.queue_depth.store(0, Ordering::Relaxed);
        state.available = (state.available + 1).min(self.settings.max_concurrency);
    }

    fn release(&self) {
        self.counters.active.fetch_sub(1, Ordering::Relaxed);
        let mut state = self.lock();
        self.release_locked(&mut state);
    }

    fn remove_waiter(&self, state: &mut State, id: u64) -> bool {
        let Some(position) = state.waiters.iter().position(|t| t.id == id) else {
            return false;
        };

        state.waiters.remove(position);
        self.counters.queue_depth.store(state.waiters.len(), Ordering::Relaxed);
        true
    }
}

/// FIFO concurrency gate composed with a token bucket
///
/// Cloning is cheap; clones share the same slots and queue.
#[derive(Clone)]
pub struct Gate {
    shared: Arc<Shared>,
}

impl Gate {
    pub fn new(settings: GateSettings) -> Result<Self, AdmissionError> {
        if settings.max_concurrency == 0 {
            return Err(AdmissionError::Config("max_concurrency must be at least 1".to_string()));
        }

        let bucket = TokenBucket::new(settings.rate_limit_rps)?;

        tracing::debug!(
            max_concurrency = settings.max_concurrency,
            queue_limit = settings.queue_limit,
            rate_limit_rps = settings.rate_limit_rps,
            "admission gate created"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                settings,
                state: Mutex::new(State {
                    available: settings.max_concurrency,
                    waiters: VecDeque::new(),
                    next_id: 0,
                }),
                bucket,
                counters: Counters::default(),
            }),
        })
    }

    pub fn from_config(config: &GateConfig) -> Result<Self, AdmissionError> {
        Self::new(GateSettings::from_config(config)?)
    }

    /// Default acquire wait for callers without their own deadline
    pub fn queue_timeout(&self) -> Duration {
        self.shared.settings.queue_timeout
    }

    /// Wait for a concurrency slot and a rate token
    ///
    /// Fails immediately with `QueueFull` when the wait queue is at its
    /// limit, and with `QueueTimeout` when `deadline` passes first. Dropping
    /// the returned future while queued withdraws the request.
    pub async fn acquire(&self, deadline: Instant) -> Result<Permit, AdmissionError> {
        let mut permit = self.acquire_slot(deadline).await?;

        if let Some(bucket) = &self.shared.bucket
            && !bucket.take(deadline).await
        {
            permit.release();
            return Err(self.timed_out());
        }

        self.shared.counters.admitted.fetch_add(1, Ordering::Relaxed);
        Ok(permit)
    }

    pub fn metrics(&self) -> GateMetrics {
        let counters = &self.shared.counters;

        GateMetrics {
            max_concurrency: self.shared.settings.max_concurrency,
            queue_limit: self.shared.settings.queue_limit,
            active: counters.active.load(Ordering::Relaxed),
            queue_depth: counters.queue_depth.load(Ordering::Relaxed),
            admitted: counters.admitted.load(Ordering::Relaxed),
            rejected_queue_full: counters.rejected_queue_full.load(Ordering::Relaxed),
            rejected_queue_timeout: counters.rejected_queue_timeout.load(Ordering::Relaxed),
        }
    }

    async fn acquire_slot(&self, deadline: Instant) -> Result<Permit, AdmissionError> {
        let mut guard = {
            let mut state = self.shared.lock();

            if state.available > 0 && state.waiters.is_empty() {
                state.available -= 1;
                return Ok(self.grant());
            }

            if state.waiters.len() >= self.shared.settings.queue_limit {
                self.shared.counters.rejected_queue_full.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(queue_depth = state.waiters.len(), "admission queue full");
                return Err(AdmissionError::QueueFull {
                    retry_after: RETRY_AFTER,
                });
            }

            let (tx, rx) = oneshot::channel();
            let id = state.next_id;
            state.next_id += 1;
            state.waiters.push_back(WaitTicket {
                id,
                enqueued_at: Instant::now(),
                tx,
            });
            self.shared
                .counters
                .queue_depth
                .store(state.waiters.len(), Ordering::Relaxed);

            WaitGuard {
                shared: &self.shared,
                id,
                rx,
                settled: false,
            }
        };

        let signalled = tokio::select! {
            result = &mut guard.rx => result.is_ok(),
            () = tokio::time::sleep_until(deadline) => false,
        };

        guard.settled = true;

        if signalled {
            return Ok(self.grant());
        }

        // the grant may have raced the deadline; only a still-queued ticket timed out
        let still_queued = {
            let mut state = self.shared.lock();
            self.shared.remove_waiter(&mut state, guard.id)
        };

        if still_queued {
            Err(self.timed_out())
        } else {
            Ok(self.grant())
        }
    }

    fn grant(&self) -> Permit {
        self.shared.counters.active.fetch_add(1, Ordering::Relaxed);
        Permit {
            shared: Some(Arc::clone(&self.shared)),
        }
    }

    fn timed_out(&self) -> AdmissionError {
        self.shared.counters.rejected_queue_timeout.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("admission deadline passed");
        AdmissionError::QueueTimeout {
            retry_after: RETRY_AFTER,
        }
    }
}

/// Withdraws a queued ticket when the acquiring future is dropped
struct WaitGuard<'a> {
    shared: &'a Shared,
    id: u64,
    rx: oneshot::Receiver<()>,
    settled: bool,
}

impl Drop for WaitGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        let mut state = self.shared.lock();

        if self.shared.remove_waiter(&mut state, self.id) {
            return;
        }

        // granted after the caller stopped waiting; pass the slot on
        if self.rx.try_recv().is_ok() {
            self.shared.release_locked(&mut state);
        }
    }
}

/// One granted concurrency slot
///
/// Released on drop; `release` may be called any number of times.
pub struct Permit {
    shared: Option<Arc<Shared>>,
}

impl Permit {
    pub fn release(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.release();
        }
    }

    pub const fn is_released(&self) -> bool {
        self.shared.is_none()
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Permit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Permit").field("released", &self.is_released()).finish()
    }
}
