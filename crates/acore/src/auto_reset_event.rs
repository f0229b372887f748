// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncAutoResetEvent`]: a single-wake, edge-triggered flag with an internal signal count.

use std::sync::Mutex;

use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::executor::{HandlerDispatch, SharedExecutor};
use crate::serializer::Serializer;
use crate::waiter::{WaitOptions, WaitQueue, race_waiter};

const POISONED: &str = "acore serializer-protected state must not be poisoned";

struct State {
    signal_count: u64,
    queue: WaitQueue<()>,
}

/// A single-wake, edge-triggered flag.
///
/// Unlike [`AsyncEvent`](crate::AsyncEvent), a notification wakes at most one waiter and is
/// consumed by it; signals that arrive with nobody waiting accumulate in `signal_count` instead
/// of being coalesced, so `notify(3)` followed by three waits always satisfies exactly three.
///
/// Invariant: `signal_count > 0` implies the queue is empty, and a non-empty queue implies
/// `signal_count == 0`.
pub struct AsyncAutoResetEvent {
    serializer: Serializer,
    state: Mutex<State>,
    handlers: HandlerDispatch,
}

impl AsyncAutoResetEvent {
    /// Creates an event with zero pending signals.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new() -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), SharedExecutor::default())
    }

    /// Creates an event using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), executor)
    }

    /// Creates an event sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(serializer, SharedExecutor::default())
    }

    /// Creates an event with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            serializer,
            state: Mutex::new(State { signal_count: 0, queue: WaitQueue::default() }),
            handlers: HandlerDispatch::new(executor),
        }
    }

    /// Delivers `n` signals.
    ///
    /// For each of the `n` signals, in order: if a waiter is queued, it is popped and completed
    /// with success; otherwise the signal accumulates in `signal_count` for a future
    /// [`AsyncAutoResetEvent::async_wait`] to consume.
    pub async fn notify(&self, n: u64) {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);

        let mut woken = Vec::new();
        for _ in 0..n {
            if let Some(waiter) = state.queue.pop_front() {
                woken.push(waiter);
            } else {
                state.signal_count += 1;
            }
        }
        let signal_count = state.signal_count;
        drop(state);

        event!(Level::TRACE, message = "auto_reset_event notify", n, woken = woken.len(), signal_count);

        for waiter in woken {
            waiter.complete(Ok(()));
        }
    }

    /// Clears any pending signal count without touching the queue.
    pub async fn reset(&self) {
        let _serial = self.serializer.lock().await;
        self.state.lock().expect(POISONED).signal_count = 0;
    }

    /// Drains the wait queue, completing every waiter with [`Error::Cancelled`].
    pub async fn cancel_all(&self) {
        let _serial = self.serializer.lock().await;
        let drained: Vec<_> = self.state.lock().expect(POISONED).queue.drain().collect();
        drop(_serial);
        event!(Level::TRACE, message = "auto_reset_event cancel_all", cancelled = drained.len());
        for waiter in drained {
            waiter.complete(Err(Error::Cancelled));
        }
    }

    /// Attempts to consume a pending signal without waiting.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock().expect(POISONED);
        if state.signal_count > 0 {
            state.signal_count -= 1;
            true
        } else {
            false
        }
    }

    /// Waits for (and consumes) one signal.
    pub async fn async_wait(&self) -> Result<()> {
        self.async_wait_opts(WaitOptions::default()).await
    }

    /// Waits for one signal, honoring an optional associated executor, cancellation slot, and
    /// deadline.
    pub async fn async_wait_opts(&self, opts: WaitOptions) -> Result<()> {
        let WaitOptions { executor, cancel, deadline } = opts;

        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);

        if state.signal_count > 0 {
            state.signal_count -= 1;
            return Ok(());
        }

        let executor = self.handlers.resolve(executor);
        let (id, rx) = state.queue.push(executor, ());
        drop(state);
        drop(_serial);

        race_waiter(rx, cancel, deadline, || {
            Box::pin(async move {
                let _serial = self.serializer.lock().await;
                let mut state = self.state.lock().expect(POISONED);
                state.queue.remove(id).is_some()
            })
        })
        .await
    }
}

#[cfg(feature = "tokio")]
impl Default for AsyncAutoResetEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AsyncAutoResetEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signal_count = self.state.lock().map(|s| s.signal_count).unwrap_or(0);
        f.debug_struct("AsyncAutoResetEvent").field("signal_count", &signal_count).finish_non_exhaustive()
    }
}
