// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncEvent`]: a manual-reset broadcast flag.

use std::sync::Mutex;

use tracing::{Level, event};

use crate::error::Result;
use crate::executor::{HandlerDispatch, SharedExecutor};
use crate::serializer::Serializer;
use crate::waiter::{WaitOptions, WaitQueue, race_waiter};

const POISONED: &str = "acore serializer-protected state must not be poisoned";

struct State {
    signaled: bool,
    queue: WaitQueue<()>,
}

/// A manual-reset broadcast flag.
///
/// `notify_all` wakes every current waiter and latches the event open: later callers of
/// [`AsyncEvent::async_wait`] complete immediately until [`AsyncEvent::reset`] is called.
///
/// Invariant: `signaled` implies the wait queue is empty — any waiter that observes `signaled`
/// completes inline (via a posted completion) instead of being enqueued.
pub struct AsyncEvent {
    serializer: Serializer,
    state: Mutex<State>,
    handlers: HandlerDispatch,
}

impl AsyncEvent {
    /// Creates an unsignaled event with a dedicated serializer and the library default executor.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new() -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), SharedExecutor::default())
    }

    /// Creates an unsignaled event using `executor` as the default for handlers that advertise
    /// none of their own.
    #[must_use]
    pub fn with_executor(executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), executor)
    }

    /// Creates an unsignaled event sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(serializer, SharedExecutor::default())
    }

    /// Creates an unsignaled event with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            serializer,
            state: Mutex::new(State { signaled: false, queue: WaitQueue::default() }),
            handlers: HandlerDispatch::new(executor),
        }
    }

    /// Sets the event and wakes every current waiter with success.
    ///
    /// Idempotent: calling this repeatedly with no intervening [`AsyncEvent::reset`] is a no-op
    /// on the queue, since it is already empty after the first call.
    pub async fn notify_all(&self) {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);
        state.signaled = true;
        let drained: Vec<_> = state.queue.drain().collect();
        drop(state);
        event!(Level::DEBUG, message = "event notify_all", released = drained.len());
        for waiter in drained {
            waiter.complete(Ok(()));
        }
    }

    /// Clears the signaled flag. Waiters already drained by a prior `notify_all` are unaffected.
    pub async fn reset(&self) {
        let _serial = self.serializer.lock().await;
        self.state.lock().expect(POISONED).signaled = false;
    }

    /// Returns `true` if the event is currently signaled, without waiting.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.state.lock().expect(POISONED).signaled
    }

    /// Waits for the event to become signaled.
    pub async fn async_wait(&self) -> Result<()> {
        self.async_wait_opts(WaitOptions::default()).await
    }

    /// Waits for the event, honoring an optional associated executor, cancellation slot, and
    /// deadline.
    pub async fn async_wait_opts(&self, opts: WaitOptions) -> Result<()> {
        let WaitOptions { executor, cancel, deadline } = opts;

        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);

        if state.signaled {
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
impl Default for AsyncEvent {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AsyncEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let signaled = self.state.lock().map(|s| s.signaled).unwrap_or(false);
        f.debug_struct("AsyncEvent").field("signaled", &signaled).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncEvent: Send, Sync);

    #[tokio::test]
    async fn try_wait_false_before_notify() {
        let event = AsyncEvent::new();
        assert!(!event.try_wait());
    }

    #[tokio::test]
    async fn notify_then_wait_completes_inline() {
        let event = AsyncEvent::new();
        event.notify_all().await;
        assert!(event.try_wait());
        event.async_wait().await.unwrap();
    }

    #[tokio::test]
    async fn waiters_enqueued_before_notify_are_all_released() {
        let event = Arc::new(AsyncEvent::new());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let event = Arc::clone(&event);
            tasks.push(tokio::spawn(async move { event.async_wait().await }));
        }

        // Ensure all waiters have had a chance to enqueue.
        tokio::time::sleep(Duration::from_millis(10)).await;
        event.notify_all().await;

        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn repeated_notify_with_no_reset_is_idempotent() {
        let event = AsyncEvent::new();
        event.notify_all().await;
        event.notify_all().await;
        event.notify_all().await;
        assert!(event.try_wait());
    }

    #[tokio::test]
    async fn reset_after_notify_blocks_future_waiters() {
        let event = Arc::new(AsyncEvent::new());
        event.notify_all().await;
        event.reset().await;
        assert!(!event.try_wait());

        let waiter_event = Arc::clone(&event);
        let task = tokio::spawn(async move { waiter_event.async_wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        event.notify_all().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_removes_waiter_before_notify() {
        let event = Arc::new(AsyncEvent::new());
        let token = tokio_util::sync::CancellationToken::new();

        let waiter_event = Arc::clone(&event);
        let waiter_token = token.clone();
        let task = tokio::spawn(async move {
            waiter_event.async_wait_opts(WaitOptions::new().cancellable_with(waiter_token)).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(crate::Error::Cancelled)));
    }

    #[tokio::test]
    async fn timeout_reports_timed_out_and_does_not_block_notify() {
        let event = AsyncEvent::new();
        let result = event.async_wait_opts(WaitOptions::new().timeout(Duration::from_millis(5))).await;
        assert!(matches!(result, Err(crate::Error::TimedOut)));
    }
}
