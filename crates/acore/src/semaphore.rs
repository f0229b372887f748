// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncSemaphore`]: a counting permit pool with FIFO fairness.

use std::sync::Mutex;

use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::executor::{HandlerDispatch, SharedExecutor};
use crate::serializer::Serializer;
use crate::waiter::{WaitOptions, WaitQueue, race_waiter};

const POISONED: &str = "acore serializer-protected state must not be poisoned";

struct State {
    permits: u64,
    queue: WaitQueue<(), u64>,
}

/// A counting permit pool.
///
/// Acquires are served strictly FIFO: a request for `n` permits at the head of the queue blocks
/// every request behind it, even ones for fewer permits than are currently available, so no
/// waiter can be starved by a stream of smaller requests cutting in line.
///
/// Invariant: `permits > 0` implies the queue is empty — any release that leaves permits spare
/// immediately tries to satisfy the head of the queue instead of banking them.
pub struct AsyncSemaphore {
    serializer: Serializer,
    state: Mutex<State>,
    handlers: HandlerDispatch,
}

impl AsyncSemaphore {
    /// Creates a semaphore starting with `initial_permits` available.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new(initial_permits: u64) -> Self {
        Self::with_serializer_and_executor(initial_permits, Serializer::owned(), SharedExecutor::default())
    }

    /// Creates a semaphore using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(initial_permits: u64, executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(initial_permits, Serializer::owned(), executor)
    }

    /// Creates a semaphore sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(initial_permits: u64, serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(initial_permits, serializer, SharedExecutor::default())
    }

    /// Creates a semaphore with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(initial_permits: u64, serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            serializer,
            state: Mutex::new(State { permits: initial_permits, queue: WaitQueue::default() }),
            handlers: HandlerDispatch::new(executor),
        }
    }

    /// Releases `n` permits, satisfying as many queued acquires as possible in FIFO order.
    ///
    /// A queued request for more permits than are currently banked blocks every request behind
    /// it, so release stops at the first request it cannot fully satisfy.
    pub async fn release(&self, n: u64) {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);
        state.permits += n;

        let mut woken = Vec::new();
        while let Some(&requested) = state.queue.front_payload() {
            if requested > state.permits {
                break;
            }
            let waiter = state.queue.pop_front().expect("front_payload just confirmed an entry");
            state.permits -= requested;
            woken.push(waiter);
        }
        let permits = state.permits;
        drop(state);

        event!(Level::TRACE, message = "semaphore release", n, woken = woken.len(), permits);

        for waiter in woken {
            waiter.complete(Ok(()));
        }
    }

    /// Attempts to acquire `n` permits without waiting.
    ///
    /// Succeeds only if `n` permits are immediately available *and* no other request is already
    /// queued ahead — preserving FIFO fairness even for the non-blocking path.
    #[must_use]
    pub fn try_acquire(&self, n: u64) -> bool {
        let mut state = self.state.lock().expect(POISONED);
        if state.queue.is_empty() && state.permits >= n {
            state.permits -= n;
            true
        } else {
            false
        }
    }

    /// Returns the number of permits currently banked (not reserved by a queued waiter).
    #[must_use]
    pub fn available_permits(&self) -> u64 {
        self.state.lock().expect(POISONED).permits
    }

    /// Returns the executor completions run on when a handler advertises none of its own.
    ///
    /// Exposed so primitives layered on top of a semaphore (e.g. [`AsyncMutex`](crate::AsyncMutex))
    /// can post their own follow-up work (like a guard's drop-triggered release) through the same
    /// default executor without threading a separate copy through every layer.
    pub(crate) fn default_executor(&self) -> &SharedExecutor {
        self.handlers.default_executor()
    }

    /// Drains the wait queue, completing every queued acquire with [`Error::Cancelled`].
    pub async fn cancel_all(&self) {
        self.cancel_all_with(Error::Cancelled).await;
    }

    /// Drains the wait queue, completing every queued acquire with the given error instead of the
    /// default [`Error::Cancelled`] — e.g. a primitive built on this semaphore whose own `stop()`
    /// needs to surface [`Error::Shutdown`] rather than a plain cancellation.
    pub async fn cancel_all_with(&self, error: Error) {
        let _serial = self.serializer.lock().await;
        let drained: Vec<_> = self.state.lock().expect(POISONED).queue.drain().collect();
        drop(_serial);
        for waiter in drained {
            waiter.complete(Err(error.clone()));
        }
    }

    /// Acquires one permit.
    pub async fn async_acquire(&self) -> Result<()> {
        self.async_acquire_n(1).await
    }

    /// Acquires `n` permits, waiting if fewer are currently available or another request is
    /// already queued ahead.
    pub async fn async_acquire_n(&self, n: u64) -> Result<()> {
        self.async_acquire_opts(n, WaitOptions::default()).await
    }

    /// Acquires `n` permits, honoring an optional associated executor, cancellation slot, and
    /// deadline.
    pub async fn async_acquire_opts(&self, n: u64, opts: WaitOptions) -> Result<()> {
        let WaitOptions { executor, cancel, deadline } = opts;

        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);

        if state.queue.is_empty() && state.permits >= n {
            state.permits -= n;
            return Ok(());
        }

        let executor = self.handlers.resolve(executor);
        let (id, rx) = state.queue.push(executor, n);
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

impl std::fmt::Debug for AsyncSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect(POISONED);
        f.debug_struct("AsyncSemaphore")
            .field("permits", &state.permits)
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncSemaphore: Send, Sync);

    #[tokio::test]
    async fn acquire_and_release_round_trip() {
        let sem = AsyncSemaphore::new(2);
        sem.async_acquire().await.unwrap();
        sem.async_acquire().await.unwrap();
        assert_eq!(sem.available_permits(), 0);
        sem.release(1).await;
        assert_eq!(sem.available_permits(), 1);
    }

    #[tokio::test]
    async fn try_acquire_fails_when_insufficient_permits() {
        let sem = AsyncSemaphore::new(1);
        assert!(sem.try_acquire(1));
        assert!(!sem.try_acquire(1));
    }

    #[tokio::test]
    async fn fifo_order_blocks_later_smaller_requests() {
        let sem = Arc::new(AsyncSemaphore::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));

        let sem1 = Arc::clone(&sem);
        let order1 = Arc::clone(&order);
        let first = tokio::spawn(async move {
            sem1.async_acquire_n(2).await.unwrap();
            order1.lock().unwrap().push(1);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;

        let sem2 = Arc::clone(&sem);
        let order2 = Arc::clone(&order);
        let second = tokio::spawn(async move {
            // Only needs 1 permit, but must not cut ahead of `first`'s request for 2.
            sem2.async_acquire_n(1).await.unwrap();
            order2.lock().unwrap().push(2);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!second.is_finished());

        sem.release(3).await;
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn cancel_all_fails_every_queued_acquire() {
        let sem = Arc::new(AsyncSemaphore::new(0));
        let failures = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..3 {
            let sem = Arc::clone(&sem);
            let failures = Arc::clone(&failures);
            tasks.push(tokio::spawn(async move {
                if sem.async_acquire().await.is_err() {
                    failures.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        sem.cancel_all().await;

        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(failures.load(Ordering::SeqCst), 3);
    }
}
