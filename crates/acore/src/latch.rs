// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncLatch`]: a single-use countdown gate.

use std::sync::Mutex;

use tracing::{Level, event};

use crate::error::Result;
use crate::executor::{HandlerDispatch, SharedExecutor};
use crate::serializer::Serializer;
use crate::waiter::{WaitOptions, WaitQueue, race_waiter};

const POISONED: &str = "acore serializer-protected state must not be poisoned";

struct State {
    count: u64,
    fired: bool,
    queue: WaitQueue<()>,
}

/// A single-use countdown gate: waiters block until the count reaches zero, after which the
/// latch is permanently open.
///
/// Unlike [`AsyncWaitGroup`](crate::AsyncWaitGroup), a latch never goes back up once it fires;
/// counting down past zero is a programmer error.
pub struct AsyncLatch {
    serializer: Serializer,
    state: Mutex<State>,
    handlers: HandlerDispatch,
}

impl AsyncLatch {
    /// Creates a latch requiring `count` calls to [`AsyncLatch::count_down`] (by default, one
    /// each) before it opens. A latch created with `count == 0` is already open.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new(count: u64) -> Self {
        Self::with_serializer_and_executor(count, Serializer::owned(), SharedExecutor::default())
    }

    /// Creates a latch using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(count: u64, executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(count, Serializer::owned(), executor)
    }

    /// Creates a latch sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(count: u64, serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(count, serializer, SharedExecutor::default())
    }

    /// Creates a latch with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(count: u64, serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            serializer,
            state: Mutex::new(State { count, fired: count == 0, queue: WaitQueue::default() }),
            handlers: HandlerDispatch::new(executor),
        }
    }

    /// Decrements the count by `n`, opening the latch and waking every waiter once it reaches
    /// zero.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the remaining count — counting down past zero is a programmer error,
    /// not a runtime condition a caller should need to handle.
    pub async fn count_down(&self, n: u64) {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);

        if state.fired {
            return;
        }
        state.count = state.count.checked_sub(n).expect("latch counted down past zero");

        if state.count > 0 {
            return;
        }
        state.fired = true;
        let drained: Vec<_> = state.queue.drain().collect();
        drop(state);
        event!(Level::DEBUG, message = "latch fired", released = drained.len());
        for waiter in drained {
            waiter.complete(Ok(()));
        }
    }

    /// Returns `true` if the latch has already opened.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.state.lock().expect(POISONED).fired
    }

    /// Returns the remaining count, or `0` once the latch has opened.
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.state.lock().expect(POISONED).count
    }

    /// Counts down by `n` then waits for the latch to open.
    pub async fn arrive_and_wait(&self, n: u64) -> Result<()> {
        self.count_down(n).await;
        self.async_wait().await
    }

    /// Waits for the latch to open.
    pub async fn async_wait(&self) -> Result<()> {
        self.async_wait_opts(WaitOptions::default()).await
    }

    /// Waits for the latch to open, honoring an optional associated executor, cancellation slot,
    /// and deadline.
    pub async fn async_wait_opts(&self, opts: WaitOptions) -> Result<()> {
        let WaitOptions { executor, cancel, deadline } = opts;

        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);

        if state.fired {
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

impl std::fmt::Debug for AsyncLatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect(POISONED);
        f.debug_struct("AsyncLatch").field("count", &state.count).field("fired", &state.fired).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncLatch: Send, Sync);

    #[tokio::test]
    async fn zero_count_latch_is_already_open() {
        let latch = AsyncLatch::new(0);
        assert!(latch.try_wait());
        latch.async_wait().await.unwrap();
    }

    #[tokio::test]
    async fn count_down_to_zero_opens_latch() {
        let latch = AsyncLatch::new(2);
        assert!(!latch.try_wait());
        latch.count_down(1).await;
        assert!(!latch.try_wait());
        latch.count_down(1).await;
        assert!(latch.try_wait());
    }

    #[tokio::test]
    async fn waiters_release_together_when_latch_opens() {
        let latch = Arc::new(AsyncLatch::new(3));
        let mut tasks = Vec::new();
        for _ in 0..5 {
            let latch = Arc::clone(&latch);
            tasks.push(tokio::spawn(async move { latch.async_wait().await }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        latch.count_down(3).await;

        for task in tasks {
            task.await.unwrap().unwrap();
        }
    }

    #[test]
    fn count_down_past_zero_panics() {
        let result = std::panic::catch_unwind(|| {
            tokio::runtime::Runtime::new().unwrap().block_on(async {
                let latch = AsyncLatch::new(1);
                latch.count_down(2).await;
            });
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn cancellation_removes_waiter_before_latch_opens() {
        let latch = Arc::new(AsyncLatch::new(1));
        let token = tokio_util::sync::CancellationToken::new();

        let waiter_latch = Arc::clone(&latch);
        let waiter_token = token.clone();
        let task = tokio::spawn(async move {
            waiter_latch.async_wait_opts(WaitOptions::new().cancellable_with(waiter_token)).await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        assert!(matches!(task.await.unwrap(), Err(crate::Error::Cancelled)));
    }
}
