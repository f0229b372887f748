// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncWaitGroup`]: a reusable, bidirectional counter gate.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use tracing::{Level, event};

use crate::error::Result;
use crate::executor::{HandlerDispatch, SharedExecutor};
use crate::serializer::Serializer;
use crate::waiter::{WaitOptions, WaitQueue, race_waiter};

const POISONED: &str = "acore serializer-protected state must not be poisoned";

/// A reusable counter gate: waiters block while the counter is above zero, and are released the
/// moment it returns to zero.
///
/// Unlike [`AsyncLatch`](crate::AsyncLatch), a waitgroup's counter can be raised again after
/// reaching zero — a new wave of waiters will then block until it drains again. Unlike every
/// other primitive in this crate, [`AsyncWaitGroup::add`] is a **synchronous, non-blocking**
/// call: it does not go through the serializer's async lock, matching the requirement that
/// producers be able to register work from a plain (non-async) call site without contending on
/// the primitive's wait queue. It still linearizes correctly against concurrent `add`/`done`
/// calls via the atomic counter, and against `async_wait` via the `std::sync::Mutex`-guarded
/// queue.
pub struct AsyncWaitGroup {
    serializer: Serializer,
    counter: AtomicI64,
    queue: Mutex<WaitQueue<()>>,
    handlers: HandlerDispatch,
}

impl AsyncWaitGroup {
    /// Creates a waitgroup with a starting counter of zero.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new() -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), SharedExecutor::default())
    }

    /// Creates a waitgroup using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), executor)
    }

    /// Creates a waitgroup sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(serializer, SharedExecutor::default())
    }

    /// Creates a waitgroup with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            serializer,
            counter: AtomicI64::new(0),
            queue: Mutex::new(WaitQueue::default()),
            handlers: HandlerDispatch::new(executor),
        }
    }

    /// Adjusts the counter by `delta` (which may be negative) and, if it drops to zero, wakes
    /// every current waiter.
    ///
    /// This call is synchronous and never suspends: it is the one operation in this crate that
    /// deliberately bypasses the serializer, so callers may invoke it from ordinary, non-async
    /// code (e.g. when spawning a unit of work, before the async task that will eventually call
    /// [`AsyncWaitGroup::done`] has even started). Waking waiters is still posted through each
    /// waiter's associated executor, never run inline.
    ///
    /// # Panics
    ///
    /// Panics if `delta` drives the counter negative — `done` called more times than `add`
    /// promised is a programmer error.
    pub fn add(&self, delta: i64) {
        let previous = self.counter.fetch_add(delta, Ordering::SeqCst);
        let new_value = previous + delta;
        assert!(new_value >= 0, "waitgroup counter went negative");

        if new_value != 0 {
            return;
        }

        // The counter is zero right now; drain whoever is waiting. A concurrent `add` that makes
        // it positive again before we finish draining simply means those callers enqueue fresh
        // waiters afterward — draining is a point-in-time release, not a standing guarantee.
        let drained: Vec<_> = self.queue.lock().expect(POISONED).drain().collect();
        event!(Level::DEBUG, message = "waitgroup reached zero", released = drained.len());
        for waiter in drained {
            waiter.complete(Ok(()));
        }
    }

    /// Equivalent to `self.add(1)`.
    pub fn add_one(&self) {
        self.add(1);
    }

    /// Equivalent to `self.add(-1)`.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Returns the current counter value without waiting.
    #[must_use]
    pub fn count(&self) -> i64 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Returns `true` if the counter is currently zero.
    #[must_use]
    pub fn try_wait(&self) -> bool {
        self.count() == 0
    }

    /// Waits until the counter reaches zero.
    pub async fn async_wait(&self) -> Result<()> {
        self.async_wait_opts(WaitOptions::default()).await
    }

    /// Waits until the counter reaches zero, honoring an optional associated executor,
    /// cancellation slot, and deadline.
    pub async fn async_wait_opts(&self, opts: WaitOptions) -> Result<()> {
        let WaitOptions { executor, cancel, deadline } = opts;

        // The serializer here only orders concurrent async_wait enqueue/remove operations against
        // each other; `add`/`done` intentionally never take it, so we must re-check the counter
        // after acquiring the queue lock to close the race against a concurrent `add` that just
        // zeroed it.
        let _serial = self.serializer.lock().await;
        if self.count() == 0 {
            return Ok(());
        }

        let executor = self.handlers.resolve(executor);
        let (id, rx) = {
            let mut queue = self.queue.lock().expect(POISONED);
            if self.count() == 0 {
                drop(queue);
                drop(_serial);
                return Ok(());
            }
            queue.push(executor, ())
        };
        drop(_serial);

        race_waiter(rx, cancel, deadline, || {
            Box::pin(async move { self.queue.lock().expect(POISONED).remove(id).is_some() })
        })
        .await
    }
}

#[cfg(feature = "tokio")]
impl Default for AsyncWaitGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AsyncWaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncWaitGroup").field("count", &self.count()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    use rand::Rng;
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncWaitGroup: Send, Sync);

    #[tokio::test]
    async fn empty_waitgroup_wait_returns_immediately() {
        let wg = AsyncWaitGroup::new();
        assert!(wg.try_wait());
        wg.async_wait().await.unwrap();
    }

    #[tokio::test]
    async fn add_then_done_releases_waiters() {
        let wg = Arc::new(AsyncWaitGroup::new());
        wg.add(1);
        assert!(!wg.try_wait());

        let waiter_wg = Arc::clone(&wg);
        let task = tokio::spawn(async move { waiter_wg.async_wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        wg.done();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn stress_many_producers_add_and_done_concurrently() {
        // One hundred producers each add_one() synchronously (from ordinary task bodies, with no
        // serializer involved) and then done() shortly after; the waitgroup must still linearize
        // to zero and wake every waiter exactly once.
        let wg = Arc::new(AsyncWaitGroup::new());
        let released = Arc::new(AtomicUsize::new(0));

        let mut waiters = Vec::new();
        for _ in 0..4 {
            let wg = Arc::clone(&wg);
            let released = Arc::clone(&released);
            waiters.push(tokio::spawn(async move {
                wg.async_wait().await.unwrap();
                released.fetch_add(1, AtomicOrdering::SeqCst);
            }));
        }

        let mut producers = Vec::new();
        for _ in 0..100 {
            wg.add_one();
            let wg = Arc::clone(&wg);
            producers.push(tokio::spawn(async move {
                let jitter = rand::rng().random_range(0..200);
                tokio::time::sleep(Duration::from_micros(jitter)).await;
                wg.done();
            }));
        }

        for producer in producers {
            producer.await.unwrap();
        }
        for waiter in waiters {
            waiter.await.unwrap();
        }

        assert_eq!(released.load(AtomicOrdering::SeqCst), 4);
        assert_eq!(wg.count(), 0);
    }

    #[tokio::test]
    async fn add_past_negative_panics() {
        let wg = AsyncWaitGroup::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| wg.done()));
        assert!(result.is_err());
    }
}
