// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncQueue<T>`]: an unbounded FIFO queue gated by an [`AsyncSemaphore`].

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::executor::SharedExecutor;
use crate::semaphore::AsyncSemaphore;
use crate::serializer::Serializer;
use crate::waiter::WaitOptions;

const POISONED: &str = "acore serializer-protected state must not be poisoned";

/// An unbounded, multi-producer multi-consumer FIFO queue.
///
/// Built from an [`AsyncSemaphore`] whose permit count always equals the number of elements
/// currently banked: `push` releases one permit per element pushed, and a read acquires one
/// permit per element it consumes before popping it. This keeps readers asleep exactly as long as
/// the queue is empty, with no separate not-empty condvar to keep in sync.
pub struct AsyncQueue<T> {
    semaphore: AsyncSemaphore,
    items: Mutex<VecDeque<T>>,
}

impl<T: Send + 'static> AsyncQueue<T> {
    /// Creates an empty queue.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new() -> Self {
        Self { semaphore: AsyncSemaphore::new(0), items: Mutex::new(VecDeque::new()) }
    }

    /// Creates an empty queue using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(executor: SharedExecutor) -> Self {
        Self { semaphore: AsyncSemaphore::with_executor(0, executor), items: Mutex::new(VecDeque::new()) }
    }

    /// Creates an empty queue sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(serializer: Serializer) -> Self {
        Self { semaphore: AsyncSemaphore::with_serializer(0, serializer), items: Mutex::new(VecDeque::new()) }
    }

    /// Creates an empty queue with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(serializer: Serializer, executor: SharedExecutor) -> Self {
        Self { semaphore: AsyncSemaphore::with_serializer_and_executor(0, serializer, executor), items: Mutex::new(VecDeque::new()) }
    }

    /// Pushes one element onto the back of the queue, waking at most one blocked reader.
    pub async fn push(&self, item: T) {
        self.items.lock().expect(POISONED).push_back(item);
        self.semaphore.release(1).await;
    }

    /// Returns the number of elements currently banked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().expect(POISONED).len()
    }

    /// Returns `true` if the queue currently holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pops one element without waiting, if one is available.
    #[must_use]
    pub fn try_read_msg(&self) -> Option<T> {
        if self.semaphore.try_acquire(1) { self.items.lock().expect(POISONED).pop_front() } else { None }
    }

    /// Waits for, and pops, exactly one element.
    pub async fn async_read_msg(&self) -> Result<T> {
        self.async_read_msg_opts(WaitOptions::default()).await
    }

    /// Waits for one element, honoring an optional associated executor, cancellation slot, and
    /// deadline.
    pub async fn async_read_msg_opts(&self, opts: WaitOptions) -> Result<T> {
        self.semaphore.async_acquire_opts(1, opts).await?;
        let item = self
            .items
            .lock()
            .expect(POISONED)
            .pop_front()
            .expect("semaphore permit implies a banked element, by the permits == len invariant");
        Ok(item)
    }

    /// Waits for at least one element, then pops up to `max_count` elements without waiting for
    /// more than are already banked once the first arrives.
    pub async fn async_read_msgs(&self, max_count: usize) -> Result<Vec<T>> {
        self.async_read_msgs_opts(max_count, WaitOptions::default()).await
    }

    /// Like [`AsyncQueue::async_read_msgs`], but with a bound on how long to wait for the first
    /// element.
    pub async fn async_read_msgs_with_timeout(&self, max_count: usize, duration: Duration) -> Result<Vec<T>> {
        self.async_read_msgs_opts(max_count, WaitOptions::new().timeout(duration)).await
    }

    /// Waits for at least one element (honoring an optional associated executor, cancellation
    /// slot, and deadline), then drains up to `max_count` total.
    pub async fn async_read_msgs_opts(&self, max_count: usize, opts: WaitOptions) -> Result<Vec<T>> {
        assert!(max_count > 0, "async_read_msgs requires max_count > 0");

        let first = self.async_read_msg_opts(opts).await?;
        let mut batch = Vec::with_capacity(max_count);
        batch.push(first);

        while batch.len() < max_count {
            if !self.semaphore.try_acquire(1) {
                break;
            }
            let item = self
                .items
                .lock()
                .expect(POISONED)
                .pop_front()
                .expect("semaphore permit implies a banked element, by the permits == len invariant");
            batch.push(item);
        }

        Ok(batch)
    }

    /// Stops the queue, failing every currently blocked reader with [`Error::Shutdown`].
    /// Already-banked elements are untouched and remain readable by future calls.
    pub async fn stop(&self) {
        event!(Level::DEBUG, message = "queue stop", len = self.len());
        self.semaphore.cancel_all_with(Error::Shutdown).await;
    }
}

#[cfg(feature = "tokio")]
impl<T: Send + 'static> Default for AsyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for AsyncQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncQueue").field("len", &self.items.lock().expect(POISONED).len()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncQueue<u32>: Send, Sync);

    #[tokio::test]
    async fn push_then_read_round_trip() {
        let queue = AsyncQueue::new();
        queue.push(42).await;
        assert_eq!(queue.async_read_msg().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn reader_blocks_until_an_element_is_pushed() {
        let queue = Arc::new(AsyncQueue::new());
        let reader_queue = Arc::clone(&queue);
        let task = tokio::spawn(async move { reader_queue.async_read_msg().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        queue.push(7).await;
        assert_eq!(task.await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn read_msgs_caps_at_max_count_even_with_more_banked() {
        let queue = AsyncQueue::new();
        for i in 0..5 {
            queue.push(i).await;
        }
        let batch = queue.async_read_msgs(3).await.unwrap();
        assert_eq!(batch, vec![0, 1, 2]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = AsyncQueue::new();
        queue.push("a").await;
        queue.push("b").await;
        queue.push("c").await;
        assert_eq!(queue.async_read_msg().await.unwrap(), "a");
        assert_eq!(queue.async_read_msg().await.unwrap(), "b");
        assert_eq!(queue.async_read_msg().await.unwrap(), "c");
    }

    #[tokio::test]
    async fn stop_fails_blocked_reader() {
        let queue = Arc::new(AsyncQueue::<u32>::new());
        let reader_queue = Arc::clone(&queue);
        let task = tokio::spawn(async move { reader_queue.async_read_msg().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.stop().await;

        assert!(matches!(task.await.unwrap(), Err(Error::Shutdown)));
    }
}
