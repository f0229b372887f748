// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`Dispatcher<T>`]: publish/subscribe fan-out over per-subscriber [`AsyncQueue`]s.

use std::collections::HashMap;
use std::sync::Mutex;

use tracing::{Level, event};

use crate::executor::SharedExecutor;
use crate::queue::AsyncQueue;
use crate::serializer::Serializer;

const POISONED: &str = "acore serializer-protected state must not be poisoned";

/// Identifies one subscription to a [`Dispatcher`]. Only meaningful to the dispatcher that issued
/// it.
pub type SubscriberId = u64;

struct State<T> {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, std::sync::Arc<AsyncQueue<T>>>,
}

/// A publish/subscribe fan-out point.
///
/// Every subscriber gets its own [`AsyncQueue`], so a slow subscriber backs up only its own
/// queue — it never blocks `publish` or any other subscriber. Values are cloned once per
/// subscriber, so `T` must implement [`Clone`].
pub struct Dispatcher<T> {
    serializer: Serializer,
    state: Mutex<State<T>>,
    executor: SharedExecutor,
}

impl<T: Clone + Send + 'static> Dispatcher<T> {
    /// Creates a dispatcher with no subscribers.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new() -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), SharedExecutor::default())
    }

    /// Creates a dispatcher using `executor` as the default for every subscriber's queue.
    #[must_use]
    pub fn with_executor(executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(Serializer::owned(), executor)
    }

    /// Creates a dispatcher sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(serializer, SharedExecutor::default())
    }

    /// Creates a dispatcher with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            serializer,
            state: Mutex::new(State { next_id: 0, subscribers: HashMap::new() }),
            executor,
        }
    }

    /// Registers a new subscriber and returns its id and the queue it should read from.
    pub async fn async_subscribe(&self) -> (SubscriberId, std::sync::Arc<AsyncQueue<T>>) {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);
        let id = state.next_id;
        state.next_id = state.next_id.wrapping_add(1);

        let queue = std::sync::Arc::new(AsyncQueue::with_serializer_and_executor(
            Serializer::shared(&self.serializer),
            self.executor.clone(),
        ));
        state.subscribers.insert(id, std::sync::Arc::clone(&queue));
        (id, queue)
    }

    /// Removes a subscriber. Its queue is not stopped — a caller still holding the `Arc` can
    /// drain whatever was already published to it, it just receives nothing further.
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let _serial = self.serializer.lock().await;
        self.state.lock().expect(POISONED).subscribers.remove(&id);
    }

    /// Publishes `value` to every current subscriber's queue.
    pub async fn publish(&self, value: T) {
        let _serial = self.serializer.lock().await;
        let queues: Vec<_> = self.state.lock().expect(POISONED).subscribers.values().cloned().collect();
        drop(_serial);

        event!(Level::TRACE, message = "dispatcher publish", subscribers = queues.len());

        for queue in queues {
            queue.push(value.clone()).await;
        }
    }

    /// Returns the current number of subscribers.
    pub async fn async_subscriber_count(&self) -> usize {
        let _serial = self.serializer.lock().await;
        self.state.lock().expect(POISONED).subscribers.len()
    }
}

#[cfg(feature = "tokio")]
impl<T: Clone + Send + 'static> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.state.lock().expect(POISONED).subscribers.len();
        f.debug_struct("Dispatcher").field("subscribers", &count).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(Dispatcher<u32>: Send, Sync);

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let (_id1, queue1) = dispatcher.async_subscribe().await;
        let (_id2, queue2) = dispatcher.async_subscribe().await;

        dispatcher.publish(99).await;

        assert_eq!(queue1.async_read_msg().await.unwrap(), 99);
        assert_eq!(queue2.async_read_msg().await.unwrap(), 99);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_delivery_but_keeps_banked_messages() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let (id, queue) = dispatcher.async_subscribe().await;

        dispatcher.publish(1).await;
        dispatcher.unsubscribe(id).await;
        dispatcher.publish(2).await;

        assert_eq!(queue.async_read_msg().await.unwrap(), 1);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn subscriber_count_reflects_subscribe_and_unsubscribe() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        assert_eq!(dispatcher.async_subscriber_count().await, 0);
        let (id, _queue) = dispatcher.async_subscribe().await;
        assert_eq!(dispatcher.async_subscriber_count().await, 1);
        dispatcher.unsubscribe(id).await;
        assert_eq!(dispatcher.async_subscriber_count().await, 0);
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_publish_to_others() {
        let dispatcher: Dispatcher<u32> = Dispatcher::new();
        let (_id1, queue1) = dispatcher.async_subscribe().await;
        let (_id2, queue2) = dispatcher.async_subscribe().await;

        for i in 0..10 {
            dispatcher.publish(i).await;
        }

        // queue2 never drains; queue1 should still have received everything.
        for i in 0..10u32 {
            assert_eq!(queue1.async_read_msg().await.unwrap(), i);
        }
        assert_eq!(queue2.len(), 10);
    }
}
