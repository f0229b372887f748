// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The waiter and wait-queue types shared by every primitive in this crate.
//!
//! A waiter is created on entry to an async wait, mutated only while the owning serializer is
//! held, and completed exactly once — by success, cancellation, timeout, or shutdown.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::executor::SharedExecutor;

/// Uniquely identifies a waiter within the wait-list it was pushed onto.
///
/// Uniqueness is by identity, not by payload: two waiters requesting the same thing (e.g. the
/// same permit count) remain distinct entries.
pub(crate) type WaiterId = u64;

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// An enqueued async wait: a completion sender paired with the executor its completion must be
/// posted to, plus whatever payload the owning primitive needs (permit count, expected epoch...).
pub(crate) struct Waiter<T, P = ()> {
    pub(crate) id: WaiterId,
    tx: oneshot::Sender<Result<T>>,
    executor: SharedExecutor,
    /// Primitive-specific predicate/payload (e.g. semaphore permits requested).
    pub(crate) payload: P,
}

impl<T: Send + 'static, P> Waiter<T, P> {
    /// Completes this waiter, posting the result on its associated executor.
    ///
    /// Matches "completion is always posted, never called inline from within the serializer":
    /// callers invoke this only after dropping the serializer guard.
    pub(crate) fn complete(self, value: Result<T>) {
        let Self { tx, executor, .. } = self;
        executor.post(async move {
            // The receiver may already be gone if the waiting task was itself cancelled; that is
            // not this waiter's problem to report.
            let _ = tx.send(value);
        });
    }
}

/// An ordered, FIFO sequence of waiters with removal from either end or by id.
pub(crate) struct WaitQueue<T, P = ()> {
    next_id: WaiterId,
    entries: VecDeque<Waiter<T, P>>,
}

impl<T, P> Default for WaitQueue<T, P> {
    fn default() -> Self {
        Self { next_id: 0, entries: VecDeque::new() }
    }
}

impl<T: Send + 'static, P> WaitQueue<T, P> {
    /// Allocates a new waiter id and pushes a waiter built from it onto the back of the queue.
    ///
    /// Returns the id, the receiver half the caller should await, and the id is also stashed on
    /// the waiter itself so it can be located later for cancellation or timeout removal.
    pub(crate) fn push(&mut self, executor: SharedExecutor, payload: P) -> (WaiterId, oneshot::Receiver<Result<T>>) {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let (tx, rx) = oneshot::channel();
        self.entries.push_back(Waiter { id, tx, executor, payload });
        (id, rx)
    }

    pub(crate) fn pop_front(&mut self) -> Option<Waiter<T, P>> {
        self.entries.pop_front()
    }

    pub(crate) fn front_payload(&self) -> Option<&P> {
        self.entries.front().map(|w| &w.payload)
    }

    /// Removes and returns the waiter with the given id, wherever it sits in the queue.
    pub(crate) fn remove(&mut self, id: WaiterId) -> Option<Waiter<T, P>> {
        let index = self.entries.iter().position(|w| w.id == id)?;
        self.entries.remove(index)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drains the whole queue in FIFO order, for broadcast-style releases (event, latch, barrier,
    /// waitgroup).
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Waiter<T, P>> + '_ {
        self.entries.drain(..)
    }
}

/// The handler-equivalent passed to every `async_*` entry point in this crate: an optional
/// associated executor, an optional cancellation slot, and an optional deadline.
///
/// Leaving a field unset falls back to the primitive's documented default: the primitive's own
/// configured executor, no cancellation, and no deadline (wait forever).
#[derive(Clone, Default)]
pub struct WaitOptions {
    pub(crate) executor: Option<SharedExecutor>,
    pub(crate) cancel: Option<CancellationToken>,
    pub(crate) deadline: Option<Duration>,
}

impl WaitOptions {
    /// Starts from the defaults: no override, no cancellation, no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs this wait's completion on `executor` instead of the primitive's default.
    #[must_use]
    pub fn on_executor(mut self, executor: SharedExecutor) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Binds this wait to a cancellation slot. Firing it completes the wait with
    /// [`Error::Cancelled`].
    #[must_use]
    pub fn cancellable_with(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Bounds this wait with a deadline. Elapsing it completes the wait with
    /// [`Error::TimedOut`].
    #[must_use]
    pub fn timeout(mut self, duration: Duration) -> Self {
        self.deadline = Some(duration);
        self
    }
}

impl fmt::Debug for WaitOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitOptions")
            .field("executor", &self.executor.is_some())
            .field("cancel", &self.cancel.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

/// Races a waiter's completion against an optional cancellation slot and an optional deadline.
///
/// `remove` is invoked exactly when cancellation or the timeout wins the race, to pull the waiter
/// back out of its owning queue before reporting failure; it is a no-op (returns `false`) if the
/// waiter already completed by the time it runs, which is the common benign race this function
/// exists to resolve safely.
pub(crate) async fn race_waiter<T: Send + 'static>(
    rx: oneshot::Receiver<Result<T>>,
    cancel: Option<CancellationToken>,
    deadline: Option<Duration>,
    remove: impl Fn() -> BoxFuture<bool> + Send,
) -> Result<T> {
    match (cancel, deadline) {
        (None, None) => rx.await.unwrap_or(Err(Error::Shutdown)),
        (Some(token), None) => {
            tokio::select! {
                res = rx => res.unwrap_or(Err(Error::Shutdown)),
                () = token.cancelled() => {
                    let _ = remove().await;
                    Err(Error::Cancelled)
                }
            }
        }
        (None, Some(d)) => {
            tokio::select! {
                res = rx => res.unwrap_or(Err(Error::Shutdown)),
                () = tokio::time::sleep(d) => {
                    let _ = remove().await;
                    Err(Error::TimedOut)
                }
            }
        }
        (Some(token), Some(d)) => {
            tokio::select! {
                res = rx => res.unwrap_or(Err(Error::Shutdown)),
                () = token.cancelled() => {
                    let _ = remove().await;
                    Err(Error::Cancelled)
                }
                () = tokio::time::sleep(d) => {
                    let _ = remove().await;
                    Err(Error::TimedOut)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::TokioExecutor;

    #[tokio::test]
    async fn push_then_pop_preserves_fifo_order() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let mut queue: WaitQueue<u32> = WaitQueue::default();

        let (id1, _rx1) = queue.push(executor.clone(), ());
        let (id2, _rx2) = queue.push(executor.clone(), ());
        let (id3, _rx3) = queue.push(executor, ());

        assert_eq!(queue.pop_front().unwrap().id, id1);
        assert_eq!(queue.pop_front().unwrap().id, id2);
        assert_eq!(queue.pop_front().unwrap().id, id3);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn remove_by_id_finds_middle_entry() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let mut queue: WaitQueue<u32> = WaitQueue::default();

        let (_id1, _rx1) = queue.push(executor.clone(), ());
        let (id2, _rx2) = queue.push(executor.clone(), ());
        let (_id3, _rx3) = queue.push(executor, ());

        let removed = queue.remove(id2).expect("waiter should be present");
        assert_eq!(removed.id, id2);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn race_waiter_without_cancel_or_deadline_awaits_completion() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let mut queue: WaitQueue<u32> = WaitQueue::default();
        let (_id, rx) = queue.push(executor, ());

        let waiter = queue.pop_front().unwrap();
        waiter.complete(Ok(7));

        let result = race_waiter(rx, None, None, || Box::pin(async { false })).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn race_waiter_deadline_reports_timed_out() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let mut queue: WaitQueue<u32> = WaitQueue::default();
        let (_id, rx) = queue.push(executor, ());
        // Leave the waiter enqueued; nothing will ever complete it.

        let result = race_waiter(rx, None, Some(Duration::from_millis(5)), || Box::pin(async { true })).await;
        assert!(matches!(result, Err(Error::TimedOut)));
    }

    #[tokio::test]
    async fn race_waiter_cancellation_reports_cancelled() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let mut queue: WaitQueue<u32> = WaitQueue::default();
        let (_id, rx) = queue.push(executor, ());

        let token = CancellationToken::new();
        let token_clone = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            token_clone.cancel();
        });

        let result = race_waiter(rx, Some(token), None, || Box::pin(async { true })).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
