// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncRateLimiter`]: a token-bucket rate limiter with a FIFO wait queue.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::executor::{HandlerDispatch, SharedExecutor};
use crate::serializer::Serializer;
use crate::waiter::{Waiter, WaitOptions, WaitQueue, race_waiter};

const POISONED: &str = "acore serializer-protected state must not be poisoned";

struct State {
    tokens: f64,
    capacity: f64,
    refill_per_second: f64,
    last_refill: Instant,
    queue: WaitQueue<(), u64>,
    stopped: bool,
}

impl State {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        self.tokens = (self.tokens + elapsed * self.refill_per_second).min(self.capacity);
    }

    fn time_until(&self, cost: u64) -> Duration {
        let deficit = (cost as f64) - self.tokens;
        if deficit <= 0.0 || self.refill_per_second <= 0.0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(deficit / self.refill_per_second)
    }

    /// Pops every queued request the current token balance can satisfy, in FIFO order, debiting
    /// as it goes. Callers must drop their lock before completing the returned waiters.
    fn drain_satisfiable(&mut self) -> Vec<Waiter<(), u64>> {
        let mut woken = Vec::new();
        while let Some(&requested) = self.queue.front_payload() {
            if (requested as f64) > self.tokens {
                break;
            }
            let waiter = self.queue.pop_front().expect("front_payload just confirmed an entry");
            self.tokens -= requested as f64;
            woken.push(waiter);
        }
        woken
    }
}

struct Inner {
    serializer: Serializer,
    state: Mutex<State>,
    handlers: HandlerDispatch,
}

/// A token-bucket rate limiter.
///
/// Tokens refill continuously at `refill_per_second`, up to `capacity`. Acquires of varying cost
/// queue FIFO: a request for a large cost blocks smaller requests behind it, exactly like
/// [`AsyncSemaphore`](crate::AsyncSemaphore)'s fairness rule, since the two share the same queue
/// shape. Unlike a semaphore, permits are never explicitly released — they accrue with time — so
/// the head of the queue arms a one-shot timer for the moment its request is estimated to become
/// satisfiable, then re-checks reality when that timer fires.
pub struct AsyncRateLimiter {
    inner: Arc<Inner>,
}

impl AsyncRateLimiter {
    /// Creates a rate limiter with `capacity` tokens, starting full, refilling at
    /// `refill_per_second`.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new(capacity: u64, refill_per_second: f64) -> Self {
        Self::with_serializer_and_executor(capacity, refill_per_second, Serializer::owned(), SharedExecutor::default())
    }

    /// Creates a rate limiter using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(capacity: u64, refill_per_second: f64, executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(capacity, refill_per_second, Serializer::owned(), executor)
    }

    /// Creates a rate limiter sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(capacity: u64, refill_per_second: f64, serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(capacity, refill_per_second, serializer, SharedExecutor::default())
    }

    /// Creates a rate limiter with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(
        capacity: u64,
        refill_per_second: f64,
        serializer: Serializer,
        executor: SharedExecutor,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                serializer,
                state: Mutex::new(State {
                    tokens: capacity as f64,
                    capacity: capacity as f64,
                    refill_per_second,
                    last_refill: Instant::now(),
                    queue: WaitQueue::default(),
                    stopped: false,
                }),
                handlers: HandlerDispatch::new(executor),
            }),
        }
    }

    /// Changes the refill rate. Already-banked tokens are unaffected.
    pub async fn set_rate(&self, refill_per_second: f64) {
        let _serial = self.inner.serializer.lock().await;
        let mut state = self.inner.state.lock().expect(POISONED);
        state.refill();
        state.refill_per_second = refill_per_second;
        let woken = state.drain_satisfiable();
        drop(state);
        for waiter in woken {
            waiter.complete(Ok(()));
        }
    }

    /// Resets the bucket to full capacity, waking any queued acquire it can now satisfy.
    pub async fn reset(&self) {
        let _serial = self.inner.serializer.lock().await;
        let mut state = self.inner.state.lock().expect(POISONED);
        state.tokens = state.capacity;
        state.last_refill = Instant::now();
        let woken = state.drain_satisfiable();
        drop(state);
        for waiter in woken {
            waiter.complete(Ok(()));
        }
    }

    /// Permanently stops the limiter, failing every queued acquire with [`Error::Shutdown`]; all
    /// future acquires fail the same way.
    pub async fn stop(&self) {
        let _serial = self.inner.serializer.lock().await;
        let mut state = self.inner.state.lock().expect(POISONED);
        state.stopped = true;
        let drained: Vec<_> = state.queue.drain().collect();
        drop(state);
        for waiter in drained {
            waiter.complete(Err(Error::Shutdown));
        }
    }

    /// Attempts to acquire `n` tokens without waiting.
    #[must_use]
    pub fn try_acquire(&self, n: u64) -> bool {
        let mut state = self.inner.state.lock().expect(POISONED);
        if state.stopped || !state.queue.is_empty() {
            return false;
        }
        state.refill();
        if state.tokens >= n as f64 {
            state.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    /// Acquires one token, waiting for it to refill if necessary.
    pub async fn async_acquire(&self) -> Result<()> {
        self.async_acquire_n(1).await
    }

    /// Acquires `n` tokens, waiting for them to refill if necessary.
    pub async fn async_acquire_n(&self, n: u64) -> Result<()> {
        self.async_acquire_opts(n, WaitOptions::default()).await
    }

    /// Acquires `n` tokens with a bound on how long to wait.
    pub async fn async_acquire_with_timeout(&self, n: u64, duration: Duration) -> Result<()> {
        self.async_acquire_opts(n, WaitOptions::new().timeout(duration)).await
    }

    /// Acquires `n` tokens, honoring an optional associated executor, cancellation slot, and
    /// deadline.
    pub async fn async_acquire_opts(&self, n: u64, opts: WaitOptions) -> Result<()> {
        let WaitOptions { executor, cancel, deadline } = opts;

        let _serial = self.inner.serializer.lock().await;
        let mut state = self.inner.state.lock().expect(POISONED);

        if state.stopped {
            return Err(Error::Shutdown);
        }

        state.refill();
        if state.queue.is_empty() && state.tokens >= n as f64 {
            state.tokens -= n as f64;
            return Ok(());
        }

        let wait_for = state.time_until(n);
        let executor = self.inner.handlers.resolve(executor);
        let (id, rx) = state.queue.push(executor, n);
        let was_head = state.queue.len() == 1;
        drop(state);
        drop(_serial);

        if was_head {
            self.schedule_head_wake(wait_for);
        }

        let inner = Arc::clone(&self.inner);
        race_waiter(rx, cancel, deadline, move || {
            Box::pin(async move {
                let _serial = inner.serializer.lock().await;
                let mut state = inner.state.lock().expect(POISONED);
                state.queue.remove(id).is_some()
            })
        })
        .await
    }

    /// Arms a one-shot wake-up for when the head of the queue's request is estimated to become
    /// satisfiable, then re-runs the normal drain logic, which re-checks reality rather than
    /// trusting the estimate (a concurrent `reset`/`set_rate` may have changed things by then).
    /// If the queue is still non-empty after draining, re-arms for the new head.
    fn schedule_head_wake(&self, wait_for: Duration) {
        schedule_head_wake(Arc::clone(&self.inner), wait_for);
    }
}

fn schedule_head_wake(inner: Arc<Inner>, wait_for: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(wait_for).await;
        let _serial = inner.serializer.lock().await;
        let mut state = inner.state.lock().expect(POISONED);
        state.refill();
        let woken = state.drain_satisfiable();
        let tokens = state.tokens;
        let rearm_for = state.queue.front_payload().map(|&cost| state.time_until(cost));
        drop(state);
        drop(_serial);
        event!(Level::TRACE, message = "rate limiter head wake", woken = woken.len(), tokens);
        for waiter in woken {
            waiter.complete(Ok(()));
        }
        if let Some(wait_for) = rearm_for {
            schedule_head_wake(inner, wait_for);
        }
    });
}

impl std::fmt::Debug for AsyncRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock().expect(POISONED);
        f.debug_struct("AsyncRateLimiter")
            .field("tokens", &state.tokens)
            .field("capacity", &state.capacity)
            .field("queued", &state.queue.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncRateLimiter: Send, Sync);

    #[tokio::test]
    async fn try_acquire_succeeds_while_tokens_available() {
        let limiter = AsyncRateLimiter::new(2, 0.0);
        assert!(limiter.try_acquire(2));
        assert!(!limiter.try_acquire(1));
    }

    #[tokio::test]
    async fn async_acquire_waits_for_refill() {
        let limiter = AsyncRateLimiter::new(0, 100.0);
        let start = tokio::time::Instant::now();
        limiter.async_acquire_n(1).await.unwrap();
        // 1 token at 100/s should take roughly 10ms; generous bound for scheduler jitter.
        assert!(start.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn reset_refills_to_capacity_immediately() {
        let limiter = AsyncRateLimiter::new(5, 0.0);
        assert!(limiter.try_acquire(5));
        limiter.reset().await;
        assert!(limiter.try_acquire(5));
    }

    #[tokio::test]
    async fn stop_fails_pending_acquires_with_shutdown() {
        let limiter = Arc::new(AsyncRateLimiter::new(0, 0.0));
        let waiter_limiter = Arc::clone(&limiter);
        let task = tokio::spawn(async move { waiter_limiter.async_acquire().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        limiter.stop().await;

        assert!(matches!(task.await.unwrap(), Err(Error::Shutdown)));
    }

    #[tokio::test]
    async fn acquire_with_timeout_reports_timed_out_when_rate_too_slow() {
        let limiter = AsyncRateLimiter::new(0, 1.0);
        let result = limiter.async_acquire_with_timeout(1, Duration::from_millis(5)).await;
        assert!(matches!(result, Err(Error::TimedOut)));
    }
}
