// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncBarrier`]: a cyclic, N-party rendezvous point.

use std::sync::Mutex;

use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::executor::{HandlerDispatch, SharedExecutor};
use crate::serializer::Serializer;
use crate::waiter::{WaitOptions, WaitQueue, race_waiter};

const POISONED: &str = "acore serializer-protected state must not be poisoned";

struct State {
    parties: u64,
    arrived: u64,
    /// Monotonically increasing. Waiters are keyed by the phase they arrived into, so a waiter
    /// never mistakes a later phase's completion for its own.
    phase: u64,
    queue: WaitQueue<(), u64>,
}

/// A cyclic, N-party rendezvous point.
///
/// Each phase requires `parties` arrivals before it completes; completing a phase wakes every
/// party waiting on it and immediately opens the next phase with a fresh arrival count. Phases
/// only ever move forward — a waiter that arrived into phase `k` is only ever satisfied by phase
/// `k` completing, never by an earlier or later one.
pub struct AsyncBarrier {
    serializer: Serializer,
    state: Mutex<State>,
    handlers: HandlerDispatch,
}

impl AsyncBarrier {
    /// Creates a barrier requiring `parties` arrivals per phase.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new(parties: u64) -> Self {
        Self::with_serializer_and_executor(parties, Serializer::owned(), SharedExecutor::default())
    }

    /// Creates a barrier using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(parties: u64, executor: SharedExecutor) -> Self {
        Self::with_serializer_and_executor(parties, Serializer::owned(), executor)
    }

    /// Creates a barrier sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(parties: u64, serializer: Serializer) -> Self {
        Self::with_serializer_and_executor(parties, serializer, SharedExecutor::default())
    }

    /// Creates a barrier with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(parties: u64, serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            serializer,
            state: Mutex::new(State { parties, arrived: 0, phase: 0, queue: WaitQueue::default() }),
            handlers: HandlerDispatch::new(executor),
        }
    }

    /// Returns the phase currently being arrived into.
    #[must_use]
    pub fn phase(&self) -> u64 {
        self.state.lock().expect(POISONED).phase
    }

    /// Returns the number of parties still required to complete the current phase.
    #[must_use]
    pub fn parties_remaining(&self) -> u64 {
        let state = self.state.lock().expect(POISONED);
        state.parties.saturating_sub(state.arrived)
    }

    /// Records an arrival into the current phase, completing it (and opening the next) if this
    /// was the last party needed.
    ///
    /// Returns the phase this arrival joined, suitable for a later
    /// [`AsyncBarrier::async_wait`] call.
    pub async fn async_arrive(&self) -> u64 {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);
        let joined_phase = state.phase;
        state.arrived += 1;

        if state.arrived < state.parties {
            return joined_phase;
        }

        state.arrived = 0;
        state.phase += 1;
        let new_phase = state.phase;
        let drained: Vec<_> = state.queue.drain().collect();
        drop(state);
        event!(Level::DEBUG, message = "barrier phase complete", phase = new_phase, released = drained.len());
        for waiter in drained {
            waiter.complete(Ok(()));
        }
        joined_phase
    }

    /// Arrives into the current phase and waits for it to complete.
    pub async fn async_arrive_and_wait(&self) -> Result<()> {
        let phase = self.async_arrive().await;
        self.async_wait(phase).await
    }

    /// Arrives into the current phase, then permanently reduces the party count by one — this
    /// caller will never arrive again.
    pub async fn arrive_and_drop(&self) {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);
        state.parties = state.parties.saturating_sub(1);
        state.arrived += 1;

        if state.arrived < state.parties {
            return;
        }

        state.arrived = 0;
        state.phase += 1;
        let drained: Vec<_> = state.queue.drain().collect();
        drop(state);
        for waiter in drained {
            waiter.complete(Ok(()));
        }
    }

    /// Waits for `phase` to complete. Returns immediately if `phase` has already completed.
    pub async fn async_wait(&self, phase: u64) -> Result<()> {
        self.async_wait_opts(phase, WaitOptions::default()).await
    }

    /// Waits for `phase` to complete, honoring an optional associated executor, cancellation
    /// slot, and deadline.
    pub async fn async_wait_opts(&self, phase: u64, opts: WaitOptions) -> Result<()> {
        let WaitOptions { executor, cancel, deadline } = opts;

        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);

        if state.phase > phase {
            return Ok(());
        }

        let executor = self.handlers.resolve(executor);
        let (id, rx) = state.queue.push(executor, phase);
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

    /// Resets the barrier to phase zero with a fresh arrival count, failing every waiter of the
    /// current phase with [`Error::Shutdown`] — the phase they were waiting on will never
    /// complete as originally expected.
    pub async fn reset(&self) {
        let _serial = self.serializer.lock().await;
        let mut state = self.state.lock().expect(POISONED);
        state.arrived = 0;
        state.phase += 1;
        let drained: Vec<_> = state.queue.drain().collect();
        drop(state);
        for waiter in drained {
            waiter.complete(Err(Error::Shutdown));
        }
    }
}

impl std::fmt::Debug for AsyncBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock().expect(POISONED);
        f.debug_struct("AsyncBarrier")
            .field("phase", &state.phase)
            .field("arrived", &state.arrived)
            .field("parties", &state.parties)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncBarrier: Send, Sync);

    #[tokio::test]
    async fn all_parties_arriving_completes_the_phase() {
        let barrier = Arc::new(AsyncBarrier::new(3));
        let mut tasks = Vec::new();
        for _ in 0..3 {
            let barrier = Arc::clone(&barrier);
            tasks.push(tokio::spawn(async move { barrier.async_arrive_and_wait().await }));
        }

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(barrier.phase(), 1);
    }

    #[tokio::test]
    async fn barrier_cycles_across_multiple_phases() {
        let barrier = Arc::new(AsyncBarrier::new(2));
        for expected_phase in 0..3u64 {
            assert_eq!(barrier.phase(), expected_phase);
            let b1 = Arc::clone(&barrier);
            let b2 = Arc::clone(&barrier);
            let (r1, r2) = tokio::join!(
                tokio::spawn(async move { b1.async_arrive_and_wait().await }),
                tokio::spawn(async move { b2.async_arrive_and_wait().await }),
            );
            r1.unwrap().unwrap();
            r2.unwrap().unwrap();
        }
        assert_eq!(barrier.phase(), 3);
    }

    #[tokio::test]
    async fn waiter_blocks_until_last_party_arrives() {
        let barrier = Arc::new(AsyncBarrier::new(2));
        let phase = barrier.async_arrive().await;

        let waiter_barrier = Arc::clone(&barrier);
        let task = tokio::spawn(async move { waiter_barrier.async_wait(phase).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        barrier.async_arrive().await;
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn arrive_and_drop_can_complete_the_phase_it_reduces() {
        let barrier = Arc::new(AsyncBarrier::new(3));
        barrier.async_arrive().await;
        // Dropping reduces the party count to 2 and counts as this caller's arrival; the phase
        // now only needed 2 arrivals total, which have both already happened.
        barrier.arrive_and_drop().await;
        assert_eq!(barrier.phase(), 1);
        assert_eq!(barrier.parties_remaining(), 2);
    }

    #[tokio::test]
    async fn reset_fails_current_waiters_with_shutdown() {
        let barrier = Arc::new(AsyncBarrier::new(2));
        let phase = barrier.async_arrive().await;

        let waiter_barrier = Arc::clone(&barrier);
        let task = tokio::spawn(async move { waiter_barrier.async_wait(phase).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        barrier.reset().await;

        assert!(matches!(task.await.unwrap(), Err(Error::Shutdown)));
    }
}
