// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncMutex`]: mutual exclusion built atop [`AsyncSemaphore`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::executor::SharedExecutor;
use crate::semaphore::AsyncSemaphore;
use crate::serializer::Serializer;
use crate::waiter::WaitOptions;

/// A mutual-exclusion lock built from a single-permit [`AsyncSemaphore`].
///
/// Locking acquires the one available permit; unlocking releases it. The returned
/// [`AsyncMutexGuard`] releases automatically on drop, and carries an epoch token that makes a
/// second, manual [`AsyncMutexGuard::unlock`] on an already-released guard a no-op rather than
/// double-releasing the permit. The guard holds its own `Arc` handles onto the semaphore and
/// epoch counter rather than borrowing the mutex, so it can move them into the task its `Drop`
/// posts instead of borrowing a reference that can't outlive the drop call.
pub struct AsyncMutex {
    semaphore: Arc<AsyncSemaphore>,
    epoch: Arc<AtomicU64>,
}

impl AsyncMutex {
    /// Creates an unlocked mutex.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn new() -> Self {
        Self { semaphore: Arc::new(AsyncSemaphore::new(1)), epoch: Arc::new(AtomicU64::new(0)) }
    }

    /// Creates an unlocked mutex using `executor` as the default for unassociated handlers.
    #[must_use]
    pub fn with_executor(executor: SharedExecutor) -> Self {
        Self { semaphore: Arc::new(AsyncSemaphore::with_executor(1, executor)), epoch: Arc::new(AtomicU64::new(0)) }
    }

    /// Creates an unlocked mutex sharing `serializer` with other primitives.
    #[cfg(feature = "tokio")]
    #[must_use]
    pub fn with_serializer(serializer: Serializer) -> Self {
        Self { semaphore: Arc::new(AsyncSemaphore::with_serializer(1, serializer)), epoch: Arc::new(AtomicU64::new(0)) }
    }

    /// Creates an unlocked mutex with both a caller-supplied serializer and default executor.
    #[must_use]
    pub fn with_serializer_and_executor(serializer: Serializer, executor: SharedExecutor) -> Self {
        Self {
            semaphore: Arc::new(AsyncSemaphore::with_serializer_and_executor(1, serializer, executor)),
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Returns `true` if the mutex is currently unlocked.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.semaphore.available_permits() == 0
    }

    /// Attempts to acquire the lock without waiting.
    pub fn try_lock(&self) -> Option<AsyncMutexGuard> {
        if self.semaphore.try_acquire(1) {
            Some(self.make_guard())
        } else {
            None
        }
    }

    /// Acquires the lock, waiting as long as necessary.
    pub async fn async_lock(&self) -> Result<AsyncMutexGuard> {
        self.async_lock_opts(WaitOptions::default()).await
    }

    /// Acquires the lock with a bound on how long to wait.
    pub async fn try_lock_for(&self, duration: Duration) -> Result<AsyncMutexGuard> {
        self.async_lock_opts(WaitOptions::new().timeout(duration)).await
    }

    /// Acquires the lock, honoring an optional associated executor, cancellation slot, and
    /// deadline.
    pub async fn async_lock_opts(&self, opts: WaitOptions) -> Result<AsyncMutexGuard> {
        self.semaphore.async_acquire_opts(1, opts).await?;
        Ok(self.make_guard())
    }

    fn make_guard(&self) -> AsyncMutexGuard {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        AsyncMutexGuard { semaphore: Arc::clone(&self.semaphore), epoch_counter: Arc::clone(&self.epoch), epoch, released: false }
    }
}

#[cfg(feature = "tokio")]
impl Default for AsyncMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AsyncMutex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMutex").field("locked", &self.is_locked()).finish_non_exhaustive()
    }
}

/// A held lock on an [`AsyncMutex`].
///
/// Releases automatically when dropped. Calling [`AsyncMutexGuard::unlock`] releases it early;
/// the epoch token recorded at acquisition time makes a subsequent drop (or a second call to
/// `unlock`) a harmless no-op instead of releasing the semaphore twice.
#[must_use = "dropping this guard immediately releases the lock"]
pub struct AsyncMutexGuard {
    semaphore: Arc<AsyncSemaphore>,
    epoch_counter: Arc<AtomicU64>,
    epoch: u64,
    released: bool,
}

impl std::fmt::Debug for AsyncMutexGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncMutexGuard").field("released", &self.released).finish_non_exhaustive()
    }
}

impl AsyncMutexGuard {
    /// Releases the lock early, before this guard would otherwise be dropped.
    pub async fn unlock(mut self) {
        self.release_once().await;
    }

    async fn release_once(&mut self) {
        if self.released {
            return;
        }
        // The epoch check guards against a guard outliving a mutex that was reset or rebuilt out
        // from under it; in the current design the mutex's epoch only ever increases, so this is
        // mostly a defense against a future double-guard bug rather than a condition that arises
        // in normal operation.
        if self.epoch_counter.load(Ordering::SeqCst) < self.epoch {
            return;
        }
        self.released = true;
        event!(Level::TRACE, message = "mutex unlock", epoch = self.epoch);
        self.semaphore.release(1).await;
    }
}

impl Drop for AsyncMutexGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        // Dropping a guard cannot `.await`; hand the release off to the semaphore's executor so
        // it still happens exactly once, off the dropping thread. The guard owns its `Arc`
        // handles, so this task borrows nothing from the guard and is free to outlive it.
        let semaphore = Arc::clone(&self.semaphore);
        let executor = semaphore.default_executor().clone();
        executor.post(async move { semaphore.release(1).await });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use static_assertions::assert_impl_all;

    use super::*;

    assert_impl_all!(AsyncMutex: Send, Sync);

    #[tokio::test]
    async fn try_lock_succeeds_when_unlocked() {
        let mutex = AsyncMutex::new();
        let guard = mutex.try_lock().expect("mutex should be free");
        assert!(mutex.is_locked());
        drop(guard);
    }

    #[tokio::test]
    async fn try_lock_fails_when_already_locked() {
        let mutex = AsyncMutex::new();
        let _guard = mutex.try_lock().unwrap();
        assert!(mutex.try_lock().is_none());
    }

    #[tokio::test]
    async fn async_lock_waits_for_prior_holder_to_release() {
        let mutex = Arc::new(AsyncMutex::new());
        let guard = mutex.async_lock().await.unwrap();

        let waiter_mutex = Arc::clone(&mutex);
        let task = tokio::spawn(async move { waiter_mutex.async_lock().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!task.is_finished());

        guard.unlock().await;
        let second_guard = task.await.unwrap().unwrap();
        assert!(mutex.is_locked());
        drop(second_guard);
    }

    #[tokio::test]
    async fn double_unlock_does_not_release_twice() {
        let mutex = Arc::new(AsyncMutex::new());
        let guard = mutex.async_lock().await.unwrap();
        guard.unlock().await;
        assert!(!mutex.is_locked());

        // A second task can now acquire; the first guard's eventual drop (already consumed by
        // `unlock`) must not release the permit a second time out from under it.
        let second = mutex.try_lock().expect("should be acquirable after single release");
        drop(second);
    }

    #[tokio::test]
    async fn try_lock_for_times_out_when_contended() {
        let mutex = Arc::new(AsyncMutex::new());
        let _guard = mutex.async_lock().await.unwrap();

        let result = mutex.try_lock_for(Duration::from_millis(5)).await;
        assert!(matches!(result, Err(Error::TimedOut)));
    }
}
