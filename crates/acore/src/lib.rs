// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Async coordination primitives for Tokio-based services.
//!
//! Every primitive in this crate shares the same three-part contract:
//!
//! - **Serializer** ([`Serializer`]): a single-threaded execution context. A primitive's queue
//!   and counters are only ever mutated while its serializer is held, and released before any
//!   completion is posted — so user code resumed from a completion can safely call back into the
//!   same primitive without deadlocking.
//! - **Handler dispatch** ([`WaitOptions`], [`SharedExecutor`]): every `async_*` entry point
//!   accepts an optional associated executor; if none is given, the primitive posts completions
//!   to its own configured default (see [`TokioExecutor`] when the `tokio` feature is enabled).
//! - **Cancellation and timeouts**: every wait can be bound to a `CancellationToken` and/or a
//!   deadline. Losing the race against either removes the waiter from its queue and completes it
//!   with [`Error::Cancelled`] or [`Error::TimedOut`] respectively; winning the race against a
//!   normal completion is a benign, harmless no-op on the loser's side.
//!
//! # Primitives
//!
//! | Primitive | Shape |
//! |---|---|
//! | [`AsyncEvent`] | manual-reset broadcast flag |
//! | [`AsyncAutoResetEvent`] | single-wake, edge-triggered flag |
//! | [`AsyncLatch`] | single-use countdown gate |
//! | [`AsyncWaitGroup`] | reusable, bidirectional counter gate |
//! | [`AsyncSemaphore`] | counting permit pool, FIFO |
//! | [`AsyncMutex`] | mutual exclusion (built on a one-permit semaphore) |
//! | [`AsyncBarrier`] | cyclic N-party rendezvous |
//! | [`AsyncPeriodicTimer`] / [`async_delay`] | recurring and one-shot timers |
//! | [`AsyncRateLimiter`] | token-bucket rate limiting |
//! | [`AsyncQueue`] | unbounded FIFO queue (built on a semaphore) |
//! | [`Dispatcher`] | publish/subscribe fan-out over per-subscriber queues |

mod auto_reset_event;
mod barrier;
mod dispatcher;
mod error;
mod event;
mod executor;
mod latch;
mod mutex;
mod queue;
mod rate_limiter;
mod semaphore;
mod serializer;
mod timer;
mod waiter;
mod waitgroup;

pub use auto_reset_event::AsyncAutoResetEvent;
pub use barrier::AsyncBarrier;
pub use dispatcher::{Dispatcher, SubscriberId};
pub use error::{Error, Result};
pub use event::AsyncEvent;
pub use executor::{Executor, SharedExecutor};
pub use latch::AsyncLatch;
pub use mutex::{AsyncMutex, AsyncMutexGuard};
pub use queue::AsyncQueue;
pub use rate_limiter::AsyncRateLimiter;
pub use semaphore::AsyncSemaphore;
pub use serializer::Serializer;
pub use timer::{AsyncPeriodicTimer, TimerTick, async_delay};
pub use waiter::WaitOptions;
pub use waitgroup::AsyncWaitGroup;

#[cfg(feature = "tokio")]
pub use executor::TokioExecutor;
