// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The serializer: a single-threaded execution context guaranteeing mutual exclusion between
//! operations posted to it.
//!
//! Every primitive holds exactly one [`Serializer`]. By default each primitive owns a dedicated
//! one, constructed fresh; a cluster of tightly cooperating primitives may instead be built with
//! [`Serializer::shared`] so their queue/counter mutations never need to hop across serializers.
//!
//! Do not synchronously await a primitive from within a non-cooperative callback running on the
//! same serializer it shares — the callback would deadlock waiting for a lock it already holds.
//! This is documented as a usage constraint, not something acore can detect for you.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

/// A single-threaded execution context layered on the async runtime.
///
/// Operations that mutate a primitive's wait queue or counters acquire this lock for the
/// duration of the mutation, then release it before posting any completion.
#[derive(Clone)]
pub struct Serializer {
    lock: Arc<Mutex<()>>,
}

impl Serializer {
    /// Creates a dedicated serializer, owned by a single primitive.
    #[must_use]
    pub fn owned() -> Self {
        Self { lock: Arc::new(Mutex::new(())) }
    }

    /// Creates a new serializer handle sharing the same underlying lock as `other`.
    ///
    /// All primitives holding a handle returned from repeated calls to this method on the same
    /// `other` serialize against each other as one cluster.
    #[must_use]
    pub fn shared(other: &Self) -> Self {
        Self { lock: Arc::clone(&other.lock) }
    }

    /// Acquires the serializer, blocking (asynchronously) until no other operation sharing this
    /// serializer is in progress.
    pub(crate) async fn lock(&self) -> SerializerGuard<'_> {
        SerializerGuard(self.lock.lock().await)
    }
}

impl fmt::Debug for Serializer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serializer").field("shared_count", &Arc::strong_count(&self.lock)).finish()
    }
}

/// A held serializer lock. Dropping this releases the serializer for the next operation.
pub(crate) struct SerializerGuard<'a>(#[expect(dead_code, reason = "guard is held for its Drop side effect only")] MutexGuard<'a, ()>);
