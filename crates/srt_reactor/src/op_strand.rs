// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reactor's own single-threaded execution context, serializing every mutation of the
//! socket-to-handler map against both registration calls and the poll thread's dispatch.
//!
//! This mirrors `acore::Serializer`'s shape but is reimplemented locally: the reactor's
//! mutations are always paired with an SRT epoll FFI call, which acore's generic serializer has
//! no reason to know about.

use tokio::sync::{Mutex, MutexGuard};

#[derive(Clone, Default)]
pub(crate) struct OpStrand(std::sync::Arc<Mutex<()>>);

impl OpStrand {
    pub(crate) async fn lock(&self) -> OpStrandGuard<'_> {
        OpStrandGuard(self.0.lock().await)
    }
}

pub(crate) struct OpStrandGuard<'a>(#[expect(dead_code, reason = "held for its Drop side effect only")] MutexGuard<'a, ()>);
