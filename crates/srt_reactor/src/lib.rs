// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An async reactor over libsrt's epoll-like readiness primitive.
//!
//! [`Reactor`] owns one SRT epoll handle and one background poll thread, and turns its
//! per-socket readiness edges (`IN`, `OUT`, `ERR`) into per-socket, per-direction async
//! completions: [`Reactor::async_wait_readable`] and [`Reactor::async_wait_writable`].
//!
//! An error edge on a socket is terminal for both directions: any pending read and write wait are
//! both failed, and the socket is dropped from the epoll set entirely. Callers must either close
//! the socket or re-register it fresh.

mod error;
mod ffi;
mod op_strand;
mod reactor;

pub use error::{Direction, Error, Result};
pub use ffi::SrtSocket;
pub use reactor::{Flags, Reactor, WaitOptions};
