// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The reactor's error category.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A reactor-level failure.
///
/// Wraps [`acore::Error`] for the cancellation/timeout/shutdown cases every acore primitive
/// shares, and adds the one failure kind specific to this crate: an SRT-reported error edge.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum Error {
    /// A wait was cancelled through its cancellation slot.
    #[error("wait was cancelled")]
    Cancelled,
    /// A wait exceeded its deadline.
    #[error("wait timed out")]
    TimedOut,
    /// The reactor was stopped while a wait was outstanding.
    #[error("reactor was stopped")]
    Shutdown,
    /// A second read (or write) waiter was registered on a socket that already has one pending.
    #[error("a {direction} waiter is already pending for this socket")]
    AlreadyPending {
        /// Which direction already had a waiter registered.
        direction: Direction,
    },
    /// SRT reported an error edge, or an SRT call in the registration path itself failed.
    #[error("SRT error {code}: {message}")]
    Srt {
        /// SRT's own numeric error code, from `srt_getlasterror`.
        code: i32,
        /// SRT's human-readable description of `code`, from `srt_getlasterror_str`.
        message: String,
    },
}

impl From<acore::Error> for Error {
    fn from(value: acore::Error) -> Self {
        match value {
            acore::Error::Cancelled => Self::Cancelled,
            acore::Error::TimedOut => Self::TimedOut,
            // `acore::Error` is `#[non_exhaustive]`; every other present and future variant
            // (`Shutdown`, `Programmer`, ...) maps to the reactor's own shutdown failure.
            _ => Self::Shutdown,
        }
    }
}

/// Which side of a socket's readiness a waiter or error applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Readability (`SRT_EPOLL_IN`).
    Read,
    /// Writability (`SRT_EPOLL_OUT`).
    Write,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}
