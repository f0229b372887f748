// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` type for acore operations that return an acore [`Error`][enum@Error]
/// on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error completing an async coordination operation.
///
/// Every `async_*` entry point documents which of these variants it may report. A waiter is
/// completed with exactly one of these outcomes, or with success, and never more than once.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The operation was cancelled through the handler's cancellation slot.
    ///
    /// This races harmlessly against success and timeout: whichever completion wins, the losers
    /// observe the waiter already gone from the queue and become no-ops.
    #[error("operation was cancelled")]
    Cancelled,

    /// The operation did not complete before its deadline.
    #[error("operation timed out")]
    TimedOut,

    /// The primitive (or, for the reactor, the whole reactor) was stopped while this operation
    /// was still waiting.
    #[error("primitive was shut down while waiting")]
    Shutdown,

    /// A precondition was violated by the caller (e.g. releasing a mutex guard twice, or an
    /// arithmetic underflow on a counter that must never go negative).
    ///
    /// This is a programmer error, not a recoverable runtime condition. Debug builds assert
    /// instead of returning this variant; release builds degrade defensively and report it.
    #[error("programmer error: {0}")]
    Programmer(String),
}

impl Error {
    /// Shorthand for constructing a [`Error::Programmer`] from a formatted message.
    #[must_use]
    pub fn programmer(message: impl Into<String>) -> Self {
        Self::Programmer(message.into())
    }
}
