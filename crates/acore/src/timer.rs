// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AsyncPeriodicTimer`] and [`async_delay`]: timer primitives layered on `tokio::time`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

use crate::executor::SharedExecutor;

/// A boxed tick callback, run once per elapsed period.
pub type TimerTick = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Waits for `duration` to elapse, then resolves.
///
/// A thin, explicit name for `tokio::time::sleep` so callers of this crate never need to reach
/// past it into the underlying runtime for something this commonly needed.
pub async fn async_delay(duration: Duration) {
    tokio::time::sleep(duration).await;
}

enum Command {
    Pause,
    Resume,
    SetPeriod(Duration),
    Restart,
    Stop,
}

struct Inner {
    period: Mutex<Duration>,
    running: AtomicBool,
    shutdown: CancellationToken,
    command_tx: tokio::sync::mpsc::UnboundedSender<Command>,
}

/// A periodic timer that invokes a callback on a fixed cadence until stopped.
///
/// The callback runs via the timer's configured executor on every tick, never inline on the
/// timer's own background task — a slow or panicking callback cannot delay the next tick's
/// scheduling decision (though it can still delay the callback's own completion).
pub struct AsyncPeriodicTimer {
    inner: std::sync::Arc<Inner>,
}

impl AsyncPeriodicTimer {
    /// Starts a new periodic timer immediately, invoking `callback` every `period` on `executor`.
    pub fn start<F>(period: Duration, executor: SharedExecutor, mut callback: F) -> Self
    where
        F: FnMut() -> TimerTick + Send + 'static,
    {
        let shutdown = CancellationToken::new();
        let (command_tx, mut command_rx) = tokio::sync::mpsc::unbounded_channel();
        let inner = std::sync::Arc::new(Inner {
            period: Mutex::new(period),
            running: AtomicBool::new(true),
            shutdown: shutdown.clone(),
            command_tx,
        });

        let driver_inner = std::sync::Arc::clone(&inner);
        tokio::spawn(async move {
            let mut paused = false;
            loop {
                let current_period = *driver_inner.period.lock().expect("timer period mutex poisoned");
                let tick = if paused { None } else { Some(tokio::time::sleep(current_period)) };

                tokio::select! {
                    () = driver_inner.shutdown.cancelled() => break,
                    command = command_rx.recv() => {
                        match command {
                            Some(Command::Pause) => paused = true,
                            Some(Command::Resume) => paused = false,
                            Some(Command::SetPeriod(new_period)) => {
                                *driver_inner.period.lock().expect("timer period mutex poisoned") = new_period;
                            }
                            Some(Command::Restart) => {}
                            Some(Command::Stop) | None => break,
                        }
                    }
                    () = async {
                        match tick {
                            Some(sleep) => sleep.await,
                            None => std::future::pending().await,
                        }
                    } => {
                        event!(Level::TRACE, message = "periodic timer tick", period = ?current_period);
                        executor.post(callback());
                    }
                }
            }
            driver_inner.running.store(false, Ordering::SeqCst);
        });

        Self { inner }
    }

    /// Returns `true` if the timer has not yet been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Suspends ticking without losing the timer's configuration; [`AsyncPeriodicTimer::resume`]
    /// continues from a fresh full period.
    pub fn pause(&self) {
        let _ = self.inner.command_tx.send(Command::Pause);
    }

    /// Resumes a paused timer.
    pub fn resume(&self) {
        let _ = self.inner.command_tx.send(Command::Resume);
    }

    /// Changes the tick period. Takes effect starting from the next scheduled tick.
    pub fn set_period(&self, period: Duration) {
        let _ = self.inner.command_tx.send(Command::SetPeriod(period));
    }

    /// Restarts the timer's current period from now, without changing its configured duration.
    pub fn restart(&self) {
        let _ = self.inner.command_tx.send(Command::Restart);
    }

    /// Stops the timer permanently. Already-posted callbacks still run to completion.
    pub fn stop(&self) {
        let _ = self.inner.command_tx.send(Command::Stop);
        self.inner.shutdown.cancel();
    }
}

impl Drop for AsyncPeriodicTimer {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl std::fmt::Debug for AsyncPeriodicTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncPeriodicTimer").field("running", &self.is_running()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::executor::TokioExecutor;

    assert_impl_all!(AsyncPeriodicTimer: Send, Sync);

    #[tokio::test]
    async fn periodic_timer_ticks_repeatedly() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let ticks = Arc::new(AtomicUsize::new(0));

        let ticks_cb = Arc::clone(&ticks);
        let timer = AsyncPeriodicTimer::start(Duration::from_millis(5), executor, move || {
            let ticks_cb = Arc::clone(&ticks_cb);
            Box::pin(async move {
                ticks_cb.fetch_add(1, Ordering::SeqCst);
            })
        });

        tokio::time::sleep(Duration::from_millis(35)).await;
        timer.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(ticks.load(Ordering::SeqCst) >= 3, "expected several ticks, got {}", ticks.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pause_stops_ticking_until_resumed() {
        let executor = SharedExecutor::new(TokioExecutor::new());
        let ticks = Arc::new(AtomicUsize::new(0));

        let ticks_cb = Arc::clone(&ticks);
        let timer = AsyncPeriodicTimer::start(Duration::from_millis(5), executor, move || {
            let ticks_cb = Arc::clone(&ticks_cb);
            Box::pin(async move {
                ticks_cb.fetch_add(1, Ordering::SeqCst);
            })
        });

        tokio::time::sleep(Duration::from_millis(15)).await;
        timer.pause();
        let paused_count = ticks.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), paused_count, "no ticks should occur while paused");

        timer.resume();
        tokio::time::sleep(Duration::from_millis(20)).await;
        timer.stop();
        assert!(ticks.load(Ordering::SeqCst) > paused_count);
    }

    #[tokio::test]
    async fn async_delay_waits_at_least_the_requested_duration() {
        let start = tokio::time::Instant::now();
        async_delay(Duration::from_millis(10)).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }
}
