//! The shared timer scheduler.
//!
//! All timed delivery in the process goes through one `Scheduler`, a thin
//! handle over the tokio runtime. Callers get back a [`TimerHandle`] that
//! cancels the pending work when explicitly asked to, or when dropped. The
//! drop-cancels behavior is what lets owners tie a timer's lifetime to a
//! piece of state: discard the handle, and the callback can no longer fire.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Handle to a shared scheduled executor backed by the tokio runtime.
///
/// Cheap to clone; every clone submits to the same runtime.
#[derive(Debug, Clone)]
pub struct Scheduler {
    handle: tokio::runtime::Handle,
}

impl Scheduler {
    /// Creates a scheduler bound to the current tokio runtime.
    ///
    /// Must be called from within a runtime context (an async task or a
    /// `tokio::main`/`tokio::test` body).
    pub fn new() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }

    /// Creates a scheduler bound to an explicit runtime handle.
    pub fn with_handle(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Runs `f` once after `delay`.
    pub fn schedule_once<F>(&self, delay: Duration, f: F) -> TimerHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            f();
        });
        TimerHandle { task }
    }

    /// Runs `f` every `period`, the first invocation after `initial_delay`.
    ///
    /// Missed ticks are delayed rather than bunched, so a slow callback does
    /// not produce a burst of catch-up invocations.
    pub fn schedule_fixed_rate<F>(&self, initial_delay: Duration, period: Duration, mut f: F) -> TimerHandle
    where
        F: FnMut() + Send + 'static,
    {
        let task = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + initial_delay;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                f();
            }
        });
        TimerHandle { task }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancellation handle for scheduled work.
///
/// Dropping the handle cancels the pending invocation; once the callback has
/// started running it runs to completion.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancels the pending invocation (idempotent).
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// True once the scheduled work has run or been cancelled.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
