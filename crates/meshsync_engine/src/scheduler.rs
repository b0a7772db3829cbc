//! Timers for polling.

use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

/// A deferred unit of work.
pub type Task = Box<dyn FnOnce() + Send>;

/// Source of time and delayed execution.
pub trait Scheduler: Send + Sync {
    /// Returns the current instant.
    fn now(&self) -> Instant;

    /// Runs `task` once `delay` has elapsed.
    fn schedule(&self, delay: Duration, task: Task);
}

/// Runs each task on its own thread after sleeping.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn schedule(&self, delay: Duration, task: Task) {
        let spawned = std::thread::Builder::new()
            .name("meshsync-timer".into())
            .spawn(move || {
                std::thread::sleep(delay);
                task();
            });
        if let Err(err) = spawned {
            warn!(error = %err, "failed to spawn timer thread");
        }
    }
}

/// Runs tasks on a tokio runtime.
#[derive(Clone)]
pub struct TokioScheduler {
    handle: tokio::runtime::Handle,
}

impl TokioScheduler {
    /// Uses the given runtime.
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

impl Scheduler for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn schedule(&self, delay: Duration, task: Task) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task();
        });
    }
}

impl fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokioScheduler").finish_non_exhaustive()
    }
}
