//! Deterministic clock for polling tests.

use meshsync_engine::{Scheduler, Task};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Timer {
    due: Duration,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct Clock {
    elapsed: Duration,
    next_seq: u64,
    timers: Vec<Timer>,
}

/// A scheduler that only moves when [`ManualScheduler::advance`] is called.
pub struct ManualScheduler {
    base: Instant,
    clock: Mutex<Clock>,
}

impl ManualScheduler {
    /// Creates a shared manual scheduler at time zero.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            base: Instant::now(),
            clock: Mutex::new(Clock::default()),
        })
    }

    /// Returns the time elapsed on this clock.
    pub fn elapsed(&self) -> Duration {
        self.clock.lock().elapsed
    }

    /// Returns the number of tasks waiting to run.
    pub fn pending(&self) -> usize {
        self.clock.lock().timers.len()
    }

    /// Moves the clock forward by `by`, running every task that falls due,
    /// in due order. Tasks scheduled while advancing run too if they fall
    /// within the window.
    pub fn advance(&self, by: Duration) {
        let target = self.clock.lock().elapsed + by;
        loop {
            let timer = {
                let mut clock = self.clock.lock();
                let next = clock
                    .timers
                    .iter()
                    .enumerate()
                    .filter(|(_, timer)| timer.due <= target)
                    .min_by_key(|(_, timer)| (timer.due, timer.seq))
                    .map(|(i, _)| i);
                match next {
                    Some(i) => {
                        let timer = clock.timers.swap_remove(i);
                        clock.elapsed = clock.elapsed.max(timer.due);
                        timer
                    }
                    None => {
                        clock.elapsed = target;
                        return;
                    }
                }
            };
            (timer.task)();
        }
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Instant {
        self.base + self.clock.lock().elapsed
    }

    fn schedule(&self, delay: Duration, task: Task) {
        let mut clock = self.clock.lock();
        let due = clock.elapsed + delay;
        let seq = clock.next_seq;
        clock.next_seq += 1;
        clock.timers.push(Timer { due, seq, task });
    }
}
