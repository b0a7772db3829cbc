//! Polling an entity until a condition settles.

use crate::entity::{Entity, RefreshOptions};
use crate::error::SyncError;
use crate::pending::Pending;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Predicate evaluated against the entity after each refresh.
pub type Predicate = Arc<dyn Fn(&Entity) -> bool + Send + Sync>;

/// When a poll stops.
#[derive(Clone)]
pub enum PollCondition {
    /// Stop once the predicate holds.
    Until(Predicate),
    /// Stop once the predicate no longer holds.
    While(Predicate),
}

impl PollCondition {
    fn satisfied(&self, entity: &Entity) -> bool {
        match self {
            PollCondition::Until(pred) => pred(entity),
            PollCondition::While(pred) => !pred(entity),
        }
    }
}

impl fmt::Debug for PollCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollCondition::Until(_) => f.write_str("Until(..)"),
            PollCondition::While(_) => f.write_str("While(..)"),
        }
    }
}

/// Options for [`Entity::poll`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Stop condition.
    pub condition: PollCondition,
    /// Delay between refreshes; defaults to the configured poll interval.
    pub interval: Option<Duration>,
    /// Time budget; defaults to the configured poll timeout.
    pub timeout: Option<Duration>,
    /// Parameters sent with each refresh.
    pub params: Option<Value>,
}

impl PollOptions {
    /// Polls until `pred` holds.
    pub fn until(pred: impl Fn(&Entity) -> bool + Send + Sync + 'static) -> Self {
        Self::with_condition(PollCondition::Until(Arc::new(pred)))
    }

    /// Polls while `pred` holds.
    pub fn while_holds(pred: impl Fn(&Entity) -> bool + Send + Sync + 'static) -> Self {
        Self::with_condition(PollCondition::While(Arc::new(pred)))
    }

    fn with_condition(condition: PollCondition) -> Self {
        Self {
            condition,
            interval: None,
            timeout: None,
            params: None,
        }
    }

    /// Sets the delay between refreshes.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Sets the time budget.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets refresh parameters.
    #[must_use]
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }
}

struct PollRun {
    entity: Entity,
    condition: PollCondition,
    interval: Duration,
    timeout: Option<Duration>,
    params: Option<Value>,
    started: Instant,
    handle: Pending<Entity>,
}

impl PollRun {
    fn tick(self: Arc<Self>) {
        if !self.handle.is_pending() {
            return;
        }
        let mut options = RefreshOptions::new();
        options.params = self.params.clone();
        trace!(identity = %self.entity.identity(), "poll tick");
        let run = Arc::clone(&self);
        self.entity
            .refresh_with(options)
            .on_settle(move |outcome| run.after_refresh(outcome.map(|_| ())));
    }

    fn after_refresh(self: Arc<Self>, outcome: Result<(), SyncError>) {
        if !self.handle.is_pending() {
            trace!("poll already settled");
            return;
        }
        if let Err(err) = outcome {
            debug!(error = %err, "poll stopped by a failed refresh");
            self.handle.reject(err);
            return;
        }
        if self.condition.satisfied(&self.entity) {
            self.handle.resolve(self.entity.clone());
            return;
        }
        let scheduler = Arc::clone(&self.entity.config().scheduler);
        if let Some(timeout) = self.timeout {
            if scheduler.now().saturating_duration_since(self.started) >= timeout {
                debug!(?timeout, "poll timed out");
                self.handle.reject(SyncError::Timeout);
                return;
            }
        }
        let interval = self.interval;
        scheduler.schedule(interval, Box::new(move || self.tick()));
    }
}

impl Entity {
    /// Refreshes repeatedly until the poll condition settles.
    ///
    /// Every tick is a forced refresh. After each one the condition is
    /// checked first, then the time budget; running out of budget rejects
    /// with `Timeout`, even while a refresh is still unanswered. A failed
    /// refresh rejects the poll with its error.
    pub fn poll(&self, options: PollOptions) -> Pending<Entity> {
        let config = self.config();
        let handle = Pending::new();
        let run = Arc::new(PollRun {
            entity: self.clone(),
            condition: options.condition,
            interval: options.interval.unwrap_or(config.poll_interval),
            timeout: options.timeout.or(config.poll_timeout),
            params: options.params,
            started: config.scheduler.now(),
            handle: handle.clone(),
        });
        if let Some(timeout) = run.timeout {
            let deadline = handle.clone();
            config.scheduler.schedule(
                timeout,
                Box::new(move || {
                    if deadline.is_pending() {
                        debug!(?timeout, "poll deadline passed");
                        deadline.reject(SyncError::Timeout);
                    }
                }),
            );
        }
        run.tick();
        handle
    }
}
