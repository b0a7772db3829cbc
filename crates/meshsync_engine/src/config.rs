//! Configuration for the sync engine.

use crate::scheduler::{Scheduler, ThreadScheduler};
use meshsync_codec::MimeType;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Configuration shared by every channel of a resource.
#[derive(Clone)]
pub struct EngineConfig {
    /// Prefix prepended to every channel path (e.g., "https://api.example.com").
    pub base_url: String,
    /// Headers sent with every request.
    pub headers: BTreeMap<String, String>,
    /// Default body encoding.
    pub mimetype: MimeType,
    /// Delay between poll ticks.
    pub poll_interval: Duration,
    /// Default time budget for a poll; `None` polls indefinitely.
    pub poll_timeout: Option<Duration>,
    /// Timer source for polling.
    pub scheduler: Arc<dyn Scheduler>,
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self {
            base_url: String::new(),
            headers: BTreeMap::new(),
            mimetype: MimeType::Json,
            poll_interval: Duration::from_secs(1),
            poll_timeout: None,
            scheduler: Arc::new(ThreadScheduler),
        }
    }

    /// Sets the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Adds a default header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the default body encoding.
    pub fn with_mimetype(mut self, mimetype: MimeType) -> Self {
        self.mimetype = mimetype;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the default poll time budget.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = Some(timeout);
        self
    }

    /// Sets the scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("headers", &self.headers)
            .field("mimetype", &self.mimetype)
            .field("poll_interval", &self.poll_interval)
            .field("poll_timeout", &self.poll_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.base_url, "");
        assert_eq!(config.mimetype, MimeType::Json);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.poll_timeout.is_none());
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .with_base_url("https://api.example.com/")
            .with_header("Authorization", "Bearer token")
            .with_mimetype(MimeType::Cbor)
            .with_poll_interval(Duration::from_millis(250))
            .with_poll_timeout(Duration::from_secs(10));
        assert_eq!(config.base_url, "https://api.example.com");
        assert_eq!(config.headers["Authorization"], "Bearer token");
        assert_eq!(config.mimetype, MimeType::Cbor);
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.poll_timeout, Some(Duration::from_secs(10)));
    }
}
