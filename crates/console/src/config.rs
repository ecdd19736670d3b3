use std::time::Duration;

use crate::history::HistoryConfig;

pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:5050";

/// How hard to try a move command before giving up on the link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; a command is sent at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplayConfig {
    pub poll_interval: Duration,
    pub history: HistoryConfig,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            poll_interval: Duration::from_millis(100),
            history: HistoryConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsoleConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub replay: ReplayConfig,
}

pub struct ConfigBuilder {
    base_url: String,
    request_timeout: Duration,
    retry: RetryPolicy,
    replay: ReplayConfig,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_owned(),
            request_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            replay: ReplayConfig::default(),
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> ConsoleConfig {
        ConsoleConfig {
            base_url: self.base_url.clone(),
            request_timeout: self.request_timeout,
            retry: self.retry,
            replay: self.replay,
        }
    }

    pub fn with_base_url(&mut self, url: impl Into<String>) -> &mut Self {
        self.base_url = url.into();
        self
    }

    pub fn with_request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_max_retries(&mut self, retries: u32) -> &mut Self {
        self.retry.max_retries = retries;
        self
    }

    pub fn with_backoff(&mut self, backoff: Duration) -> &mut Self {
        self.retry.backoff = backoff;
        self
    }

    pub fn with_poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.replay.poll_interval = interval;
        self
    }

    pub fn with_history_len(&mut self, len: usize) -> &mut Self {
        self.replay.history.max_len = len;
        self
    }

    pub fn with_history_age(&mut self, age: Duration) -> &mut Self {
        self.replay.history.max_age = age;
        self
    }
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        ConfigBuilder::default().build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ConsoleConfig::default();
        assert_eq!(cfg.base_url, "http://127.0.0.1:5050");
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.backoff, Duration::from_secs(1));
        assert_eq!(cfg.replay.poll_interval, Duration::from_millis(100));
        assert_eq!(cfg.replay.history.max_len, 10);
        assert_eq!(cfg.replay.history.max_age, Duration::from_secs(3));
    }

    #[test]
    fn builder_chains() {
        let cfg = ConfigBuilder::default()
            .with_base_url("http://arm:8080")
            .with_max_retries(0)
            .with_backoff(Duration::from_millis(10))
            .with_poll_interval(Duration::from_millis(250))
            .with_history_len(50)
            .build();
        assert_eq!(cfg.base_url, "http://arm:8080");
        assert_eq!(cfg.retry.max_retries, 0);
        assert_eq!(cfg.retry.backoff, Duration::from_millis(10));
        assert_eq!(cfg.replay.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.replay.history.max_len, 50);
    }
}
