use chrono::{DateTime, Utc};
use std::time::Duration;

/// 2022-02-24T03:00:00Z as a Unix timestamp
const DEFAULT_SPLIT_INSTANT_SECS: i64 = 1_645_671_600;

/// Default before/after boundary for edge bucketing.
pub fn default_split_instant() -> DateTime<Utc> {
    DateTime::from_timestamp(DEFAULT_SPLIT_INSTANT_SECS, 0).unwrap_or_default()
}

/// Configuration for the crawl driver
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// References observed strictly before this instant land in the `before` bucket
    pub split_instant: DateTime<Utc>,
    /// Skip group-type (non-broadcast) channels entirely
    pub exclude_groups: bool,
    /// Concurrent driver loops sharing one frontier
    pub workers: usize,
    /// Idle wait between frontier polls in long-running mode
    pub poll_interval: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            split_instant: default_split_instant(),
            exclude_groups: true,
            workers: 1,
            poll_interval: Duration::from_secs(30),
        }
    }
}

impl CrawlConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_split_instant(mut self, split_instant: DateTime<Utc>) -> Self {
        self.split_instant = split_instant;
        self
    }

    pub fn with_exclude_groups(mut self, exclude_groups: bool) -> Self {
        self.exclude_groups = exclude_groups;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_split_instant() {
        assert_eq!(default_split_instant().to_rfc3339(), "2022-02-24T03:00:00+00:00");
    }

    #[test]
    fn test_workers_never_zero() {
        assert_eq!(CrawlConfig::new().with_workers(0).workers, 1);
    }
}
