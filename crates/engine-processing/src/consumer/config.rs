use crate::transform::diff::DiffRules;
use connectors::file::csv::normalize::ColumnMapping;
use engine_config::settings::{Settings, sections::MissPolicy};
use engine_core::retry::RetryPolicy;
use std::time::Duration;

/// Configuration for row processing.
#[derive(Clone, Debug)]
pub struct ProcessorConfig {
    /// Status notes buffered before a flush to the status log
    pub status_flush_every: usize,

    /// How a row with no remote record is counted
    pub miss_policy: MissPolicy,

    /// Search results requested per page during lookup
    pub lookup_page_size: u32,

    /// How long a resolved identifier stays cached
    pub lookup_cache_ttl: Duration,

    /// Cached identifiers kept before the oldest is evicted
    pub lookup_cache_capacity: usize,

    /// Retries for local state writes (status log)
    pub store_retry: RetryPolicy,

    /// Field rules for the diff engine
    pub diff: DiffRules,

    /// Explicit column mapping, so mapped columns are not repeated as attributes
    pub mapping: Option<ColumnMapping>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ProcessorConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        let processing = &settings.processing;
        Self {
            status_flush_every: processing.status_flush_every.max(1),
            miss_policy: processing.miss_policy,
            lookup_page_size: processing.lookup_page_size.max(1),
            lookup_cache_ttl: Duration::from_secs(processing.lookup_cache_ttl_secs),
            lookup_cache_capacity: processing.lookup_cache_capacity,
            store_retry: RetryPolicy::new(3, Duration::from_millis(200), Duration::from_secs(2)),
            diff: DiffRules::from_settings(&settings.diff),
            mapping: settings.source.mapping().cloned(),
        }
    }

    pub fn with_miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }

    pub fn with_status_flush_every(mut self, every: usize) -> Self {
        self.status_flush_every = every.max(1);
        self
    }

    pub fn with_store_retry(mut self, retry: RetryPolicy) -> Self {
        self.store_retry = retry;
        self
    }
}
