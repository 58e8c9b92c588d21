use connectors::file::csv::{
    normalize::ColumnMapping,
    settings::{CsvSettings, SourceMode},
};
use engine_core::{dispatch::DispatcherConfig, retry::RetryPolicy};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// Holds the sled database and the JSON documents. Defaults to
    /// `~/.reconcile/state`.
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceSettings {
    pub batch_size: usize,
    pub header_row: usize,
    pub mode: SourceMode,
    pub delimiter: char,
    pub mapping: Option<ColumnMapping>,
}

impl Default for SourceSettings {
    fn default() -> Self {
        SourceSettings {
            batch_size: 50,
            header_row: 0,
            mode: SourceMode::Streaming,
            delimiter: ',',
            mapping: None,
        }
    }
}

impl SourceSettings {
    /// Reader settings; assumes the delimiter was validated as ASCII.
    pub fn csv_settings(&self) -> CsvSettings {
        CsvSettings {
            delimiter: u8::try_from(self.delimiter).unwrap_or(b','),
            header_row: self.header_row,
            mode: self.mode,
        }
    }

    pub fn mapping(&self) -> Option<&ColumnMapping> {
        self.mapping.as_ref().filter(|m| !m.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    pub max_concurrent: usize,
    pub min_spacing_ms: u64,
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub call_timeout_secs: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        DispatcherSettings {
            max_concurrent: 4,
            min_spacing_ms: 250,
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 60_000,
            call_timeout_secs: 180,
        }
    }
}

impl DispatcherSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_concurrent: self.max_concurrent,
            min_spacing: Duration::from_millis(self.min_spacing_ms),
            call_timeout: Duration::from_secs(self.call_timeout_secs),
            retry: self.retry_policy(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub count: usize,
    pub job_timeout_secs: u64,
    pub max_job_attempts: u32,
    pub poll_interval_ms: u64,
    pub redelivery_delay_ms: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        WorkerSettings {
            count: 2,
            job_timeout_secs: 900,
            max_job_attempts: 3,
            poll_interval_ms: 500,
            redelivery_delay_ms: 5000,
        }
    }
}

impl WorkerSettings {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

/// How a row with no matching remote record is counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissPolicy {
    #[default]
    Skipped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingSettings {
    pub status_flush_every: usize,
    pub lookup_cache_ttl_secs: u64,
    pub lookup_cache_capacity: usize,
    pub lookup_page_size: u32,
    pub miss_policy: MissPolicy,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        ProcessingSettings {
            status_flush_every: 50,
            lookup_cache_ttl_secs: 600,
            lookup_cache_capacity: 10_000,
            lookup_page_size: 100,
            miss_policy: MissPolicy::Skipped,
        }
    }
}

/// Comparison rule applied to a tracked field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    ImageRef,
    DocumentRef,
    AttributeBlock,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedField {
    pub key: String,
    pub kind: FieldKind,
}

impl TrackedField {
    pub fn new(key: &str, kind: FieldKind) -> Self {
        TrackedField {
            key: key.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffSettings {
    pub tracked_fields: Vec<TrackedField>,
    /// Hosts whose URLs are never written (hot-linking).
    pub disallowed_hosts: Vec<String>,
    /// Host of this system's own object storage.
    pub storage_host: Option<String>,
    /// Deployment environment this process writes for.
    pub environment: Option<String>,
    /// Path segments that name a deployment environment in storage URLs.
    pub known_environments: Vec<String>,
}

impl Default for DiffSettings {
    fn default() -> Self {
        DiffSettings {
            tracked_fields: vec![
                TrackedField::new("name", FieldKind::Text),
                TrackedField::new("sku", FieldKind::Text),
                TrackedField::new("description", FieldKind::Text),
                TrackedField::new("category", FieldKind::Text),
                TrackedField::new("image", FieldKind::ImageRef),
                TrackedField::new("datasheet", FieldKind::DocumentRef),
                TrackedField::new("additional_attributes", FieldKind::AttributeBlock),
            ],
            disallowed_hosts: Vec::new(),
            storage_host: None,
            environment: None,
            known_environments: vec![
                "production".into(),
                "staging".into(),
                "development".into(),
            ],
        }
    }
}
