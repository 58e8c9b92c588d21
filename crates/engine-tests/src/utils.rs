#![allow(dead_code)]

use async_trait::async_trait;
use connectors::catalog::{
    CatalogApi, SearchPage, SearchQuery, WriteSummary, error::CatalogError,
    snapshot::SnapshotCatalog,
};
use engine_config::settings::{Settings, sections::DispatcherSettings};
use engine_processing::transform::candidate::{ADDITIONAL_ATTRIBUTES, derive_sku};
use engine_runtime::execution::{context::RuntimeContext, source::SourceFile};
use model::catalog::record::{Attribute, CurrentRecord, RemoteId, UpdatePayload};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

pub const FILE_KEY: &str = "vendor.csv";
pub const MANUFACTURER: &str = "Acme";

pub fn identifier(i: usize) -> String {
    format!("AB-{i}")
}

/// Settings with no pacing and short waits, rooted at `state_dir`.
pub fn test_settings(state_dir: &Path) -> Settings {
    let mut settings = Settings::default().with_state_dir(state_dir);
    settings.source.batch_size = 2;
    settings.dispatcher = DispatcherSettings {
        max_concurrent: 4,
        min_spacing_ms: 0,
        max_attempts: 4,
        base_delay_ms: 1,
        max_delay_ms: 5,
        call_timeout_secs: 5,
    };
    settings.workers.count = 2;
    settings.workers.job_timeout_secs = 5;
    settings.workers.poll_interval_ms = 10;
    settings.workers.redelivery_delay_ms = 10;
    settings
}

/// A remote record the vendor file agrees with on every tracked field.
pub fn record(id: u64, i: usize) -> CurrentRecord {
    let identifier = identifier(i);
    CurrentRecord {
        id: RemoteId(id),
        sku: derive_sku(MANUFACTURER, &identifier),
        identifier,
        manufacturer: MANUFACTURER.into(),
        name: format!("Relay {i}"),
        description: String::new(),
        attributes: vec![Attribute::new(ADDITIONAL_ATTRIBUTES, "color: Black")],
    }
}

/// Records for rows `0..rows`, with ids starting at 100.
pub fn catalog_records(rows: usize) -> Vec<CurrentRecord> {
    (0..rows).map(|i| record(100 + i as u64, i)).collect()
}

/// A vendor file of `rows` rows. Rows listed in `renamed` carry a new name.
pub fn vendor_csv(rows: usize, renamed: &[usize]) -> String {
    let mut csv = String::from("MPN,Brand,Product Name,Color\n");
    for i in 0..rows {
        let suffix = if renamed.contains(&i) { " Pro" } else { "" };
        csv.push_str(&format!("{},{MANUFACTURER},Relay {i}{suffix},Black\n", identifier(i)));
    }
    csv
}

pub fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("write csv fixture");
    path
}

/// A state dir, an opened runtime and a vendor file written next to it.
pub struct Fixture {
    pub dir: TempDir,
    pub ctx: RuntimeContext,
    pub file: SourceFile,
}

impl Fixture {
    pub fn new(csv: &str) -> Self {
        Self::with_settings(csv, |_| {})
    }

    pub fn with_settings(csv: &str, adjust: impl FnOnce(&mut Settings)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut settings = test_settings(&dir.path().join("state"));
        adjust(&mut settings);
        let path = write_csv(dir.path(), FILE_KEY, csv);
        let ctx = RuntimeContext::open(settings).expect("open runtime");
        let file = SourceFile::open(&ctx.settings, &path, None, None).expect("open source");
        Fixture { dir, ctx, file }
    }
}

/// Wraps a snapshot with injected faults and call counters.
pub struct FlakyCatalog {
    pub inner: Arc<SnapshotCatalog>,
    failing_searches: AtomicU32,
    hanging_searches: AtomicU32,
    missing: Vec<RemoteId>,
    write_status: Option<u16>,
    pub searches: AtomicU32,
    fetches: Mutex<HashMap<RemoteId, u32>>,
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FlakyCatalog {
    pub fn new(records: Vec<CurrentRecord>) -> Self {
        FlakyCatalog {
            inner: Arc::new(SnapshotCatalog::in_memory(records)),
            failing_searches: AtomicU32::new(0),
            hanging_searches: AtomicU32::new(0),
            missing: Vec::new(),
            write_status: None,
            searches: AtomicU32::new(0),
            fetches: Mutex::new(HashMap::new()),
        }
    }

    /// The next `n` searches answer 503.
    pub fn failing_searches(self, n: u32) -> Self {
        self.failing_searches.store(n, Ordering::SeqCst);
        self
    }

    /// The next `n` searches never answer.
    pub fn hanging_searches(self, n: u32) -> Self {
        self.hanging_searches.store(n, Ordering::SeqCst);
        self
    }

    /// Fetching `id` answers 404 although search still finds it.
    pub fn missing(mut self, id: u64) -> Self {
        self.missing.push(RemoteId(id));
        self
    }

    pub fn rejecting_writes(mut self, status: u16) -> Self {
        self.write_status = Some(status);
        self
    }

    pub fn fetches_of(&self, id: u64) -> u32 {
        self.fetches
            .lock()
            .expect("fetch counter")
            .get(&RemoteId(id))
            .copied()
            .unwrap_or(0)
    }

    pub async fn name_of(&self, id: u64) -> String {
        self.inner
            .fetch_by_id(RemoteId(id))
            .await
            .map(|r| r.name)
            .unwrap_or_default()
    }
}

#[async_trait]
impl CatalogApi for FlakyCatalog {
    async fn search(
        &self,
        query: &SearchQuery,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, CatalogError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if take_one(&self.hanging_searches) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if take_one(&self.failing_searches) {
            return Err(CatalogError::status(503, "service unavailable"));
        }
        self.inner.search(query, page, per_page).await
    }

    async fn fetch_by_id(&self, id: RemoteId) -> Result<CurrentRecord, CatalogError> {
        *self
            .fetches
            .lock()
            .expect("fetch counter")
            .entry(id)
            .or_default() += 1;
        if self.missing.contains(&id) {
            return Err(CatalogError::NotFound(id));
        }
        self.inner.fetch_by_id(id).await
    }

    async fn bulk_write(&self, patches: &[UpdatePayload]) -> Result<WriteSummary, CatalogError> {
        if let Some(status) = self.write_status {
            return Err(CatalogError::status(status, "rejected"));
        }
        self.inner.bulk_write(patches).await
    }
}
