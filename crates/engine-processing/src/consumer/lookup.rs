use crate::{retry::classify_catalog_error, transform::text::fold_identity};
use connectors::catalog::{CatalogApi, SearchHit, SearchQuery, error::CatalogError};
use engine_core::dispatch::{CallContext, DispatchError, Dispatcher};
use model::catalog::record::RemoteId;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
    time::Duration,
};
use tokio::{sync::Mutex, time::Instant};
use tracing::debug;

/// Bounded identifier -> id cache. Entries expire after `ttl`; at capacity
/// the oldest insertion is dropped.
#[derive(Debug)]
pub struct TtlCache {
    ttl: Duration,
    capacity: usize,
    entries: HashMap<String, (RemoteId, Instant)>,
    order: VecDeque<String>,
}

impl TtlCache {
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        TtlCache {
            ttl,
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&mut self, key: &str) -> Option<RemoteId> {
        let (id, inserted) = *self.entries.get(key)?;
        if inserted.elapsed() < self.ttl {
            return Some(id);
        }
        self.entries.remove(key);
        self.order.retain(|k| k != key);
        None
    }

    pub fn insert(&mut self, key: String, id: RemoteId) {
        if self.capacity == 0 || self.ttl.is_zero() {
            return;
        }
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        while self.entries.len() >= self.capacity && !self.entries.contains_key(&key) {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
        }
        self.entries.insert(key.clone(), (id, Instant::now()));
        self.order.push_back(key);
    }
}

fn cache_key(identifier: &str, manufacturer: &str) -> String {
    format!("{}\u{1f}{}", fold_identity(identifier), fold_identity(manufacturer))
}

/// Whether a search hit is the record for `identifier`/`manufacturer`.
/// Manufacturers are only compared when both sides have one.
pub fn is_match(hit: &SearchHit, identifier: &str, manufacturer: &str) -> bool {
    if fold_identity(&hit.identifier) != fold_identity(identifier) {
        return false;
    }
    let (ours, theirs) = (fold_identity(manufacturer), fold_identity(&hit.manufacturer));
    ours.is_empty() || theirs.is_empty() || ours == theirs
}

/// Resolves row identifiers to remote ids.
pub struct RecordLocator {
    catalog: Arc<dyn CatalogApi>,
    dispatcher: Arc<Dispatcher>,
    cache: Mutex<TtlCache>,
    page_size: u32,
}

impl RecordLocator {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        dispatcher: Arc<Dispatcher>,
        cache: TtlCache,
        page_size: u32,
    ) -> Self {
        RecordLocator {
            catalog,
            dispatcher,
            cache: Mutex::new(cache),
            page_size: page_size.max(1),
        }
    }

    /// Pages through search results until a match turns up or the reported
    /// total is exhausted. Misses are not cached.
    pub async fn locate(
        &self,
        identifier: &str,
        manufacturer: &str,
        ctx: &CallContext,
    ) -> Result<Option<RemoteId>, DispatchError<CatalogError>> {
        let key = cache_key(identifier, manufacturer);
        if let Some(id) = self.cache.lock().await.get(&key) {
            debug!(identifier, id = %id, "Lookup served from cache");
            return Ok(Some(id));
        }

        let query = Arc::new(SearchQuery {
            identifier: identifier.to_string(),
            manufacturer: manufacturer.to_string(),
        });
        let per_page = self.page_size;
        let mut page = 1u32;
        let mut seen = 0u64;

        loop {
            let result = self
                .dispatcher
                .schedule(
                    ctx,
                    || {
                        let catalog = self.catalog.clone();
                        let query = query.clone();
                        async move { catalog.search(&query, page, per_page).await }
                    },
                    classify_catalog_error,
                )
                .await?;

            if let Some(hit) = result
                .hits
                .iter()
                .find(|hit| is_match(hit, identifier, manufacturer))
            {
                self.cache.lock().await.insert(key, hit.id);
                return Ok(Some(hit.id));
            }

            seen += result.hits.len() as u64;
            if result.hits.is_empty() || seen >= result.total {
                debug!(identifier, pages = page, seen, "No matching record");
                return Ok(None);
            }
            page += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::catalog::{SearchPage, WriteSummary, snapshot::SnapshotCatalog};
    use engine_core::{dispatch::DispatcherConfig, metrics::Metrics, retry::RetryPolicy};
    use model::catalog::record::{CurrentRecord, UpdatePayload};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(id: u64, identifier: &str, manufacturer: &str) -> CurrentRecord {
        CurrentRecord {
            id: RemoteId(id),
            identifier: identifier.into(),
            manufacturer: manufacturer.into(),
            name: String::new(),
            sku: String::new(),
            description: String::new(),
            attributes: Vec::new(),
        }
    }

    /// Counts search calls on top of a snapshot.
    struct CountingCatalog {
        inner: SnapshotCatalog,
        searches: AtomicUsize,
    }

    #[async_trait]
    impl CatalogApi for CountingCatalog {
        async fn search(
            &self,
            query: &SearchQuery,
            page: u32,
            per_page: u32,
        ) -> Result<SearchPage, CatalogError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            self.inner.search(query, page, per_page).await
        }

        async fn fetch_by_id(&self, id: RemoteId) -> Result<CurrentRecord, CatalogError> {
            self.inner.fetch_by_id(id).await
        }

        async fn bulk_write(
            &self,
            patches: &[UpdatePayload],
        ) -> Result<WriteSummary, CatalogError> {
            self.inner.bulk_write(patches).await
        }
    }

    fn dispatcher() -> Arc<Dispatcher> {
        Arc::new(Dispatcher::new(
            DispatcherConfig {
                max_concurrent: 2,
                min_spacing: Duration::ZERO,
                call_timeout: Duration::from_secs(5),
                retry: RetryPolicy::immediate(3),
            },
            Metrics::new(),
        ))
    }

    fn locator(
        records: Vec<CurrentRecord>,
        page_size: u32,
    ) -> (RecordLocator, Arc<CountingCatalog>) {
        let catalog = Arc::new(CountingCatalog {
            inner: SnapshotCatalog::in_memory(records),
            searches: AtomicUsize::new(0),
        });
        let locator = RecordLocator::new(
            catalog.clone(),
            dispatcher(),
            TtlCache::new(Duration::from_secs(60), 16),
            page_size,
        );
        (locator, catalog)
    }

    fn ctx() -> CallContext {
        CallContext::new("test", "lookup")
    }

    #[tokio::test]
    async fn keeps_paging_until_the_match() {
        // Fuzzy search returns near-misses first.
        let (locator, catalog) = locator(
            vec![
                record(1, "AB-100-X", "Acme"),
                record(2, "AB-100-Y", "Acme"),
                record(3, "AB-100-Z", "Acme"),
                record(4, "AB-100", "Acme"),
            ],
            1,
        );

        let found = locator.locate("ab100", "ACME", &ctx()).await.unwrap();
        assert_eq!(found, Some(RemoteId(4)));
        assert_eq!(catalog.searches.load(Ordering::SeqCst), 4);

        // Second lookup is cached.
        locator.locate("AB-100", "Acme", &ctx()).await.unwrap();
        assert_eq!(catalog.searches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn stops_at_reported_total_and_does_not_cache_misses() {
        let (locator, catalog) = locator(
            vec![record(1, "AB-100-X", "Acme"), record(2, "AB-100-Y", "Acme")],
            1,
        );

        assert_eq!(locator.locate("AB-100", "Acme", &ctx()).await.unwrap(), None);
        assert_eq!(catalog.searches.load(Ordering::SeqCst), 2);

        assert_eq!(locator.locate("AB-100", "Acme", &ctx()).await.unwrap(), None);
        assert_eq!(catalog.searches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn manufacturer_mismatch_is_not_a_match() {
        let (locator, _) = locator(vec![record(1, "AB-100", "Other Co")], 10);
        assert_eq!(locator.locate("AB-100", "Acme", &ctx()).await.unwrap(), None);
        assert_eq!(
            locator.locate("AB-100", "", &ctx()).await.unwrap(),
            Some(RemoteId(1))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cache_entries_expire_and_evict_oldest() {
        let mut cache = TtlCache::new(Duration::from_secs(10), 2);
        cache.insert("a".into(), RemoteId(1));
        cache.insert("b".into(), RemoteId(2));
        cache.insert("c".into(), RemoteId(3));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("c"), Some(RemoteId(3)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.len(), 1);
    }
}
