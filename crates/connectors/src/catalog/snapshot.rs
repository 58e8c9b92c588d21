use crate::catalog::{
    CatalogApi, SearchHit, SearchPage, SearchQuery, WriteSummary, error::CatalogError,
};
use async_trait::async_trait;
use model::catalog::record::{CurrentRecord, RemoteId, UpdatePayload};
use std::{
    io::Write,
    path::{Path, PathBuf},
};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Catalog backed by an exported JSON array of records.
///
/// Search is a case-insensitive substring match on the identifier, like the
/// remote API's fuzzy search, so callers still have to page and verify hits.
pub struct SnapshotCatalog {
    records: RwLock<Vec<CurrentRecord>>,
    path: Option<PathBuf>,
}

impl SnapshotCatalog {
    pub fn in_memory(records: Vec<CurrentRecord>) -> Self {
        SnapshotCatalog {
            records: RwLock::new(records),
            path: None,
        }
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path).await?;
        let records: Vec<CurrentRecord> = serde_json::from_slice(&bytes)?;
        info!(path = %path.display(), records = records.len(), "Loaded catalog snapshot");
        Ok(SnapshotCatalog {
            records: RwLock::new(records),
            path: Some(path),
        })
    }

    pub async fn records(&self) -> Vec<CurrentRecord> {
        self.records.read().await.clone()
    }

    async fn save(&self, records: &[CurrentRecord]) -> Result<(), CatalogError> {
        let Some(path) = self.path.clone() else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(records)?;
        tokio::task::spawn_blocking(move || persist_atomically(&path, &bytes))
            .await
            .map_err(|e| CatalogError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<(), CatalogError> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CatalogError::Io(e.error))?;
    Ok(())
}

fn fold(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

#[async_trait]
impl CatalogApi for SnapshotCatalog {
    async fn search(
        &self,
        query: &SearchQuery,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, CatalogError> {
        let needle = fold(&query.identifier);
        let records = self.records.read().await;

        let mut matches: Vec<&CurrentRecord> = records
            .iter()
            .filter(|r| !needle.is_empty() && fold(&r.identifier).contains(&needle))
            .collect();
        matches.sort_by_key(|r| r.id);

        let per_page = per_page.max(1) as usize;
        let skip = (page.max(1) as usize - 1) * per_page;
        let hits = matches
            .iter()
            .skip(skip)
            .take(per_page)
            .map(|r| SearchHit {
                id: r.id,
                identifier: r.identifier.clone(),
                manufacturer: r.manufacturer.clone(),
            })
            .collect();

        Ok(SearchPage {
            hits,
            total: matches.len() as u64,
        })
    }

    async fn fetch_by_id(&self, id: RemoteId) -> Result<CurrentRecord, CatalogError> {
        self.records
            .read()
            .await
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or(CatalogError::NotFound(id))
    }

    async fn bulk_write(&self, patches: &[UpdatePayload]) -> Result<WriteSummary, CatalogError> {
        let snapshot = {
            let mut records = self.records.write().await;
            let mut written = 0;
            for patch in patches {
                if let Some(record) = records.iter_mut().find(|r| r.id == patch.id) {
                    record.apply(patch);
                    written += 1;
                }
            }
            debug!(requested = patches.len(), written, "Applied bulk write");
            (records.clone(), written)
        };

        self.save(&snapshot.0).await?;
        Ok(WriteSummary {
            written: snapshot.1,
        })
    }
}
