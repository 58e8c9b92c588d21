use crate::catalog::error::CatalogError;
use async_trait::async_trait;
use model::catalog::record::{CurrentRecord, RemoteId, UpdatePayload};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod snapshot;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub identifier: String,
    pub manufacturer: String,
}

/// A search result entry; enough to decide whether it is the record we want.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: RemoteId,
    pub identifier: String,
    pub manufacturer: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    /// Total matches reported by the server across all pages.
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteSummary {
    pub written: usize,
}

/// The remote catalog as seen by the pipeline.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// One page (1-based) of a fuzzy search for `query`.
    async fn search(
        &self,
        query: &SearchQuery,
        page: u32,
        per_page: u32,
    ) -> Result<SearchPage, CatalogError>;

    async fn fetch_by_id(&self, id: RemoteId) -> Result<CurrentRecord, CatalogError>;

    async fn bulk_write(&self, patches: &[UpdatePayload]) -> Result<WriteSummary, CatalogError>;
}
