use crate::{
    error::StateStoreError,
    state::models::{AdvanceOutcome, Checkpoint, RecordOutcome},
};
use async_trait::async_trait;
use model::execution::{progress::ProgressDocument, progress::RowCounts, status::StatusNotes};

pub mod documents;
pub mod models;
pub mod sled_store;

/// Monotonic "highest row processed" marker per file.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stores `candidate` only if it is strictly greater than the stored value.
    async fn advance(
        &self,
        file_key: &str,
        candidate: u64,
        total_rows: u64,
    ) -> Result<AdvanceOutcome, StateStoreError>;

    async fn read(&self, file_key: &str) -> Result<Option<Checkpoint>, StateStoreError>;

    async fn clear(&self, file_key: &str) -> Result<(), StateStoreError>;
}

/// Atomically incremented per-file outcome counters.
#[async_trait]
pub trait ProgressCounters: Send + Sync {
    /// Adds `delta` and returns the totals after the increment.
    async fn increment(&self, file_key: &str, delta: RowCounts)
    -> Result<RowCounts, StateStoreError>;

    /// Adds `delta` the first time `job_id` reports for `file_key`. Later
    /// deliveries of the same job leave the totals untouched.
    async fn increment_once(
        &self,
        file_key: &str,
        job_id: &str,
        delta: RowCounts,
    ) -> Result<RecordOutcome, StateStoreError>;

    async fn counts(&self, file_key: &str) -> Result<RowCounts, StateStoreError>;

    /// Drops the totals and every per-job marker of `file_key`.
    async fn reset(&self, file_key: &str) -> Result<(), StateStoreError>;
}

/// Slower, human-readable per-file documents.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn load_progress(&self, file_key: &str)
    -> Result<Option<ProgressDocument>, StateStoreError>;

    /// Writes `doc`, never moving the stored `lastProcessedRow` backwards.
    async fn save_progress(&self, doc: &ProgressDocument) -> Result<(), StateStoreError>;

    async fn load_status(&self, file_key: &str) -> Result<StatusNotes, StateStoreError>;

    /// Merges `notes` into the stored log and returns the merged contents.
    async fn merge_status(
        &self,
        file_key: &str,
        notes: &StatusNotes,
    ) -> Result<StatusNotes, StateStoreError>;

    async fn clear(&self, file_key: &str) -> Result<(), StateStoreError>;
}
