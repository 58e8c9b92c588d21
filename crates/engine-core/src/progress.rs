use crate::{
    error::StateStoreError,
    state::{
        CheckpointStore, DocumentStore, ProgressCounters,
        models::{AdvanceOutcome, Checkpoint, RecordOutcome},
    },
};
use model::{
    execution::progress::{JobLevel, ProgressDocument, RowCounts, RowLevel},
    records::job::JobCounts,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Joins the fast checkpoint store, the counters and the durable documents
/// behind one handle.
#[derive(Clone)]
pub struct ProgressService {
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub counters: Arc<dyn ProgressCounters>,
    pub documents: Arc<dyn DocumentStore>,
}

impl ProgressService {
    pub fn new(
        checkpoints: Arc<dyn CheckpointStore>,
        counters: Arc<dyn ProgressCounters>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        ProgressService {
            checkpoints,
            counters,
            documents,
        }
    }

    /// Row index planning should resume from.
    ///
    /// Falls back to the durable document when the fast store has nothing or
    /// cannot be read, and re-seeds the fast store from it.
    pub async fn resume_point(&self, file_key: &str) -> Result<u64, StateStoreError> {
        match self.checkpoints.read(file_key).await {
            Ok(Some(cp)) => return Ok(cp.last_processed_row),
            Ok(None) => {}
            Err(e) => {
                warn!(
                    file_key,
                    error = %e,
                    "Fast checkpoint unreadable, falling back to progress document"
                );
            }
        }

        let Some(doc) = self.documents.load_progress(file_key).await? else {
            return Ok(0);
        };
        let row = doc.row_level.last_processed_row;
        if row == 0 {
            return Ok(0);
        }

        info!(file_key, row, "Re-seeding checkpoint from progress document");
        if let Err(e) = self
            .checkpoints
            .advance(file_key, row, doc.row_level.total_rows)
            .await
        {
            warn!(file_key, error = %e, "Failed to re-seed checkpoint");
        }
        match self.counters.counts(file_key).await {
            Ok(counts) if counts.is_empty() => {
                self.counters
                    .increment(file_key, doc.row_level.counts())
                    .await?;
            }
            Ok(_) => {}
            Err(e) => warn!(file_key, error = %e, "Failed to re-seed counters"),
        }
        Ok(row)
    }

    /// Proposes `candidate` as the new checkpoint. The progress document is
    /// refreshed when the proposal was accepted or no document exists yet.
    pub async fn advance(
        &self,
        file_key: &str,
        candidate: u64,
        total_rows: u64,
        jobs: JobCounts,
    ) -> Result<AdvanceOutcome, StateStoreError> {
        let outcome = self
            .checkpoints
            .advance(file_key, candidate, total_rows)
            .await?;

        if outcome.advanced() || self.documents.load_progress(file_key).await?.is_none() {
            let counts = self.counters.counts(file_key).await?;
            let doc = ProgressDocument::new(
                file_key,
                RowLevel::new(outcome.current(), total_rows, counts),
                JobLevel::from(jobs),
            );
            self.documents.save_progress(&doc).await?;
        }

        Ok(outcome)
    }

    /// Adds the row outcomes of one job. Only the first delivery of a job
    /// is counted.
    pub async fn record(
        &self,
        file_key: &str,
        job_id: &str,
        counts: RowCounts,
    ) -> Result<RecordOutcome, StateStoreError> {
        self.counters.increment_once(file_key, job_id, counts).await
    }

    /// Live progress from the fast stores, using the stored document for
    /// anything the fast store does not know.
    pub async fn status(
        &self,
        file_key: &str,
        jobs: JobCounts,
    ) -> Result<ProgressDocument, StateStoreError> {
        let stored = self.documents.load_progress(file_key).await?;
        let checkpoint: Option<Checkpoint> = self.checkpoints.read(file_key).await?;
        let counts = self.counters.counts(file_key).await?;

        let (last, total) = match (&checkpoint, &stored) {
            (Some(cp), _) => (cp.last_processed_row, cp.total_rows),
            (None, Some(doc)) => (
                doc.row_level.last_processed_row,
                doc.row_level.total_rows,
            ),
            (None, None) => (0, 0),
        };
        let counts = if counts.is_empty() {
            stored.map(|d| d.row_level.counts()).unwrap_or_default()
        } else {
            counts
        };

        Ok(ProgressDocument::new(
            file_key,
            RowLevel::new(last, total, counts),
            JobLevel::from(jobs),
        ))
    }

    /// True once every row of the file has an outcome.
    pub async fn is_complete(
        &self,
        file_key: &str,
        total_rows: u64,
    ) -> Result<bool, StateStoreError> {
        let counts = self.counters.counts(file_key).await?;
        Ok(total_rows > 0 && counts.completed() >= total_rows)
    }

    pub async fn clear(&self, file_key: &str) -> Result<(), StateStoreError> {
        self.checkpoints.clear(file_key).await?;
        self.counters.reset(file_key).await?;
        self.documents.clear(file_key).await?;
        info!(file_key, "Cleared progress");
        Ok(())
    }
}
