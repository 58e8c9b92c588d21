use crate::{
    error::StateStoreError,
    state::{
        CheckpointStore, ProgressCounters,
        models::{AdvanceOutcome, Checkpoint, RecordOutcome},
    },
};
use async_trait::async_trait;
use model::execution::progress::RowCounts;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::path::Path;
use tracing::debug;

/// Fast store for checkpoints and counters.
#[derive(Clone)]
pub struct SledStateStore {
    db: sled::Db,
}

impl SledStateStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StateStoreError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }

    pub fn from_db(db: sled::Db) -> Self {
        Self { db }
    }

    #[inline]
    fn chk_key(file_key: &str) -> String {
        format!("chk:{}", file_key)
    }

    #[inline]
    fn cnt_key(file_key: &str) -> String {
        format!("cnt:{}", file_key)
    }

    #[inline]
    fn done_prefix(file_key: &str) -> String {
        format!("done:{}\0", file_key)
    }

    #[inline]
    fn done_key(file_key: &str, job_id: &str) -> String {
        format!("{}{}", Self::done_prefix(file_key), job_id)
    }
}

fn abort<E: Into<StateStoreError>>(e: E) -> ConflictableTransactionError<StateStoreError> {
    ConflictableTransactionError::Abort(e.into())
}

fn unwrap_tx<T>(
    result: Result<T, TransactionError<StateStoreError>>,
) -> Result<T, StateStoreError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(StateStoreError::Storage(e)),
    }
}

#[async_trait]
impl CheckpointStore for SledStateStore {
    async fn advance(
        &self,
        file_key: &str,
        candidate: u64,
        total_rows: u64,
    ) -> Result<AdvanceOutcome, StateStoreError> {
        let key = Self::chk_key(file_key);

        // Compare and store in one transaction; sled reruns the closure on
        // conflict, so concurrent writers always compare against the latest value.
        let result = self.db.transaction::<_, _, StateStoreError>(|tx_db| {
            let previous = match tx_db.get(&key)? {
                Some(bytes) => {
                    let existing: Checkpoint = bincode::deserialize(&bytes).map_err(abort)?;
                    if existing.last_processed_row >= candidate {
                        return Ok(AdvanceOutcome::Unchanged {
                            current: existing.last_processed_row,
                        });
                    }
                    Some(existing.last_processed_row)
                }
                None => None,
            };

            let cp = Checkpoint::new(file_key, candidate, total_rows);
            let bytes = bincode::serialize(&cp).map_err(abort)?;
            tx_db.insert(key.as_bytes(), bytes)?;
            Ok(AdvanceOutcome::Advanced {
                previous,
                current: candidate,
            })
        });

        let outcome = unwrap_tx(result)?;
        if outcome.advanced() {
            self.db.flush_async().await?;
            debug!(file_key, row = candidate, "Checkpoint advanced");
        }
        Ok(outcome)
    }

    async fn read(&self, file_key: &str) -> Result<Option<Checkpoint>, StateStoreError> {
        match self.db.get(Self::chk_key(file_key))? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self, file_key: &str) -> Result<(), StateStoreError> {
        self.db.remove(Self::chk_key(file_key))?;
        self.db.flush_async().await?;
        Ok(())
    }
}

#[async_trait]
impl ProgressCounters for SledStateStore {
    async fn increment(
        &self,
        file_key: &str,
        delta: RowCounts,
    ) -> Result<RowCounts, StateStoreError> {
        let key = Self::cnt_key(file_key);

        let result = self.db.transaction::<_, _, StateStoreError>(|tx_db| {
            let mut counts = match tx_db.get(&key)? {
                Some(bytes) => bincode::deserialize::<RowCounts>(&bytes).map_err(abort)?,
                None => RowCounts::default(),
            };
            counts.add(delta);
            let bytes = bincode::serialize(&counts).map_err(abort)?;
            tx_db.insert(key.as_bytes(), bytes)?;
            Ok(counts)
        });

        unwrap_tx(result)
    }

    async fn increment_once(
        &self,
        file_key: &str,
        job_id: &str,
        delta: RowCounts,
    ) -> Result<RecordOutcome, StateStoreError> {
        let key = Self::cnt_key(file_key);
        let marker = Self::done_key(file_key, job_id);

        // Marker and totals change together, so a redelivered job can never
        // count its rows twice.
        let result = self.db.transaction::<_, _, StateStoreError>(|tx_db| {
            let mut counts = match tx_db.get(&key)? {
                Some(bytes) => bincode::deserialize::<RowCounts>(&bytes).map_err(abort)?,
                None => RowCounts::default(),
            };
            if tx_db.get(&marker)?.is_some() {
                return Ok(RecordOutcome::AlreadyRecorded(counts));
            }
            counts.add(delta);
            let bytes = bincode::serialize(&counts).map_err(abort)?;
            tx_db.insert(key.as_bytes(), bytes)?;
            let delta_bytes = bincode::serialize(&delta).map_err(abort)?;
            tx_db.insert(marker.as_bytes(), delta_bytes)?;
            Ok(RecordOutcome::Recorded(counts))
        });

        let outcome = unwrap_tx(result)?;
        if !outcome.recorded() {
            debug!(file_key, job_id, "Job outcomes already counted");
        }
        Ok(outcome)
    }

    async fn counts(&self, file_key: &str) -> Result<RowCounts, StateStoreError> {
        match self.db.get(Self::cnt_key(file_key))? {
            Some(bytes) => Ok(bincode::deserialize(&bytes)?),
            None => Ok(RowCounts::default()),
        }
    }

    async fn reset(&self, file_key: &str) -> Result<(), StateStoreError> {
        self.db.remove(Self::cnt_key(file_key))?;
        for entry in self.db.scan_prefix(Self::done_prefix(file_key)) {
            let (marker, _) = entry?;
            self.db.remove(marker)?;
        }
        Ok(())
    }
}
