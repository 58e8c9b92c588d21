use connectors::file::csv::error::FileError;
use engine_core::error::{QueueError, StateStoreError};
use thiserror::Error;

/// Errors that abort planning or a whole job. Row-scoped and remote failures
/// are counted, not raised.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("Source file error: {0}")]
    File(#[from] FileError),

    #[error("State store operation failed: {0}")]
    State(#[from] StateStoreError),

    #[error("Job queue operation failed: {0}")]
    Queue(#[from] QueueError),

    #[error("Status log flush for '{file_key}' failed after {attempts} attempt(s): {source}")]
    StatusFlush {
        file_key: String,
        attempts: usize,
        #[source]
        source: StateStoreError,
    },
}
