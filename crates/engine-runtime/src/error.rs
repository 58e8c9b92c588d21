use connectors::{catalog::error::CatalogError, file::csv::error::FileError};
use engine_config::error::SettingsError;
use engine_core::error::{QueueError, StateStoreError};
use engine_processing::error::ProcessingError;
use thiserror::Error;

/// Top-level errors for a reconciliation run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Initialization error.
    #[error("Initialization error: {0}")]
    InitializationError(String),

    /// Setting error.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Source file error: {0}")]
    File(#[from] FileError),

    #[error("Sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("State store error: {0}")]
    State(#[from] StateStoreError),

    #[error("Job queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Buffered and streaming reads of the same file planned differently.
    #[error("Plan mismatch for '{file_key}': {detail}")]
    PlanMismatch { file_key: String, detail: String },

    /// An error occurred while joining a task.
    /// This usually indicates that the task was cancelled or panicked.
    #[error("Task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Shutdown requested")]
    ShutdownRequested,
}
