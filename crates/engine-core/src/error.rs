use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("State storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode state: {0}")]
    Encode(#[from] bincode::Error),

    #[error("Document I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt counter value under key {0}")]
    CorruptCounter(String),

    #[error("State transaction aborted: {0}")]
    Aborted(String),
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("Failed to encode queued job: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Unknown job: {0}")]
    UnknownJob(String),
}
