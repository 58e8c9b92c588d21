use model::catalog::record::RemoteId;
use std::time::Duration;
use thiserror::Error;

/// Failures reported across the remote catalog boundary.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP {code}: {message}")]
    Status {
        code: u16,
        message: String,
        /// Server-provided hint, e.g. from a `Retry-After` header.
        retry_after: Option<Duration>,
    },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection error: {0}")]
    Network(String),

    #[error("Record {0} not found")]
    NotFound(RemoteId),

    #[error("Invalid response: {0}")]
    Decode(String),

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CatalogError {
    pub fn status(code: u16, message: impl Into<String>) -> Self {
        CatalogError::Status {
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        CatalogError::Status {
            code: 429,
            message: "Too Many Requests".into(),
            retry_after,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            CatalogError::Status { code, .. } => Some(*code),
            CatalogError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CatalogError::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<tokio::time::error::Elapsed> for CatalogError {
    fn from(elapsed: tokio::time::error::Elapsed) -> Self {
        CatalogError::Timeout(elapsed.to_string())
    }
}
