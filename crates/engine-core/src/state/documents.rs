use crate::{error::StateStoreError, state::DocumentStore};
use async_trait::async_trait;
use model::execution::{
    progress::{ProgressDocument, RowLevel},
    status::StatusNotes,
};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tokio::sync::Mutex;
use tracing::debug;

const PROGRESS_DIR: &str = "progress";
const STATUS_DIR: &str = "status";

/// Per-file JSON documents under a root directory.
///
/// Every write goes to a temp file in the target directory and is renamed into
/// place, so a crash leaves either the old or the new document, never a torn one.
pub struct JsonDocumentStore {
    root: PathBuf,
    // Serialises read-merge-write cycles within this process.
    lock: Mutex<()>,
}

impl JsonDocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        JsonDocumentStore {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, kind: &str, file_key: &str) -> PathBuf {
        self.root
            .join(kind)
            .join(format!("{}.json", encode_key(file_key)))
    }
}

/// Percent-encodes everything but `[A-Za-z0-9._-]` so distinct keys map to
/// distinct file names.
fn encode_key(file_key: &str) -> String {
    let mut out = String::with_capacity(file_key.len());
    for b in file_key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateStoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn write_json<T: Serialize>(path: PathBuf, value: &T) -> Result<(), StateStoreError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    tokio::task::spawn_blocking(move || persist_atomically(&path, &bytes))
        .await
        .map_err(|e| StateStoreError::Io(std::io::Error::other(e)))??;
    Ok(())
}

fn persist_atomically(path: &Path, bytes: &[u8]) -> Result<(), StateStoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| StateStoreError::Io(e.error))?;
    Ok(())
}

async fn remove_if_exists(path: &Path) -> Result<(), StateStoreError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl DocumentStore for JsonDocumentStore {
    async fn load_progress(
        &self,
        file_key: &str,
    ) -> Result<Option<ProgressDocument>, StateStoreError> {
        read_json(&self.path_for(PROGRESS_DIR, file_key)).await
    }

    async fn save_progress(&self, doc: &ProgressDocument) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(PROGRESS_DIR, &doc.file_key);

        let existing: Option<ProgressDocument> = read_json(&path).await?;
        let stored_row = existing.map_or(0, |d| d.row_level.last_processed_row);

        if stored_row > doc.row_level.last_processed_row {
            let mut merged = doc.clone();
            merged.row_level = RowLevel::new(
                stored_row,
                doc.row_level.total_rows,
                doc.row_level.counts(),
            );
            return write_json(path, &merged).await;
        }

        write_json(path, doc).await
    }

    async fn load_status(&self, file_key: &str) -> Result<StatusNotes, StateStoreError> {
        Ok(read_json(&self.path_for(STATUS_DIR, file_key))
            .await?
            .unwrap_or_default())
    }

    async fn merge_status(
        &self,
        file_key: &str,
        notes: &StatusNotes,
    ) -> Result<StatusNotes, StateStoreError> {
        let _guard = self.lock.lock().await;
        let path = self.path_for(STATUS_DIR, file_key);

        let mut stored: StatusNotes = read_json(&path).await?.unwrap_or_default();
        stored.merge(notes);
        write_json(path, &stored).await?;

        debug!(file_key, flushed = notes.len(), total = stored.len(), "Status log merged");
        Ok(stored)
    }

    async fn clear(&self, file_key: &str) -> Result<(), StateStoreError> {
        let _guard = self.lock.lock().await;
        remove_if_exists(&self.path_for(PROGRESS_DIR, file_key)).await?;
        remove_if_exists(&self.path_for(STATUS_DIR, file_key)).await
    }
}
