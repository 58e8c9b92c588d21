use crate::{error::ProcessingError, retry::classify_state_error};
use engine_core::{retry::RetryPolicy, state::DocumentStore};
use model::execution::status::StatusNotes;
use std::sync::Arc;
use tracing::debug;

/// Bounded buffer of status notes for one job, merged into the file's status
/// log every `flush_every` notes and once more at the end.
pub struct StatusBuffer {
    file_key: String,
    notes: StatusNotes,
    flush_every: usize,
    since_flush: usize,
    documents: Arc<dyn DocumentStore>,
    retry: RetryPolicy,
}

impl StatusBuffer {
    pub fn new(
        file_key: impl Into<String>,
        flush_every: usize,
        documents: Arc<dyn DocumentStore>,
        retry: RetryPolicy,
    ) -> Self {
        StatusBuffer {
            file_key: file_key.into(),
            notes: StatusNotes::default(),
            flush_every: flush_every.max(1),
            since_flush: 0,
            documents,
            retry,
        }
    }

    pub fn updated(&mut self, note: String) {
        self.notes.updated.push(note);
        self.since_flush += 1;
    }

    pub fn skipped(&mut self, note: String) {
        self.notes.skipped.push(note);
        self.since_flush += 1;
    }

    pub fn failed(&mut self, note: String) {
        self.notes.failed.push(note);
        self.since_flush += 1;
    }

    pub fn missing(&mut self, note: String) {
        self.notes.missing.push(note);
        self.since_flush += 1;
    }

    pub fn pending(&self) -> usize {
        self.notes.len()
    }

    pub async fn maybe_flush(&mut self) -> Result<(), ProcessingError> {
        if self.since_flush >= self.flush_every {
            self.flush().await?;
        }
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<(), ProcessingError> {
        if self.notes.is_empty() {
            return Ok(());
        }

        let documents = self.documents.clone();
        let file_key = self.file_key.as_str();
        let notes = &self.notes;
        self.retry
            .run(
                || {
                    let documents = documents.clone();
                    async move { documents.merge_status(file_key, notes).await }
                },
                classify_state_error,
            )
            .await
            .map_err(|e| {
                let attempts = e.attempts();
                ProcessingError::StatusFlush {
                    file_key: self.file_key.clone(),
                    attempts,
                    source: e.into_inner(),
                }
            })?;

        debug!(file_key = %self.file_key, flushed = self.notes.len(), "Flushed status notes");
        self.notes.clear();
        self.since_flush = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_core::state::documents::JsonDocumentStore;
    use tempfile::tempdir;

    #[tokio::test]
    async fn flushes_every_n_notes_and_at_the_end() {
        let dir = tempdir().unwrap();
        let docs = Arc::new(JsonDocumentStore::new(dir.path()));
        let mut buffer = StatusBuffer::new("v.csv", 2, docs.clone(), RetryPolicy::immediate(1));

        buffer.updated("row 0: A updated".into());
        buffer.maybe_flush().await.unwrap();
        assert!(docs.load_status("v.csv").await.unwrap().is_empty());

        buffer.skipped("row 1: B unchanged".into());
        buffer.maybe_flush().await.unwrap();
        assert_eq!(buffer.pending(), 0);
        assert_eq!(docs.load_status("v.csv").await.unwrap().len(), 2);

        buffer.missing("row 2: C".into());
        buffer.flush().await.unwrap();
        let stored = docs.load_status("v.csv").await.unwrap();
        assert_eq!(stored.missing, vec!["row 2: C"]);
        assert_eq!(stored.len(), 3);
    }
}
