use crate::producer::config::PlannerConfig;
use connectors::file::csv::{
    error::FileError,
    normalize::RowNormalizer,
    source::{CsvRowSource, SourceRow},
};
use model::records::{
    batch::{Batch, BatchEntry},
    job::Job,
};
use tracing::{debug, warn};

/// Deterministic job id for the batch of `file_key` starting at
/// `start_index`. A short final batch gets a suffix so a later, longer plan of
/// the same region cannot collide with it.
pub fn job_id(file_key: &str, start_index: u64, size: usize, batch_size: usize) -> String {
    let mut h = blake3::Hasher::new();
    h.update(file_key.as_bytes());
    h.update(&[0]);
    h.update(&start_index.to_le_bytes());
    let hex = h.finalize().to_hex();

    if size < batch_size {
        format!("{hex}-final-{size}")
    } else {
        hex.to_string()
    }
}

/// Turns a row stream into jobs, in source order.
///
/// Rows below `resume_from` are counted and dropped without being
/// normalized. Malformed rows keep their slot as a placeholder so batches
/// still partition the file.
pub struct BatchPlanner<I> {
    rows: I,
    normalizer: RowNormalizer,
    config: PlannerConfig,
    pending: Vec<BatchEntry>,
    pending_start: u64,
    skipped_before_resume: u64,
    malformed: u64,
    done: bool,
}

impl BatchPlanner<CsvRowSource> {
    pub fn from_source(source: CsvRowSource, config: PlannerConfig) -> Self {
        let headers = source.headers().to_vec();
        BatchPlanner::new(source, headers, config)
    }
}

impl<I> BatchPlanner<I>
where
    I: Iterator<Item = Result<SourceRow, FileError>>,
{
    pub fn new(rows: I, headers: Vec<String>, config: PlannerConfig) -> Self {
        let normalizer = RowNormalizer::new(headers, config.mapping.as_ref());
        BatchPlanner {
            rows,
            normalizer,
            pending: Vec::with_capacity(config.batch_size),
            config,
            pending_start: 0,
            skipped_before_resume: 0,
            malformed: 0,
            done: false,
        }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn skipped_before_resume(&self) -> u64 {
        self.skipped_before_resume
    }

    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    fn finalize(&mut self) -> Option<Job> {
        if self.pending.is_empty() {
            return None;
        }
        let entries = std::mem::replace(
            &mut self.pending,
            Vec::with_capacity(self.config.batch_size),
        );
        let batch = Batch::new(self.pending_start, entries);
        let id = job_id(
            &self.config.file_key,
            batch.start_index,
            batch.len(),
            self.config.batch_size,
        );

        debug!(
            file_key = %self.config.file_key,
            job_id = %id,
            start_index = batch.start_index,
            size = batch.len(),
            "Planned batch"
        );

        Some(Job {
            id,
            file_key: self.config.file_key.clone(),
            total_rows: self.config.total_rows,
            batch_size: self.config.batch_size,
            batch,
        })
    }

    fn entry_for(&mut self, row: SourceRow) -> BatchEntry {
        match row {
            SourceRow::Record { cells, .. } => BatchEntry::Row(self.normalizer.normalize(&cells)),
            SourceRow::Malformed { index, reason } => {
                warn!(
                    file_key = %self.config.file_key,
                    row = index,
                    %reason,
                    "Malformed row, keeping placeholder"
                );
                self.malformed += 1;
                BatchEntry::Malformed { reason }
            }
        }
    }
}

impl<I> Iterator for BatchPlanner<I>
where
    I: Iterator<Item = Result<SourceRow, FileError>>,
{
    type Item = Result<Job, FileError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            match self.rows.next() {
                None => {
                    self.done = true;
                    return self.finalize().map(Ok);
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                Some(Ok(row)) => {
                    let index = row.index();
                    if index < self.config.resume_from {
                        self.skipped_before_resume += 1;
                        continue;
                    }

                    if self.pending.is_empty() {
                        self.pending_start = index;
                    }
                    let entry = self.entry_for(row);
                    self.pending.push(entry);

                    if self.pending.len() >= self.config.batch_size {
                        return self.finalize().map(Ok);
                    }
                }
            }
        }
    }
}
