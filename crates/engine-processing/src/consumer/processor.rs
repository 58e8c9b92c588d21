use crate::{
    consumer::{
        config::ProcessorConfig,
        lookup::{RecordLocator, TtlCache},
        status::StatusBuffer,
    },
    error::ProcessingError,
    retry::classify_catalog_error,
    transform::{
        candidate::CandidateBuilder,
        diff::{DiffEngine, DiffOutcome},
        text::fold_identity,
    },
};
use connectors::catalog::{CatalogApi, error::CatalogError};
use engine_config::settings::sections::MissPolicy;
use engine_core::{
    dispatch::{CallContext, DispatchError, Dispatcher},
    metrics::Metrics,
    progress::ProgressService,
    queue::JobQueue,
    state::models::AdvanceOutcome,
};
use model::{
    catalog::record::{CurrentRecord, RemoteId, UpdatePayload},
    execution::progress::RowCounts,
    records::{batch::BatchEntry, job::Job, row::CanonicalRow},
};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of processing one row, before the batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Needs the patch written; the note is recorded once the write settles.
    Pending { payload: UpdatePayload, note: String },
    Skipped(String),
    Failed(String),
    /// No remote record; counted according to the miss policy.
    Missing(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub job_id: String,
    pub file_key: String,
    pub counts: RowCounts,
    pub patches_written: usize,
    pub write_failed: bool,
    pub checkpoint: AdvanceOutcome,
}

/// Consumes one job at a time. Shared by every worker so the lookup cache
/// and the dispatcher are process-wide.
pub struct RowProcessor {
    catalog: Arc<dyn CatalogApi>,
    dispatcher: Arc<Dispatcher>,
    locator: RecordLocator,
    candidates: CandidateBuilder,
    diff: DiffEngine,
    progress: ProgressService,
    queue: Arc<dyn JobQueue>,
    config: ProcessorConfig,
    metrics: Metrics,
}

fn identity_matches(current: &CurrentRecord, row: &CanonicalRow) -> bool {
    if fold_identity(&current.identifier) != fold_identity(&row.identifier) {
        return false;
    }
    let (ours, theirs) = (
        fold_identity(&row.manufacturer),
        fold_identity(&current.manufacturer),
    );
    ours.is_empty() || theirs.is_empty() || ours == theirs
}

fn describe<E: std::fmt::Display>(err: &DispatchError<E>) -> String {
    format!("{} after {} attempt(s)", err.remote_error(), err.attempts())
}

impl RowProcessor {
    pub fn new(
        catalog: Arc<dyn CatalogApi>,
        dispatcher: Arc<Dispatcher>,
        progress: ProgressService,
        queue: Arc<dyn JobQueue>,
        config: ProcessorConfig,
        metrics: Metrics,
    ) -> Self {
        let locator = RecordLocator::new(
            catalog.clone(),
            dispatcher.clone(),
            TtlCache::new(config.lookup_cache_ttl, config.lookup_cache_capacity),
            config.lookup_page_size,
        );
        RowProcessor {
            catalog,
            dispatcher,
            locator,
            candidates: CandidateBuilder::new(config.mapping.as_ref()),
            diff: DiffEngine::new(config.diff.clone()),
            progress,
            queue,
            config,
            metrics,
        }
    }

    pub fn progress(&self) -> &ProgressService {
        &self.progress
    }

    /// Processes every row of `job`, writes the accumulated patches in one
    /// call and advances the checkpoint.
    ///
    /// Row-scoped and remote failures are counted; only state and queue
    /// failures are returned, leaving the job to be redelivered.
    pub async fn process(&self, job: &Job) -> Result<JobReport, ProcessingError> {
        let mut counts = RowCounts::default();
        let mut status = StatusBuffer::new(
            job.file_key.clone(),
            self.config.status_flush_every,
            self.progress.documents.clone(),
            self.config.store_retry.clone(),
        );
        let mut pending: Vec<(UpdatePayload, String)> = Vec::new();

        for (offset, entry) in job.batch.entries.iter().enumerate() {
            let index = job.start_index() + offset as u64;
            match self.process_entry(job, index, entry).await {
                RowOutcome::Pending { payload, note } => pending.push((payload, note)),
                RowOutcome::Skipped(note) => {
                    counts.skipped += 1;
                    status.skipped(note);
                }
                RowOutcome::Failed(note) => {
                    counts.failed += 1;
                    status.failed(note);
                }
                RowOutcome::Missing(note) => {
                    match self.config.miss_policy {
                        MissPolicy::Skipped => counts.skipped += 1,
                        MissPolicy::Failed => counts.failed += 1,
                    }
                    status.missing(note);
                }
            }
            status.maybe_flush().await?;
        }

        let (patches_written, write_failed) =
            self.write_patches(job, pending, &mut counts, &mut status).await;

        self.metrics.increment_rows(job.batch.len() as u64);
        let recorded = self.progress.record(&job.file_key, &job.id, counts).await?;
        if !recorded.recorded() {
            info!(
                job_id = %job.id,
                file_key = %job.file_key,
                "Redelivered job, outcomes already counted"
            );
        }
        status.flush().await?;

        let jobs = self.queue.counts(&job.file_key).await?;
        let checkpoint = self
            .progress
            .advance(&job.file_key, job.end_index(), job.total_rows, jobs)
            .await?;

        info!(
            job_id = %job.id,
            file_key = %job.file_key,
            start_index = job.start_index(),
            rows = job.batch.len(),
            updated = counts.updated,
            skipped = counts.skipped,
            failed = counts.failed,
            checkpoint = checkpoint.current(),
            "Job processed"
        );

        Ok(JobReport {
            job_id: job.id.clone(),
            file_key: job.file_key.clone(),
            counts,
            patches_written,
            write_failed,
            checkpoint,
        })
    }

    async fn process_entry(&self, job: &Job, index: u64, entry: &BatchEntry) -> RowOutcome {
        let row = match entry {
            BatchEntry::Malformed { reason } => {
                return RowOutcome::Skipped(format!("row {index}: malformed ({reason})"));
            }
            BatchEntry::Row(row) => row,
        };

        if index >= job.total_rows {
            warn!(
                job_id = %job.id,
                row = index,
                total_rows = job.total_rows,
                "Row beyond declared total"
            );
            return RowOutcome::Failed(format!(
                "row {index}: beyond declared total of {} rows",
                job.total_rows
            ));
        }
        if !row.has_identifier() {
            warn!(job_id = %job.id, row = index, "Row has no identifier");
            return RowOutcome::Failed(format!("row {index}: missing identifier"));
        }

        let identifier = row.identifier.trim();
        let ctx = CallContext::new(
            format!("{}:{index}", job.id),
            format!("{} row {index} ({identifier})", job.file_key),
        );

        let id = match self
            .locator
            .locate(identifier, row.manufacturer.trim(), &ctx)
            .await
        {
            Ok(Some(id)) => id,
            Ok(None) => {
                return RowOutcome::Missing(format!(
                    "row {index}: {identifier} ({}) not found",
                    row.manufacturer.trim()
                ));
            }
            Err(e) => {
                warn!(job_id = %job.id, row = index, identifier, error = %e, "Lookup failed");
                return RowOutcome::Failed(format!(
                    "row {index}: {identifier} lookup failed: {}",
                    describe(&e)
                ));
            }
        };

        let current = match self.fetch(id, &ctx).await {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    row = index,
                    identifier,
                    remote_id = %id,
                    error = %e,
                    "Fetch failed"
                );
                return RowOutcome::Failed(format!(
                    "row {index}: {identifier} fetch of {id} failed: {}",
                    describe(&e)
                ));
            }
        };

        if !identity_matches(&current, row) {
            warn!(
                job_id = %job.id,
                row = index,
                identifier,
                remote_identifier = %current.identifier,
                remote_id = %id,
                "Resolved record does not match row"
            );
            return RowOutcome::Skipped(format!(
                "row {index}: {identifier} resolved to {id} ({} / {}), identity mismatch",
                current.identifier, current.manufacturer
            ));
        }

        let candidate = self.candidates.build(row);
        let outcome = self.diff.diff(&current, &candidate);
        self.outcome_for(index, identifier, outcome)
    }

    fn outcome_for(&self, index: u64, identifier: &str, outcome: DiffOutcome) -> RowOutcome {
        let protected: Vec<String> = outcome
            .protected_fields()
            .map(|s| format!("{} ({})", s.key, s.reason))
            .collect();
        let kept = if protected.is_empty() {
            String::new()
        } else {
            format!("; kept {}", protected.join(", "))
        };

        if outcome.is_empty() {
            return RowOutcome::Skipped(format!("row {index}: {identifier} unchanged{kept}"));
        }
        RowOutcome::Pending {
            note: format!(
                "row {index}: {identifier} updated {}{kept}",
                outcome.changed_fields.join(", ")
            ),
            payload: outcome.payload,
        }
    }

    async fn fetch(
        &self,
        id: RemoteId,
        ctx: &CallContext,
    ) -> Result<CurrentRecord, DispatchError<CatalogError>> {
        self.dispatcher
            .schedule(
                ctx,
                || {
                    let catalog = self.catalog.clone();
                    async move { catalog.fetch_by_id(id).await }
                },
                classify_catalog_error,
            )
            .await
    }

    /// One bulk write for the whole batch. On permanent failure every patch
    /// counts as failed.
    async fn write_patches(
        &self,
        job: &Job,
        pending: Vec<(UpdatePayload, String)>,
        counts: &mut RowCounts,
        status: &mut StatusBuffer,
    ) -> (usize, bool) {
        if pending.is_empty() {
            return (0, false);
        }

        let (payloads, notes): (Vec<UpdatePayload>, Vec<String>) = pending.into_iter().unzip();
        let payloads = Arc::new(payloads);
        let ctx = CallContext::new(
            job.id.clone(),
            format!("{} bulk write of {} patch(es)", job.file_key, payloads.len()),
        );

        let result = self
            .dispatcher
            .schedule(
                &ctx,
                || {
                    let catalog = self.catalog.clone();
                    let payloads = payloads.clone();
                    async move { catalog.bulk_write(&payloads).await }
                },
                classify_catalog_error,
            )
            .await;

        match result {
            Ok(summary) => {
                let written = summary.written.min(payloads.len());
                if written < payloads.len() {
                    warn!(
                        job_id = %job.id,
                        requested = payloads.len(),
                        written,
                        "Bulk write applied fewer patches than requested"
                    );
                }
                counts.updated += written as u64;
                counts.failed += (payloads.len() - written) as u64;
                for (i, note) in notes.into_iter().enumerate() {
                    if i < written {
                        status.updated(note);
                    } else {
                        status.failed(format!("{note} (not applied)"));
                    }
                }
                (written, false)
            }
            Err(e) => {
                let identifiers: Vec<&str> =
                    payloads.iter().map(|p| p.identifier.as_str()).collect();
                warn!(
                    job_id = %job.id,
                    file_key = %job.file_key,
                    patches = payloads.len(),
                    identifiers = ?identifiers,
                    error = %e,
                    "Bulk write failed, counting patches as failed"
                );
                counts.failed += payloads.len() as u64;
                let reason = describe(&e);
                for note in notes {
                    status.failed(format!("{note} (write failed: {reason})"));
                }
                (0, true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use connectors::catalog::{SearchPage, SearchQuery, WriteSummary, snapshot::SnapshotCatalog};
    use engine_core::{
        dispatch::DispatcherConfig,
        queue::sled_queue::SledJobQueue,
        retry::RetryPolicy,
        state::{
            CheckpointStore, DocumentStore, documents::JsonDocumentStore,
            sled_store::SledStateStore,
        },
    };
    use model::{
        catalog::record::Attribute,
        records::{batch::Batch, job::JobCounts},
    };
    use std::{
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    };
    use tempfile::TempDir;
    use tracing_test::traced_test;

    /// Snapshot catalog whose bulk write can be forced to fail.
    struct Catalog {
        inner: SnapshotCatalog,
        reject_writes: AtomicBool,
    }

    #[async_trait]
    impl CatalogApi for Catalog {
        async fn search(
            &self,
            query: &SearchQuery,
            page: u32,
            per_page: u32,
        ) -> Result<SearchPage, CatalogError> {
            self.inner.search(query, page, per_page).await
        }

        async fn fetch_by_id(&self, id: RemoteId) -> Result<CurrentRecord, CatalogError> {
            self.inner.fetch_by_id(id).await
        }

        async fn bulk_write(
            &self,
            patches: &[UpdatePayload],
        ) -> Result<WriteSummary, CatalogError> {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Err(CatalogError::status(400, "validation failed"));
            }
            self.inner.bulk_write(patches).await
        }
    }

    struct Harness {
        _dir: TempDir,
        catalog: Arc<Catalog>,
        state: SledStateStore,
        docs: Arc<JsonDocumentStore>,
        processor: RowProcessor,
    }

    fn remote(id: u64, identifier: &str, name: &str) -> CurrentRecord {
        CurrentRecord {
            id: RemoteId(id),
            identifier: identifier.into(),
            manufacturer: "Acme".into(),
            name: name.into(),
            sku: format!("ACME-{identifier}"),
            description: String::new(),
            attributes: vec![Attribute::new("category", "Relays")],
        }
    }

    fn harness(config: ProcessorConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path().join("db")).unwrap();
        let state = SledStateStore::from_db(db.clone());
        let queue = Arc::new(SledJobQueue::new(&db).unwrap());
        let docs = Arc::new(JsonDocumentStore::new(dir.path().join("docs")));
        let progress = ProgressService::new(
            Arc::new(state.clone()),
            Arc::new(state.clone()),
            docs.clone(),
        );
        let catalog = Arc::new(Catalog {
            inner: SnapshotCatalog::in_memory(vec![
                remote(1, "AB-1", "Relay"),
                remote(2, "AB-2", "Switch"),
                remote(3, "ZZ-9", "Other"),
            ]),
            reject_writes: AtomicBool::new(false),
        });
        let dispatcher = Arc::new(Dispatcher::new(
            DispatcherConfig {
                max_concurrent: 2,
                min_spacing: Duration::ZERO,
                call_timeout: Duration::from_secs(5),
                retry: RetryPolicy::immediate(5),
            },
            Metrics::new(),
        ));
        let processor = RowProcessor::new(
            catalog.clone(),
            dispatcher,
            progress,
            queue,
            config.with_store_retry(RetryPolicy::immediate(1)),
            Metrics::new(),
        );
        Harness {
            _dir: dir,
            catalog,
            state,
            docs,
            processor,
        }
    }

    fn row(identifier: &str, name: &str) -> BatchEntry {
        let mut row = CanonicalRow {
            identifier: identifier.into(),
            manufacturer: "Acme".into(),
            category: "Relays".into(),
            ..Default::default()
        };
        row.attributes.insert("name".into(), name.into());
        BatchEntry::Row(row)
    }

    fn job(start: u64, total: u64, entries: Vec<BatchEntry>) -> Job {
        Job {
            id: format!("job-{start}"),
            file_key: "vendor.csv".into(),
            total_rows: total,
            batch_size: entries.len(),
            batch: Batch::new(start, entries),
        }
    }

    #[tokio::test]
    async fn counts_every_kind_of_row_outcome() {
        let h = harness(ProcessorConfig::default());
        let job = job(
            0,
            6,
            vec![
                row("AB-1", "Relay 24V"),
                row("AB-2", "Switch"),
                row("", "no id"),
                row("NOPE-1", "missing"),
                BatchEntry::Malformed {
                    reason: "bad quoting".into(),
                },
                row("ZZ-9", "Other"),
            ],
        );

        let report = h.processor.process(&job).await.unwrap();
        assert_eq!(
            report.counts,
            RowCounts {
                updated: 1,
                skipped: 4,
                failed: 1,
            }
        );
        assert_eq!(report.patches_written, 1);
        assert_eq!(report.checkpoint.current(), 6);

        let records = h.catalog.inner.records().await;
        assert_eq!(records[0].name, "Relay 24V");

        let status = h.docs.load_status("vendor.csv").await.unwrap();
        assert_eq!(status.updated.len(), 1);
        assert_eq!(status.missing.len(), 1);
        assert_eq!(status.failed.len(), 1);
        assert!(status.skipped.iter().any(|n| n.contains("malformed")));
    }

    #[tokio::test]
    async fn miss_policy_can_count_misses_as_failed() {
        let h = harness(ProcessorConfig::default().with_miss_policy(MissPolicy::Failed));
        let report = h
            .processor
            .process(&job(0, 1, vec![row("NOPE-1", "x")]))
            .await
            .unwrap();
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.skipped, 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn rows_beyond_total_fail_without_remote_calls() {
        let h = harness(ProcessorConfig::default());
        let report = h
            .processor
            .process(&job(0, 1, vec![row("AB-1", "Relay"), row("AB-2", "Switch 2")]))
            .await
            .unwrap();
        assert_eq!(report.counts.failed, 1);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(h.catalog.inner.records().await[1].name, "Switch");
        assert!(logs_contain("Row beyond declared total"));
    }

    #[tokio::test]
    async fn rejected_write_counts_patches_as_failed_and_still_advances() {
        let h = harness(ProcessorConfig::default());
        h.catalog.reject_writes.store(true, Ordering::SeqCst);

        let report = h
            .processor
            .process(&job(0, 2, vec![row("AB-1", "Relay 24V"), row("AB-2", "Switch 2")]))
            .await
            .unwrap();
        assert!(report.write_failed);
        assert_eq!(report.counts.failed, 2);

        let cp = h.state.read("vendor.csv").await.unwrap().unwrap();
        assert_eq!(cp.last_processed_row, 2);
    }

    #[tokio::test]
    async fn redelivery_repeats_decisions_without_rewriting() {
        let h = harness(ProcessorConfig::default());
        let job = job(0, 1, vec![row("AB-1", "Relay 24V")]);

        let first = h.processor.process(&job).await.unwrap();
        assert_eq!(first.counts.updated, 1);

        let second = h.processor.process(&job).await.unwrap();
        assert_eq!(second.counts.skipped, 1);
        assert_eq!(second.patches_written, 0);
        assert!(!second.checkpoint.advanced());

        // The file totals keep the first delivery's outcomes.
        let live = h
            .processor
            .progress()
            .status("vendor.csv", JobCounts::default())
            .await
            .unwrap();
        assert_eq!(live.row_level.completed_rows, 1);
        assert_eq!(live.row_level.updated, 1);
        assert_eq!(live.row_level.skipped, 0);
    }

    #[traced_test]
    #[tokio::test]
    async fn redelivered_batch_does_not_complete_the_file_early() {
        let h = harness(ProcessorConfig::default());
        let early = job(0, 4, vec![row("AB-1", "Relay"), row("AB-2", "Switch")]);

        h.processor.process(&early).await.unwrap();
        h.processor.process(&early).await.unwrap();

        let live = h
            .processor
            .progress()
            .status("vendor.csv", JobCounts::default())
            .await
            .unwrap();
        assert_eq!(live.row_level.completed_rows, 2);
        assert_eq!(live.row_level.remaining_rows, 2);
        assert!(!live.is_complete());
        assert!(
            !h.processor
                .progress()
                .is_complete("vendor.csv", 4)
                .await
                .unwrap()
        );
        assert!(logs_contain("Redelivered job, outcomes already counted"));
    }

    #[tokio::test]
    async fn out_of_order_batches_never_regress_the_checkpoint() {
        let h = harness(ProcessorConfig::default());
        h.processor
            .process(&job(2, 4, vec![row("ZZ-9", "Other"), row("ZZ-9", "Other")]))
            .await
            .unwrap();
        let late = h
            .processor
            .process(&job(0, 4, vec![row("AB-1", "Relay"), row("AB-2", "Switch")]))
            .await
            .unwrap();

        assert!(!late.checkpoint.advanced());
        assert_eq!(late.checkpoint.current(), 4);
        let doc = h.docs.load_progress("vendor.csv").await.unwrap().unwrap();
        assert_eq!(doc.row_level.last_processed_row, 4);

        let live = h
            .processor
            .progress()
            .status("vendor.csv", JobCounts::default())
            .await
            .unwrap();
        assert_eq!(live.row_level.completed_rows, 4);
        assert!(live.is_complete());
    }
}
