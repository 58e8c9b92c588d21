use crate::{
    error::QueueError,
    queue::{EnqueueOptions, EnqueueOutcome, JobEntry, JobQueue, QueuedJob},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::records::job::{Job, JobCounts, JobStatus};
use sled::{
    Transactional,
    transaction::{
        ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
        TransactionalTree,
    },
};
use std::time::Duration;
use tracing::{debug, warn};

const ENTRIES_TREE: &str = "jobs";
const PAYLOADS_TREE: &str = "job_payloads";
const UNFINISHED_TREE: &str = "jobs_unfinished";
const COUNTS_TREE: &str = "job_counts";

type TxResult<T> = ConflictableTransactionResult<T, QueueError>;

/// Job queue kept in sled.
///
/// Bookkeeping entries are small and stored apart from the batch payloads,
/// which are only decoded for a job being handed out. Unfinished jobs are
/// indexed by insertion order and per-file counts are kept alongside, all
/// updated in the same transaction as the entry they describe.
#[derive(Clone)]
pub struct SledJobQueue {
    db: sled::Db,
    entries: sled::Tree,
    payloads: sled::Tree,
    /// `seq ++ job_id` to file key, for jobs waiting, active or delayed.
    unfinished: sled::Tree,
    counts: sled::Tree,
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    let delta = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(365));
    now + delta
}

fn abort<E: Into<QueueError>>(e: E) -> ConflictableTransactionError<QueueError> {
    ConflictableTransactionError::Abort(e.into())
}

fn unwrap_tx<T>(result: Result<T, TransactionError<QueueError>>) -> Result<T, QueueError> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(e)) => Err(e),
        Err(TransactionError::Storage(e)) => Err(QueueError::Storage(e)),
    }
}

fn unfinished_key(seq: u64, job_id: &str) -> Vec<u8> {
    let mut key = seq.to_be_bytes().to_vec();
    key.extend_from_slice(job_id.as_bytes());
    key
}

fn job_id_of(unfinished_key: &[u8]) -> String {
    String::from_utf8_lossy(unfinished_key.get(8..).unwrap_or_default()).into_owned()
}

fn decode_entry(bytes: &[u8]) -> Result<JobEntry, QueueError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Stores `next` in place of `prev`, keeping the unfinished index and the
/// file's counts in step.
fn write_entry(
    entries: &TransactionalTree,
    unfinished: &TransactionalTree,
    counts: &TransactionalTree,
    prev: Option<&JobEntry>,
    next: &JobEntry,
) -> TxResult<()> {
    entries.insert(
        next.job_id.as_bytes(),
        serde_json::to_vec(next).map_err(abort)?,
    )?;

    let key = unfinished_key(next.seq, &next.job_id);
    if next.status.is_terminal() {
        unfinished.remove(key)?;
    } else {
        unfinished.insert(key, next.file_key.as_bytes())?;
    }

    if prev.map(|p| p.status) != Some(next.status) {
        let mut tally = match counts.get(next.file_key.as_bytes())? {
            Some(bytes) => serde_json::from_slice::<JobCounts>(&bytes).map_err(abort)?,
            None => JobCounts::default(),
        };
        if let Some(prev) = prev {
            tally.forget(prev.status);
        }
        tally.record(next.status);
        counts.insert(
            next.file_key.as_bytes(),
            serde_json::to_vec(&tally).map_err(abort)?,
        )?;
    }
    Ok(())
}

impl SledJobQueue {
    pub fn new(db: &sled::Db) -> Result<Self, QueueError> {
        Ok(SledJobQueue {
            db: db.clone(),
            entries: db.open_tree(ENTRIES_TREE)?,
            payloads: db.open_tree(PAYLOADS_TREE)?,
            unfinished: db.open_tree(UNFINISHED_TREE)?,
            counts: db.open_tree(COUNTS_TREE)?,
        })
    }

    fn entry(&self, job_id: &str) -> Result<Option<JobEntry>, QueueError> {
        match self.entries.get(job_id)? {
            Some(raw) => Ok(Some(decode_entry(&raw)?)),
            None => Ok(None),
        }
    }

    fn payload(&self, job_id: &str) -> Result<Job, QueueError> {
        let raw = self
            .payloads
            .get(job_id)?
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    fn with_payload(&self, entry: JobEntry) -> Result<QueuedJob, QueueError> {
        Ok(QueuedJob {
            job: self.payload(&entry.job_id)?,
            entry,
        })
    }

    /// Ids of unfinished jobs, oldest first, optionally of one file.
    fn unfinished_ids<'a>(
        &'a self,
        file_key: Option<&'a str>,
    ) -> impl Iterator<Item = Result<String, QueueError>> + 'a {
        self.unfinished.iter().filter_map(move |item| match item {
            Ok((key, file)) => {
                if file_key.is_some_and(|f| f.as_bytes() != &*file) {
                    None
                } else {
                    Some(Ok(job_id_of(&key)))
                }
            }
            Err(e) => Some(Err(e.into())),
        })
    }

    /// Applies `change` to the stored entry. Returns `None` when `change`
    /// declines by returning false.
    fn update<F>(&self, job_id: &str, change: F) -> Result<Option<JobEntry>, QueueError>
    where
        F: Fn(&mut JobEntry) -> bool,
    {
        let result = (&self.entries, &self.unfinished, &self.counts).transaction(
            |(entries, unfinished, counts)| -> TxResult<Option<JobEntry>> {
                let raw = entries
                    .get(job_id.as_bytes())?
                    .ok_or_else(|| abort(QueueError::UnknownJob(job_id.to_string())))?;
                let prev = decode_entry(&raw).map_err(abort)?;
                let mut next = prev.clone();
                if !change(&mut next) {
                    return Ok(None);
                }
                write_entry(entries, unfinished, counts, Some(&prev), &next)?;
                Ok(Some(next))
            },
        );
        unwrap_tx(result)
    }
}

#[async_trait]
impl JobQueue for SledJobQueue {
    async fn enqueue(
        &self,
        job: Job,
        options: EnqueueOptions,
    ) -> Result<EnqueueOutcome, QueueError> {
        let entry = JobEntry {
            job_id: job.id.clone(),
            file_key: job.file_key.clone(),
            status: JobStatus::Waiting,
            attempts: 0,
            max_attempts: options.max_attempts.max(1),
            seq: self.db.generate_id()?,
            available_at: Utc::now(),
            lease_until: None,
            last_error: None,
        };
        let payload = serde_json::to_vec(&job)?;

        let result = (&self.entries, &self.payloads, &self.unfinished, &self.counts).transaction(
            |(entries, payloads, unfinished, counts)| -> TxResult<EnqueueOutcome> {
                if entries.get(entry.job_id.as_bytes())?.is_some() {
                    return Ok(EnqueueOutcome::Duplicate);
                }
                payloads.insert(entry.job_id.as_bytes(), payload.as_slice())?;
                write_entry(entries, unfinished, counts, None, &entry)?;
                Ok(EnqueueOutcome::Enqueued)
            },
        );

        let outcome = unwrap_tx(result)?;
        if outcome == EnqueueOutcome::Enqueued {
            debug!(job_id = %entry.job_id, "Job enqueued");
        }
        Ok(outcome)
    }

    async fn contains(&self, job_id: &str) -> Result<bool, QueueError> {
        Ok(self.entries.contains_key(job_id)?)
    }

    async fn list_jobs(
        &self,
        file_key: Option<&str>,
        statuses: &[JobStatus],
    ) -> Result<Vec<QueuedJob>, QueueError> {
        let mut matching = Vec::new();
        if statuses.iter().all(|s| !s.is_terminal()) {
            for id in self.unfinished_ids(file_key) {
                if let Some(entry) = self.entry(&id?)? {
                    matching.push(entry);
                }
            }
        } else {
            for item in self.entries.iter() {
                let (_, raw) = item?;
                matching.push(decode_entry(&raw)?);
            }
        }

        let mut out = Vec::new();
        for entry in matching {
            if file_key.is_some_and(|f| f != entry.file_key) || !statuses.contains(&entry.status) {
                continue;
            }
            out.push(self.with_payload(entry)?);
        }
        out.sort_by_key(|j| j.entry.seq);
        Ok(out)
    }

    async fn claim(
        &self,
        file_key: Option<&str>,
        lease: Duration,
    ) -> Result<Option<QueuedJob>, QueueError> {
        let now = Utc::now();
        for id in self.unfinished_ids(file_key) {
            let id = id?;
            let Some(entry) = self.entry(&id)? else {
                continue;
            };
            if !entry.is_claimable(now) {
                continue;
            }

            // Rechecked inside the transaction; another claimer may have won.
            let claimed = self.update(&id, |entry| {
                if !entry.is_claimable(now) {
                    return false;
                }
                entry.status = JobStatus::Active;
                entry.lease_until = Some(after(now, lease));
                true
            })?;
            let Some(claimed) = claimed else {
                continue;
            };

            if entry.status == JobStatus::Active {
                warn!(job_id = %id, "Lease expired, redelivering job");
            }
            return self.with_payload(claimed).map(Some);
        }
        Ok(None)
    }

    async fn complete(&self, job_id: &str) -> Result<(), QueueError> {
        self.update(job_id, |entry| {
            entry.status = JobStatus::Completed;
            entry.lease_until = None;
            true
        })?;
        self.db.flush_async().await?;
        Ok(())
    }

    async fn fail(
        &self,
        job_id: &str,
        reason: &str,
        retry_in: Duration,
    ) -> Result<JobStatus, QueueError> {
        let now = Utc::now();
        let updated = self.update(job_id, |entry| {
            // A redelivered copy may already have finished the job.
            if entry.status.is_terminal() {
                return false;
            }
            entry.attempts += 1;
            entry.last_error = Some(reason.to_string());
            entry.lease_until = None;
            if entry.attempts >= entry.max_attempts {
                entry.status = JobStatus::Failed;
            } else {
                entry.status = JobStatus::Delayed;
                entry.available_at = after(now, retry_in);
            }
            true
        })?;
        self.db.flush_async().await?;

        match updated {
            Some(entry) => Ok(entry.status),
            None => self
                .entry(job_id)?
                .map(|e| e.status)
                .ok_or_else(|| QueueError::UnknownJob(job_id.to_string())),
        }
    }

    async fn counts(&self, file_key: &str) -> Result<JobCounts, QueueError> {
        match self.counts.get(file_key)? {
            Some(raw) => Ok(serde_json::from_slice(&raw)?),
            None => Ok(JobCounts::default()),
        }
    }

    async fn has_unfinished(&self, file_key: Option<&str>) -> Result<bool, QueueError> {
        match self.unfinished_ids(file_key).next() {
            Some(id) => id.map(|_| true),
            None => Ok(false),
        }
    }

    async fn purge(&self, file_key: &str) -> Result<usize, QueueError> {
        let mut doomed = Vec::new();
        for item in self.entries.iter() {
            let (_, raw) = item?;
            let entry = decode_entry(&raw)?;
            if entry.file_key == file_key {
                doomed.push(entry);
            }
        }

        for entry in &doomed {
            let result = (&self.entries, &self.payloads, &self.unfinished).transaction(
                |(entries, payloads, unfinished)| -> TxResult<()> {
                    entries.remove(entry.job_id.as_bytes())?;
                    payloads.remove(entry.job_id.as_bytes())?;
                    unfinished.remove(unfinished_key(entry.seq, &entry.job_id))?;
                    Ok(())
                },
            );
            unwrap_tx(result)?;
        }
        self.counts.remove(file_key)?;
        self.db.flush_async().await?;
        Ok(doomed.len())
    }

    async fn flush(&self) -> Result<(), QueueError> {
        self.db.flush_async().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model::records::{
        batch::{Batch, BatchEntry},
        row::CanonicalRow,
    };
    use std::{collections::HashSet, sync::Arc};
    use tempfile::tempdir;

    fn job(file_key: &str, start: u64) -> Job {
        let entries = vec![BatchEntry::Row(CanonicalRow {
            identifier: format!("id-{start}"),
            ..Default::default()
        })];
        Job {
            id: format!("{file_key}-{start}"),
            file_key: file_key.to_string(),
            total_rows: 10,
            batch_size: 1,
            batch: Batch::new(start, entries),
        }
    }

    fn queue() -> (tempfile::TempDir, SledJobQueue) {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let q = SledJobQueue::new(&db).unwrap();
        (dir, q)
    }

    const LEASE: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn duplicate_enqueue_is_a_noop() {
        let (_dir, q) = queue();
        let opts = EnqueueOptions::default();

        assert_eq!(
            q.enqueue(job("f", 0), opts).await.unwrap(),
            EnqueueOutcome::Enqueued
        );
        assert_eq!(
            q.enqueue(job("f", 0), opts).await.unwrap(),
            EnqueueOutcome::Duplicate
        );

        // Still a duplicate once the first copy has completed.
        let claimed = q.claim(None, LEASE).await.unwrap().unwrap();
        q.complete(claimed.id()).await.unwrap();
        assert_eq!(
            q.enqueue(job("f", 0), opts).await.unwrap(),
            EnqueueOutcome::Duplicate
        );

        let all = q.list_jobs(Some("f"), &JobStatus::ALL).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn claims_oldest_first_and_filters_by_file() {
        let (_dir, q) = queue();
        for start in [4, 0, 2] {
            q.enqueue(job("a", start), EnqueueOptions::default())
                .await
                .unwrap();
        }
        q.enqueue(job("b", 0), EnqueueOptions::default())
            .await
            .unwrap();

        let first = q.claim(Some("a"), LEASE).await.unwrap().unwrap();
        assert_eq!(first.job.start_index(), 4);
        assert_eq!(first.status(), JobStatus::Active);

        let counts = q.counts("a").await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 2);
        assert_eq!(q.counts("b").await.unwrap().waiting, 1);
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let (_dir, q) = queue();
        q.enqueue(job("f", 0), EnqueueOptions::default())
            .await
            .unwrap();

        let first = q
            .claim(None, Duration::from_millis(20))
            .await
            .unwrap()
            .unwrap();
        assert!(q.claim(None, LEASE).await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(40)).await;
        let again = q.claim(None, LEASE).await.unwrap().unwrap();
        assert_eq!(again.id(), first.id());
    }

    #[tokio::test]
    async fn fail_delays_then_parks_at_ceiling() {
        let (_dir, q) = queue();
        q.enqueue(job("f", 0), EnqueueOptions { max_attempts: 2 })
            .await
            .unwrap();

        let claimed = q.claim(None, LEASE).await.unwrap().unwrap();
        let status = q
            .fail(claimed.id(), "timeout", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(status, JobStatus::Delayed);
        // Not yet available.
        assert!(q.claim(None, LEASE).await.unwrap().is_none());

        let status = q.fail(claimed.id(), "timeout", Duration::ZERO).await.unwrap();
        assert_eq!(status, JobStatus::Failed);

        let failed = q.list_jobs(None, &[JobStatus::Failed]).await.unwrap();
        assert_eq!(failed[0].entry.attempts, 2);
        assert_eq!(failed[0].entry.last_error.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn delayed_job_returns_after_backoff() {
        let (_dir, q) = queue();
        q.enqueue(job("f", 0), EnqueueOptions::default())
            .await
            .unwrap();
        let claimed = q.claim(None, LEASE).await.unwrap().unwrap();
        q.fail(claimed.id(), "boom", Duration::ZERO).await.unwrap();

        let again = q.claim(None, LEASE).await.unwrap().unwrap();
        assert_eq!(again.entry.attempts, 1);
    }

    #[tokio::test]
    async fn concurrent_claims_never_share_a_job() {
        let (_dir, q) = queue();
        let q = Arc::new(q);
        for start in 0..5 {
            q.enqueue(job("f", start), EnqueueOptions::default())
                .await
                .unwrap();
        }

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let q = q.clone();
                tokio::spawn(async move { q.claim(None, LEASE).await.unwrap() })
            })
            .collect();

        let mut ids = HashSet::new();
        let mut claimed = 0;
        for h in handles {
            if let Some(job) = h.await.unwrap() {
                claimed += 1;
                ids.insert(job.job.id);
            }
        }
        assert_eq!(claimed, 5);
        assert_eq!(ids.len(), 5);
    }

    #[tokio::test]
    async fn finished_jobs_leave_the_unfinished_index() {
        let (_dir, q) = queue();
        for start in 0..3 {
            q.enqueue(job("f", start), EnqueueOptions { max_attempts: 1 })
                .await
                .unwrap();
        }
        assert_eq!(q.unfinished.len(), 3);
        assert!(q.has_unfinished(Some("f")).await.unwrap());
        assert!(!q.has_unfinished(Some("g")).await.unwrap());

        let done = q.claim(None, LEASE).await.unwrap().unwrap();
        q.complete(done.id()).await.unwrap();
        let parked = q.claim(None, LEASE).await.unwrap().unwrap();
        q.fail(parked.id(), "boom", Duration::ZERO).await.unwrap();

        assert_eq!(q.unfinished.len(), 1);
        let counts = q.counts("f").await.unwrap();
        assert_eq!(
            (counts.waiting, counts.active, counts.completed, counts.failed),
            (1, 0, 1, 1)
        );

        // Finished jobs still list with their rows.
        let finished = q
            .list_jobs(Some("f"), &[JobStatus::Completed, JobStatus::Failed])
            .await
            .unwrap();
        assert_eq!(finished.len(), 2);
        assert_eq!(finished[0].job.batch.len(), 1);

        let last = q.claim(None, LEASE).await.unwrap().unwrap();
        assert_eq!(last.job.start_index(), 2);
        q.complete(last.id()).await.unwrap();
        assert!(!q.has_unfinished(None).await.unwrap());
        assert!(q.claim(None, LEASE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn counts_follow_every_transition() {
        let dir = tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let q = SledJobQueue::new(&db).unwrap();
        q.enqueue(job("f", 0), EnqueueOptions::default())
            .await
            .unwrap();
        q.enqueue(job("f", 1), EnqueueOptions::default())
            .await
            .unwrap();
        // Duplicates do not count twice.
        q.enqueue(job("f", 0), EnqueueOptions::default())
            .await
            .unwrap();

        let claimed = q.claim(None, LEASE).await.unwrap().unwrap();
        q.fail(claimed.id(), "boom", Duration::from_secs(60))
            .await
            .unwrap();

        // A second handle on the same database sees the stored tallies.
        let other = SledJobQueue::new(&db).unwrap();
        let counts = other.counts("f").await.unwrap();
        assert_eq!((counts.waiting, counts.delayed), (1, 1));
        assert_eq!(counts.remaining(), 2);

        let listed = other.list_jobs(Some("f"), &JobStatus::ALL).await.unwrap();
        let mut tally = JobCounts::default();
        for j in &listed {
            tally.record(j.status());
        }
        assert_eq!(tally, counts);
    }

    #[tokio::test]
    async fn purge_drops_only_that_file() {
        let (_dir, q) = queue();
        q.enqueue(job("a", 0), EnqueueOptions::default())
            .await
            .unwrap();
        q.enqueue(job("a", 1), EnqueueOptions::default())
            .await
            .unwrap();
        q.enqueue(job("b", 0), EnqueueOptions::default())
            .await
            .unwrap();

        assert_eq!(q.purge("a").await.unwrap(), 2);
        assert!(!q.contains("a-0").await.unwrap());
        assert!(q.contains("b-0").await.unwrap());
        assert!(q.counts("a").await.unwrap().is_drained());
        assert!(!q.has_unfinished(Some("a")).await.unwrap());
        assert_eq!(q.claim(None, LEASE).await.unwrap().unwrap().id(), "b-0");
    }
}
