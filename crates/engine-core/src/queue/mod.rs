use crate::error::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::records::job::{Job, JobCounts, JobStatus};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod sled_queue;

#[derive(Debug, Clone, Copy)]
pub struct EnqueueOptions {
    /// Deliveries that may end in failure before the job is parked as failed.
    pub max_attempts: u32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        EnqueueOptions { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with this id already exists in some status; nothing was written.
    Duplicate,
}

/// Queue bookkeeping for one job, stored apart from the job's rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEntry {
    pub job_id: String,
    pub file_key: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    /// Insertion order; claims go oldest first.
    pub seq: u64,
    pub available_at: DateTime<Utc>,
    pub lease_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl JobEntry {
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            JobStatus::Waiting => true,
            JobStatus::Delayed => self.available_at <= now,
            JobStatus::Active => self.lease_until.is_none_or(|until| until <= now),
            JobStatus::Completed | JobStatus::Failed => false,
        }
    }
}

/// A job plus its queue bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub job: Job,
    pub entry: JobEntry,
}

impl QueuedJob {
    pub fn id(&self) -> &str {
        &self.job.id
    }

    pub fn status(&self) -> JobStatus {
        self.entry.status
    }
}

/// Durable at-least-once job queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: Job, options: EnqueueOptions)
    -> Result<EnqueueOutcome, QueueError>;

    async fn contains(&self, job_id: &str) -> Result<bool, QueueError>;

    /// Jobs in any of `statuses`, optionally limited to one file, oldest first.
    async fn list_jobs(
        &self,
        file_key: Option<&str>,
        statuses: &[JobStatus],
    ) -> Result<Vec<QueuedJob>, QueueError>;

    /// Leases the oldest available job. A job whose lease ran out is available
    /// again, which is how work held by a crashed worker gets redelivered.
    async fn claim(
        &self,
        file_key: Option<&str>,
        lease: Duration,
    ) -> Result<Option<QueuedJob>, QueueError>;

    async fn complete(&self, job_id: &str) -> Result<(), QueueError>;

    /// Records a failed delivery. Returns the resulting status: delayed until
    /// `retry_in` has passed, or failed once attempts reach the ceiling.
    async fn fail(
        &self,
        job_id: &str,
        reason: &str,
        retry_in: Duration,
    ) -> Result<JobStatus, QueueError>;

    async fn counts(&self, file_key: &str) -> Result<JobCounts, QueueError>;

    /// True while any job, optionally of one file, is waiting, active or delayed.
    async fn has_unfinished(&self, file_key: Option<&str>) -> Result<bool, QueueError>;

    /// Removes every job of `file_key`, returning how many were dropped.
    async fn purge(&self, file_key: &str) -> Result<usize, QueueError>;

    async fn flush(&self) -> Result<(), QueueError> {
        Ok(())
    }
}
