use crate::{error::RunError, execution::context::RuntimeContext};
use connectors::catalog::CatalogApi;
use engine_core::{
    metrics::Metrics,
    queue::{JobQueue, QueuedJob},
};
use engine_processing::consumer::processor::RowProcessor;
use futures::future::try_join_all;
use model::records::job::JobStatus;
use std::{sync::Arc, time::Duration};
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// When a worker pool stops on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkUntil {
    /// Keep polling until cancelled.
    Cancelled,
    /// Stop once nothing is waiting, active or delayed.
    Drained,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkSummary {
    pub jobs_completed: u64,
    /// Deliveries that failed and were put back for redelivery.
    pub jobs_retried: u64,
    /// Jobs parked as failed after their last attempt.
    pub jobs_failed: u64,
}

impl WorkSummary {
    fn add(&mut self, other: WorkSummary) {
        self.jobs_completed += other.jobs_completed;
        self.jobs_retried += other.jobs_retried;
        self.jobs_failed += other.jobs_failed;
    }
}

struct Worker {
    id: usize,
    queue: Arc<dyn JobQueue>,
    processor: Arc<RowProcessor>,
    metrics: Metrics,
    file_key: Option<String>,
    until: WorkUntil,
    job_timeout: Duration,
    lease: Duration,
    poll_interval: Duration,
    redelivery_delay: Duration,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) -> Result<WorkSummary, RunError> {
        let mut summary = WorkSummary::default();

        while !self.cancel.is_cancelled() {
            let claimed = self.queue.claim(self.file_key.as_deref(), self.lease).await?;
            let Some(queued) = claimed else {
                if self.until == WorkUntil::Drained && self.is_drained().await? {
                    break;
                }
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(self.poll_interval) => {}
                }
                continue;
            };

            self.handle(queued, &mut summary).await?;
        }

        info!(worker = self.id, completed = summary.jobs_completed, "Worker stopped");
        Ok(summary)
    }

    async fn is_drained(&self) -> Result<bool, RunError> {
        Ok(!self.queue.has_unfinished(self.file_key.as_deref()).await?)
    }

    /// Runs one delivery. A job that errors or overruns its timeout goes back
    /// to the queue; it is never retried in place.
    async fn handle(&self, queued: QueuedJob, summary: &mut WorkSummary) -> Result<(), RunError> {
        let job_id = queued.id().to_string();
        info!(
            worker = self.id,
            job_id = %job_id,
            file_key = %queued.job.file_key,
            start_index = queued.job.start_index(),
            attempt = queued.entry.attempts + 1,
            "Processing job"
        );

        let reason = match timeout(self.job_timeout, self.processor.process(&queued.job)).await {
            Ok(Ok(_report)) => {
                self.queue.complete(&job_id).await?;
                self.metrics.increment_jobs_completed();
                summary.jobs_completed += 1;
                return Ok(());
            }
            Ok(Err(e)) => {
                error!(worker = self.id, job_id = %job_id, error = %e, "Job failed");
                e.to_string()
            }
            Err(_) => {
                warn!(
                    worker = self.id,
                    job_id = %job_id,
                    timeout_secs = self.job_timeout.as_secs(),
                    "Job exceeded its time limit"
                );
                format!("timed out after {:?}", self.job_timeout)
            }
        };

        match self
            .queue
            .fail(&job_id, &reason, self.redelivery_delay)
            .await?
        {
            JobStatus::Failed => {
                self.metrics.increment_jobs_failed();
                summary.jobs_failed += 1;
            }
            _ => summary.jobs_retried += 1,
        }
        Ok(())
    }
}

/// Runs `settings.workers.count` workers against the shared queue. All of
/// them share one processor, so remote calls go through one dispatcher.
pub async fn work(
    ctx: &RuntimeContext,
    catalog: Arc<dyn CatalogApi>,
    file_key: Option<String>,
    until: WorkUntil,
    cancel: CancellationToken,
) -> Result<WorkSummary, RunError> {
    let settings = &ctx.settings.workers;
    let processor = Arc::new(ctx.processor(catalog));
    let job_timeout = settings.job_timeout();
    let count = settings.count.max(1);

    info!(workers = count, file_key = ?file_key, ?until, "Launching workers");

    let handles: Vec<_> = (0..count)
        .map(|id| {
            let worker = Worker {
                id,
                queue: ctx.queue.clone(),
                processor: processor.clone(),
                metrics: ctx.metrics.clone(),
                file_key: file_key.clone(),
                until,
                job_timeout,
                // Outlives the job timeout so a live job is never claimed twice.
                lease: job_timeout + settings.poll_interval() + Duration::from_secs(1),
                poll_interval: settings.poll_interval(),
                redelivery_delay: settings.redelivery_delay(),
                cancel: cancel.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect();

    let mut summary = WorkSummary::default();
    for result in try_join_all(handles).await? {
        summary.add(result?);
    }

    ctx.queue.flush().await?;
    let metrics = ctx.metrics.snapshot();
    info!(
        completed = summary.jobs_completed,
        retried = summary.jobs_retried,
        failed = summary.jobs_failed,
        metrics = ?metrics,
        "Workers finished"
    );
    Ok(summary)
}
