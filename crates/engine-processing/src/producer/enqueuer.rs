use crate::{error::ProcessingError, producer::planner::BatchPlanner};
use connectors::file::csv::{error::FileError, source::SourceRow};
use engine_core::queue::{EnqueueOptions, EnqueueOutcome, JobQueue};
use model::records::job::Job;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlanMode {
    #[default]
    Enqueue,
    /// Plan and report without touching the queue.
    PlanOnly,
}

/// What a plan says about one job, without its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedJob {
    pub id: String,
    pub start_index: u64,
    pub size: usize,
    pub checksum: u64,
}

impl From<&Job> for PlannedJob {
    fn from(job: &Job) -> Self {
        PlannedJob {
            id: job.id.clone(),
            start_index: job.start_index(),
            size: job.batch.len(),
            checksum: job.batch.manifest.checksum_xxh3,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub file_key: String,
    pub total_rows: u64,
    pub resume_from: u64,
    pub planned: usize,
    pub enqueued: usize,
    /// Jobs the queue already knew about.
    pub duplicates: usize,
    pub skipped_before_resume: u64,
    pub malformed: u64,
    pub jobs: Vec<PlannedJob>,
}

/// First divergence between two plans of the same file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanDiff {
    LengthMismatch {
        left: usize,
        right: usize,
    },
    JobMismatch {
        position: usize,
        left: PlannedJob,
        right: PlannedJob,
    },
}

impl fmt::Display for PlanDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanDiff::LengthMismatch { left, right } => {
                write!(f, "plans differ in length: {left} vs {right} jobs")
            }
            PlanDiff::JobMismatch {
                position,
                left,
                right,
            } => write!(
                f,
                "job {position} differs: {} @{}+{} ({:016x}) vs {} @{}+{} ({:016x})",
                left.id,
                left.start_index,
                left.size,
                left.checksum,
                right.id,
                right.start_index,
                right.size,
                right.checksum
            ),
        }
    }
}

pub fn compare_plans(left: &[PlannedJob], right: &[PlannedJob]) -> Option<PlanDiff> {
    if let Some((position, (l, r))) = left
        .iter()
        .zip(right)
        .enumerate()
        .find(|(_, (l, r))| l != r)
    {
        return Some(PlanDiff::JobMismatch {
            position,
            left: l.clone(),
            right: r.clone(),
        });
    }
    if left.len() != right.len() {
        return Some(PlanDiff::LengthMismatch {
            left: left.len(),
            right: right.len(),
        });
    }
    None
}

/// Runs a planner to completion without a queue.
pub fn plan_only<I>(planner: BatchPlanner<I>) -> Result<PlanSummary, FileError>
where
    I: Iterator<Item = Result<SourceRow, FileError>>,
{
    let mut planner = planner;
    let mut summary = summary_for(&planner);
    for job in planner.by_ref() {
        summary.jobs.push(PlannedJob::from(&job?));
    }
    finish(&mut summary, &planner);
    Ok(summary)
}

fn summary_for<I>(planner: &BatchPlanner<I>) -> PlanSummary
where
    I: Iterator<Item = Result<SourceRow, FileError>>,
{
    let config = planner.config();
    PlanSummary {
        file_key: config.file_key.clone(),
        total_rows: config.total_rows,
        resume_from: config.resume_from,
        ..Default::default()
    }
}

fn finish<I>(summary: &mut PlanSummary, planner: &BatchPlanner<I>)
where
    I: Iterator<Item = Result<SourceRow, FileError>>,
{
    summary.planned = summary.jobs.len();
    summary.skipped_before_resume = planner.skipped_before_resume();
    summary.malformed = planner.malformed();
}

/// Submits planned jobs, skipping any the queue already holds.
pub struct Enqueuer {
    queue: Arc<dyn JobQueue>,
    options: EnqueueOptions,
}

impl Enqueuer {
    pub fn new(queue: Arc<dyn JobQueue>, options: EnqueueOptions) -> Self {
        Enqueuer { queue, options }
    }

    pub async fn run<I>(
        &self,
        planner: BatchPlanner<I>,
        mode: PlanMode,
    ) -> Result<PlanSummary, ProcessingError>
    where
        I: Iterator<Item = Result<SourceRow, FileError>>,
    {
        if mode == PlanMode::PlanOnly {
            return Ok(plan_only(planner)?);
        }

        let mut planner = planner;
        let mut summary = summary_for(&planner);

        for job in planner.by_ref() {
            let job = job?;
            summary.jobs.push(PlannedJob::from(&job));

            if self.queue.contains(&job.id).await? {
                debug!(
                    job_id = %job.id,
                    start_index = job.start_index(),
                    "Job already known, skipping"
                );
                summary.duplicates += 1;
                continue;
            }

            let id = job.id.clone();
            match self.queue.enqueue(job, self.options).await? {
                EnqueueOutcome::Enqueued => summary.enqueued += 1,
                EnqueueOutcome::Duplicate => {
                    debug!(job_id = %id, "Job enqueued concurrently, skipping");
                    summary.duplicates += 1;
                }
            }
        }

        finish(&mut summary, &planner);
        self.queue.flush().await?;

        info!(
            file_key = %summary.file_key,
            resume_from = summary.resume_from,
            planned = summary.planned,
            enqueued = summary.enqueued,
            duplicates = summary.duplicates,
            malformed = summary.malformed,
            "Planning finished"
        );
        Ok(summary)
    }
}
