use crate::{
    error::RunError,
    execution::{
        context::RuntimeContext,
        source::SourceFile,
        workers::{self, WorkSummary, WorkUntil},
    },
};
use connectors::{catalog::CatalogApi, file::csv::settings::SourceMode};
use engine_processing::producer::{
    config::PlannerConfig,
    enqueuer::{Enqueuer, PlanMode, PlanSummary, compare_plans, plan_only},
    planner::BatchPlanner,
};
use engine_core::state::DocumentStore;
use model::execution::progress::ProgressDocument;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Plans `file` from its resume point, optionally enqueuing the jobs.
pub async fn plan(
    ctx: &RuntimeContext,
    file: &SourceFile,
    mode: PlanMode,
) -> Result<PlanSummary, RunError> {
    let total_rows = file.count_rows().await?;
    let resume_from = ctx.progress.resume_point(&file.file_key).await?;
    if resume_from > 0 {
        info!(file_key = %file.file_key, resume_from, total_rows, "Resuming from checkpoint");
    }

    let config =
        PlannerConfig::from_settings(&ctx.settings, &file.file_key, total_rows, resume_from);
    match mode {
        PlanMode::PlanOnly => plan_blocking(file.clone(), config).await,
        PlanMode::Enqueue => {
            let planner = BatchPlanner::from_source(file.adapter.open()?, config);
            let enqueuer = Enqueuer::new(ctx.queue.clone(), ctx.enqueue_options());
            Ok(enqueuer.run(planner, PlanMode::Enqueue).await?)
        }
    }
}

async fn plan_blocking(file: SourceFile, config: PlannerConfig) -> Result<PlanSummary, RunError> {
    tokio::task::spawn_blocking(move || -> Result<PlanSummary, RunError> {
        let planner = BatchPlanner::from_source(file.adapter.open()?, config);
        Ok(plan_only(planner)?)
    })
    .await?
}

/// Counts, resumes, plans and enqueues one file.
pub async fn ingest(ctx: &RuntimeContext, file: &SourceFile) -> Result<PlanSummary, RunError> {
    let summary = plan(ctx, file, PlanMode::Enqueue).await?;
    let jobs = ctx.queue.counts(&file.file_key).await?;

    // Seed the progress document so the file is visible before any job runs.
    if ctx
        .progress
        .documents
        .load_progress(&file.file_key)
        .await?
        .is_none()
    {
        ctx.progress
            .advance(&file.file_key, summary.resume_from, summary.total_rows, jobs)
            .await?;
    }
    Ok(summary)
}

/// Plans `file` twice, buffered and streaming, and fails on any divergence.
pub async fn verify_plan(
    ctx: &RuntimeContext,
    file: &SourceFile,
) -> Result<PlanSummary, RunError> {
    let total_rows = file.count_rows().await?;
    let resume_from = ctx.progress.resume_point(&file.file_key).await?;
    let config =
        PlannerConfig::from_settings(&ctx.settings, &file.file_key, total_rows, resume_from);

    let buffered = plan_blocking(file.with_mode(SourceMode::Buffered), config.clone()).await?;
    let streaming = plan_blocking(file.with_mode(SourceMode::Streaming), config).await?;

    if let Some(diff) = compare_plans(&buffered.jobs, &streaming.jobs) {
        warn!(file_key = %file.file_key, %diff, "Buffered and streaming plans differ");
        return Err(RunError::PlanMismatch {
            file_key: file.file_key.clone(),
            detail: diff.to_string(),
        });
    }

    info!(
        file_key = %file.file_key,
        jobs = streaming.planned,
        "Buffered and streaming plans match"
    );
    Ok(streaming)
}

/// Live progress for one file.
pub async fn status(ctx: &RuntimeContext, file_key: &str) -> Result<ProgressDocument, RunError> {
    let jobs = ctx.queue.counts(file_key).await?;
    Ok(ctx.progress.status(file_key, jobs).await?)
}

/// Drops every job, checkpoint, counter and document for `file_key`.
pub async fn reset(ctx: &RuntimeContext, file_key: &str) -> Result<usize, RunError> {
    let purged = ctx.queue.purge(file_key).await?;
    ctx.progress.clear(file_key).await?;
    info!(file_key, purged, "Reset file state");
    Ok(purged)
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub plan: PlanSummary,
    pub work: WorkSummary,
    pub progress: ProgressDocument,
}

/// Ingests `file` and works its queue until drained or cancelled.
pub async fn run(
    ctx: &RuntimeContext,
    file: &SourceFile,
    catalog: Arc<dyn CatalogApi>,
    cancel: CancellationToken,
) -> Result<RunReport, RunError> {
    info!(run_id = ctx.run_id(), file_key = %file.file_key, "Starting run");
    let plan = ingest(ctx, file).await?;

    if cancel.is_cancelled() {
        return Err(RunError::ShutdownRequested);
    }

    let work = workers::work(
        ctx,
        catalog,
        Some(file.file_key.clone()),
        WorkUntil::Drained,
        cancel.clone(),
    )
    .await?;

    let progress = status(ctx, &file.file_key).await?;
    info!(
        file_key = %file.file_key,
        last_processed_row = progress.row_level.last_processed_row,
        total_rows = progress.row_level.total_rows,
        updated = progress.row_level.updated,
        skipped = progress.row_level.skipped,
        failed = progress.row_level.failed,
        complete = progress.is_complete(),
        "Run finished"
    );

    if cancel.is_cancelled() && !progress.is_complete() {
        info!("Stopping gracefully - partial progress saved");
    }
    Ok(RunReport {
        plan,
        work,
        progress,
    })
}
