#[cfg(test)]
mod tests {
    use crate::utils::{FILE_KEY, FlakyCatalog, Fixture, catalog_records, vendor_csv};
    use engine_core::state::DocumentStore;
    use engine_runtime::{
        error::RunError,
        execution::{
            executor,
            workers::{self, WorkUntil},
        },
    };
    use std::{sync::Arc, time::Duration};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    #[traced_test]
    #[tokio::test]
    async fn transient_errors_are_retried_inside_the_dispatcher() {
        let fx = Fixture::new(&vendor_csv(4, &[2]));
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(4)).failing_searches(2));

        let report = executor::run(&fx.ctx, &fx.file, catalog.clone(), CancellationToken::new())
            .await
            .unwrap();

        let rows = report.progress.row_level;
        assert_eq!((rows.updated, rows.skipped, rows.failed), (1, 3, 0));
        assert_eq!(report.work.jobs_retried, 0);
        assert!(fx.ctx.metrics.snapshot().retries >= 2);
        assert_eq!(catalog.name_of(102).await, "Relay 2 Pro");
    }

    #[tokio::test]
    async fn not_found_is_attempted_once_and_counted_failed() {
        let fx = Fixture::new(&vendor_csv(3, &[1]));
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(3)).missing(101));

        let report = executor::run(&fx.ctx, &fx.file, catalog.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(catalog.fetches_of(101), 1);
        let rows = report.progress.row_level;
        assert_eq!((rows.updated, rows.skipped, rows.failed), (0, 2, 1));
        // A row-scoped failure still lets the checkpoint move past it.
        assert!(report.progress.is_complete());

        let notes = fx.ctx.progress.documents.load_status(FILE_KEY).await.unwrap();
        assert_eq!(notes.failed.len(), 1);
        assert!(notes.failed[0].contains("AB-1"));
    }

    #[tokio::test]
    async fn rejected_bulk_write_counts_rows_failed_without_redelivery() {
        let fx = Fixture::new(&vendor_csv(5, &[0, 1]));
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(5)).rejecting_writes(400));

        let report = executor::run(&fx.ctx, &fx.file, catalog.clone(), CancellationToken::new())
            .await
            .unwrap();

        let rows = report.progress.row_level;
        assert_eq!((rows.updated, rows.skipped, rows.failed), (0, 3, 2));
        assert_eq!(report.work.jobs_completed, 3);
        assert_eq!(report.work.jobs_retried, 0);
        assert_eq!(catalog.name_of(100).await, "Relay 0");
    }

    #[tokio::test]
    async fn expired_lease_is_redelivered() {
        let fx = Fixture::new(&vendor_csv(5, &[4]));
        executor::ingest(&fx.ctx, &fx.file).await.unwrap();

        // A worker claims the first job and dies; its lease is already over.
        let abandoned = fx
            .ctx
            .queue
            .claim(Some(FILE_KEY), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(abandoned.job.start_index(), 0);

        let catalog = Arc::new(FlakyCatalog::new(catalog_records(5)));
        let summary = workers::work(
            &fx.ctx,
            catalog,
            Some(FILE_KEY.to_string()),
            WorkUntil::Drained,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.jobs_completed, 3);
        assert_eq!(fx.ctx.queue.counts(FILE_KEY).await.unwrap().completed, 3);
        let doc = executor::status(&fx.ctx, FILE_KEY).await.unwrap();
        assert!(doc.is_complete());
        assert_eq!(doc.row_level.updated, 1);
        assert_eq!(doc.row_level.completed_rows, doc.row_level.total_rows);
    }

    #[tokio::test]
    async fn job_finished_before_a_crash_is_counted_once() {
        let fx = Fixture::new(&vendor_csv(5, &[0]));
        executor::ingest(&fx.ctx, &fx.file).await.unwrap();
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(5)));

        // The worker processes the first job but dies before acknowledging it.
        let unacked = fx
            .ctx
            .queue
            .claim(Some(FILE_KEY), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let report = fx
            .ctx
            .processor(catalog.clone())
            .process(&unacked.job)
            .await
            .unwrap();
        assert_eq!(report.counts.updated, 1);

        let summary = workers::work(
            &fx.ctx,
            catalog,
            Some(FILE_KEY.to_string()),
            WorkUntil::Drained,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary.jobs_completed, 3);

        let doc = executor::status(&fx.ctx, FILE_KEY).await.unwrap();
        assert_eq!(doc.row_level.total_rows, 5);
        assert_eq!(doc.row_level.completed_rows, 5);
        assert_eq!(
            (doc.row_level.updated, doc.row_level.skipped, doc.row_level.failed),
            (1, 4, 0)
        );
        assert!(doc.is_complete());
    }

    #[traced_test]
    #[tokio::test]
    async fn timed_out_job_goes_back_to_the_queue() {
        let fx = Fixture::with_settings(&vendor_csv(2, &[0]), |s| {
            s.workers.count = 1;
            s.workers.job_timeout_secs = 1;
        });
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(2)).hanging_searches(1));

        let report = executor::run(&fx.ctx, &fx.file, catalog.clone(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.work.jobs_retried, 1);
        assert_eq!(report.work.jobs_completed, 1);
        assert!(report.progress.is_complete());
        // Nothing from the abandoned delivery was counted.
        assert_eq!(report.progress.row_level.updated, 1);
        assert_eq!(report.progress.row_level.skipped, 1);
        assert!(logs_contain("Job exceeded its time limit"));
    }

    #[tokio::test]
    async fn job_is_parked_failed_at_the_attempt_ceiling() {
        let fx = Fixture::with_settings(&vendor_csv(2, &[]), |s| {
            s.workers.count = 1;
            s.workers.job_timeout_secs = 1;
            s.workers.max_job_attempts = 1;
        });
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(2)).hanging_searches(1));

        let report = executor::run(&fx.ctx, &fx.file, catalog, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.work.jobs_failed, 1);
        assert_eq!(report.work.jobs_completed, 0);
        assert_eq!(fx.ctx.queue.counts(FILE_KEY).await.unwrap().failed, 1);
        assert!(!report.progress.is_complete());
        assert_eq!(report.progress.row_level.last_processed_row, 0);
    }

    #[tokio::test]
    async fn cancelled_run_leaves_jobs_queued() {
        let fx = Fixture::new(&vendor_csv(5, &[]));
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(5)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = executor::run(&fx.ctx, &fx.file, catalog, cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, RunError::ShutdownRequested));
        assert_eq!(fx.ctx.queue.counts(FILE_KEY).await.unwrap().waiting, 3);
    }

    #[tokio::test]
    async fn workers_keep_polling_until_cancelled() {
        let fx = Fixture::new(&vendor_csv(5, &[]));
        executor::ingest(&fx.ctx, &fx.file).await.unwrap();
        let catalog = Arc::new(FlakyCatalog::new(catalog_records(5)));
        let cancel = CancellationToken::new();

        let queue = fx.ctx.queue.clone();
        let stopper = {
            let cancel = cancel.clone();
            async move {
                for _ in 0..500 {
                    if queue.counts(FILE_KEY).await.unwrap().completed == 3 {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                cancel.cancel();
            }
        };

        let (summary, ()) = tokio::join!(
            workers::work(&fx.ctx, catalog, None, WorkUntil::Cancelled, cancel.clone()),
            stopper
        );

        assert_eq!(summary.unwrap().jobs_completed, 3);
    }
}
