use crate::error::RunError;
use connectors::catalog::CatalogApi;
use engine_config::settings::Settings;
use engine_core::{
    dispatch::Dispatcher,
    metrics::Metrics,
    progress::ProgressService,
    queue::{EnqueueOptions, JobQueue, sled_queue::SledJobQueue},
    state::{documents::JsonDocumentStore, sled_store::SledStateStore},
};
use engine_processing::consumer::{config::ProcessorConfig, processor::RowProcessor};
use std::sync::Arc;
use tracing::info;

/// Shared handles for one process: state, queue, progress, throttle.
#[derive(Clone)]
pub struct RuntimeContext {
    pub settings: Settings,
    pub queue: Arc<dyn JobQueue>,
    pub progress: ProgressService,
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Metrics,
    run_id: String,
}

impl RuntimeContext {
    /// Opens (or creates) the state directory named by `settings`.
    pub fn open(settings: Settings) -> Result<Self, RunError> {
        let dir = settings.state_dir()?;
        std::fs::create_dir_all(&dir).map_err(|e| {
            RunError::InitializationError(format!(
                "Could not create state directory {}: {e}",
                dir.display()
            ))
        })?;

        // One sled database backs both the checkpoints and the queue.
        let db = sled::open(dir.join("db"))?;
        let state = SledStateStore::from_db(db.clone());
        let queue: Arc<dyn JobQueue> = Arc::new(SledJobQueue::new(&db)?);
        let documents = Arc::new(JsonDocumentStore::new(dir.join("documents")));
        let progress = ProgressService::new(
            Arc::new(state.clone()),
            Arc::new(state),
            documents,
        );

        let metrics = Metrics::new();
        let dispatcher = Arc::new(Dispatcher::new(
            settings.dispatcher.dispatcher_config(),
            metrics.clone(),
        ));
        let run_id = uuid::Uuid::new_v4().to_string();

        info!(run_id = %run_id, state_dir = %dir.display(), "Runtime context ready");
        Ok(RuntimeContext {
            settings,
            queue,
            progress,
            dispatcher,
            metrics,
            run_id,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn enqueue_options(&self) -> EnqueueOptions {
        EnqueueOptions {
            max_attempts: self.settings.workers.max_job_attempts,
        }
    }

    pub fn processor(&self, catalog: Arc<dyn CatalogApi>) -> RowProcessor {
        RowProcessor::new(
            catalog,
            self.dispatcher.clone(),
            self.progress.clone(),
            self.queue.clone(),
            ProcessorConfig::from_settings(&self.settings),
            self.metrics.clone(),
        )
    }
}
