use crate::{
    commands::{Commands, ConfigArgs},
    env::EnvManager,
    error::CliError,
    shutdown::{ExitCode, ShutdownCoordinator},
};
use clap::Parser;
use connectors::catalog::{CatalogApi, snapshot::SnapshotCatalog};
use engine_config::settings::Settings;
use engine_processing::producer::enqueuer::PlanMode;
use engine_runtime::{
    error::RunError,
    execution::{
        context::RuntimeContext,
        executor,
        source::{SourceFile, file_key_for},
        workers::{self, WorkUntil},
    },
};
use std::{path::Path, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod commands;
mod env;
mod error;
mod output;
mod shutdown;

#[derive(Parser)]
#[command(
    name = "reconcile",
    version,
    about = "Resumable CSV-to-catalog reconciliation"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let shutdown = ShutdownCoordinator::new(CancellationToken::new());
    shutdown.register_handlers();

    let code = match execute(cli.command, shutdown.cancel_token()).await {
        Ok(code) if shutdown.is_shutdown_requested() => {
            info!("Stopped before completion; rerun to resume");
            if code == ExitCode::Success {
                ExitCode::ShutdownRequested
            } else {
                code
            }
        }
        Ok(code) => code,
        Err(CliError::ShutdownRequested | CliError::Runner(RunError::ShutdownRequested)) => {
            ExitCode::ShutdownRequested
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::GeneralError
        }
    };
    std::process::exit(code.as_i32());
}

fn load_settings(args: &ConfigArgs) -> Result<Settings, CliError> {
    let mut env = EnvManager::new();
    if let Some(path) = &args.env_file {
        let added = env.load_from_file(path)?;
        info!(path = %path.display(), added, "Loaded env file");
    }
    Ok(Settings::load(args.config.as_deref(), env.all())?)
}

async fn load_catalog(path: &Path) -> Result<Arc<dyn CatalogApi>, CliError> {
    let catalog = SnapshotCatalog::load(path).await?;
    Ok(Arc::new(catalog))
}

fn key_of(file: &Path, key: Option<String>) -> String {
    key.unwrap_or_else(|| file_key_for(file))
}

async fn execute(command: Commands, cancel: CancellationToken) -> Result<ExitCode, CliError> {
    let settings = load_settings(command.config_args())?;
    let ctx = RuntimeContext::open(settings)?;

    match command {
        Commands::Plan {
            file,
            key,
            mode,
            verify,
            output,
            ..
        } => {
            let source = SourceFile::open(
                &ctx.settings,
                &file,
                key.as_deref(),
                mode.map(Into::into),
            )?;
            let summary = if verify {
                executor::verify_plan(&ctx, &source).await?
            } else {
                executor::plan(&ctx, &source, PlanMode::PlanOnly).await?
            };

            match output {
                Some(path) => output::write_json(&summary, &path).await?,
                None => output::print_plan(&summary),
            }
        }
        Commands::Ingest { file, key, .. } => {
            let source = SourceFile::open(&ctx.settings, &file, key.as_deref(), None)?;
            let summary = executor::ingest(&ctx, &source).await?;
            output::print_plan(&summary);
        }
        Commands::Work {
            catalog,
            file,
            key,
            until_drained,
            ..
        } => {
            let catalog = load_catalog(&catalog).await?;
            let file_key = match (file, key) {
                (_, Some(key)) => Some(key),
                (Some(file), None) => Some(file_key_for(&file)),
                (None, None) => None,
            };
            let until = if until_drained {
                WorkUntil::Drained
            } else {
                WorkUntil::Cancelled
            };
            let summary = workers::work(&ctx, catalog, file_key, until, cancel).await?;
            if summary.jobs_failed > 0 {
                return Ok(ExitCode::Incomplete);
            }
        }
        Commands::Run {
            file, key, catalog, ..
        } => {
            let catalog = load_catalog(&catalog).await?;
            let source = SourceFile::open(&ctx.settings, &file, key.as_deref(), None)?;
            let report = executor::run(&ctx, &source, catalog, cancel).await?;
            output::print_progress_table(&report.progress);
            if !report.progress.is_complete() || report.work.jobs_failed > 0 {
                return Ok(ExitCode::Incomplete);
            }
        }
        Commands::Progress {
            file, key, json, ..
        } => {
            let doc = executor::status(&ctx, &key_of(&file, key)).await?;
            if json {
                output::print_json(&doc)?;
            } else {
                output::print_progress_table(&doc);
            }
        }
        Commands::Reset { file, key, .. } => {
            let file_key = key_of(&file, key);
            let purged = executor::reset(&ctx, &file_key).await?;
            println!("Reset '{file_key}': {purged} jobs removed");
        }
    }

    Ok(ExitCode::Success)
}
