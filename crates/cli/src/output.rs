use crate::error::CliError;
use engine_processing::producer::enqueuer::PlanSummary;
use model::execution::progress::ProgressDocument;
use serde::Serialize;
use std::path::Path;

fn to_json<T: Serialize>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub async fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), CliError> {
    tokio::fs::write(path, to_json(value)?).await?;
    Ok(())
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", to_json(value)?);
    Ok(())
}

pub fn print_plan(summary: &PlanSummary) {
    println!("Plan for '{}':", summary.file_key);
    println!("-----------------------------");
    println!("{:<22} {}", "Total rows", summary.total_rows);
    println!("{:<22} {}", "Resume from", summary.resume_from);
    println!("{:<22} {}", "Jobs planned", summary.planned);
    println!("{:<22} {}", "Jobs enqueued", summary.enqueued);
    println!("{:<22} {}", "Already queued", summary.duplicates);
    println!("{:<22} {}", "Malformed rows", summary.malformed);
}

pub fn print_progress_table(doc: &ProgressDocument) {
    let rows = &doc.row_level;
    let jobs = &doc.job_level;
    println!("Progress for '{}':", doc.file_key);
    println!("-----------------------------");
    println!("{:<22} {}", "Last processed row", rows.last_processed_row);
    println!("{:<22} {}", "Total rows", rows.total_rows);
    println!("{:<22} {}", "Updated", rows.updated);
    println!("{:<22} {}", "Skipped", rows.skipped);
    println!("{:<22} {}", "Failed", rows.failed);
    println!("{:<22} {}", "Remaining rows", rows.remaining_rows);
    println!(
        "{:<22} {} waiting, {} active, {} delayed",
        "Jobs", jobs.waiting, jobs.active, jobs.delayed
    );
    println!("{:<22} {}", "Updated at", doc.timestamp.to_rfc3339());
}
