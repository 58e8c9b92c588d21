use crate::error::RunError;
use connectors::file::csv::{adapter::CsvAdapter, settings::SourceMode};
use engine_config::settings::Settings;
use std::path::Path;
use tracing::info;

/// Default key a file's jobs and progress are stored under: its file name.
pub fn file_key_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A CSV file plus the key it is tracked under.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub file_key: String,
    pub adapter: CsvAdapter,
}

impl SourceFile {
    pub fn open(
        settings: &Settings,
        path: &Path,
        file_key: Option<&str>,
        mode: Option<SourceMode>,
    ) -> Result<Self, RunError> {
        let mut csv = settings.source.csv_settings();
        if let Some(mode) = mode {
            csv = csv.with_mode(mode);
        }
        let adapter = CsvAdapter::new(path, csv)?;
        let file_key = file_key
            .map(str::to_string)
            .unwrap_or_else(|| file_key_for(path));
        Ok(SourceFile { file_key, adapter })
    }

    pub fn with_mode(&self, mode: SourceMode) -> Self {
        let mut other = self.clone();
        other.adapter.settings = other.adapter.settings.clone().with_mode(mode);
        other
    }

    /// Counts data rows off the blocking pool.
    pub async fn count_rows(&self) -> Result<u64, RunError> {
        let adapter = self.adapter.clone();
        let total = tokio::task::spawn_blocking(move || adapter.count_rows()).await??;
        info!(file_key = %self.file_key, total_rows = total, "Counted source rows");
        Ok(total)
    }
}
