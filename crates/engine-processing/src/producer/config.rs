use connectors::file::csv::normalize::ColumnMapping;
use engine_config::settings::Settings;

/// Configuration for one planning pass over one file.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Key the file's jobs, checkpoint and documents are stored under
    pub file_key: String,

    /// Data rows in the file, as counted before planning
    pub total_rows: u64,

    /// Rows per batch; the last batch may be shorter
    pub batch_size: usize,

    /// Rows below this absolute index are counted and dropped
    pub resume_from: u64,

    /// Explicit canonical field -> column assignments
    pub mapping: Option<ColumnMapping>,
}

impl PlannerConfig {
    pub fn new(file_key: impl Into<String>, total_rows: u64, batch_size: usize) -> Self {
        Self {
            file_key: file_key.into(),
            total_rows,
            batch_size: batch_size.max(1),
            resume_from: 0,
            mapping: None,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        file_key: impl Into<String>,
        total_rows: u64,
        resume_from: u64,
    ) -> Self {
        Self::new(file_key, total_rows, settings.source.batch_size)
            .resume_from(resume_from)
            .with_mapping(settings.source.mapping().cloned())
    }

    pub fn resume_from(mut self, row: u64) -> Self {
        self.resume_from = row;
        self
    }

    pub fn with_mapping(mut self, mapping: Option<ColumnMapping>) -> Self {
        self.mapping = mapping.filter(|m| !m.is_empty());
        self
    }
}
