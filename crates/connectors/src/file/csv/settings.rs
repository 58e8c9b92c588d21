use serde::{Deserialize, Serialize};

/// How the source object is read before rows are parsed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceMode {
    /// Load the entire object into memory, then iterate.
    Buffered,
    /// Parse rows directly off the reader.
    #[default]
    Streaming,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvSettings {
    pub delimiter: u8,
    /// Zero-based record position of the header row; earlier records are discarded.
    pub header_row: usize,
    pub mode: SourceMode,
}

impl Default for CsvSettings {
    fn default() -> Self {
        CsvSettings {
            delimiter: b',',
            header_row: 0,
            mode: SourceMode::Streaming,
        }
    }
}

impl CsvSettings {
    pub fn with_mode(mut self, mode: SourceMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_header_row(mut self, header_row: usize) -> Self {
        self.header_row = header_row;
        self
    }
}
