use crate::file::csv::{
    error::FileError,
    settings::CsvSettings,
    source::{CsvRowSource, count_rows},
};
use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

/// A CSV object on local storage, opened fresh for each pass.
#[derive(Debug, Clone)]
pub struct CsvAdapter {
    path: PathBuf,
    pub settings: CsvSettings,
}

impl CsvAdapter {
    pub fn new(path: impl AsRef<Path>, settings: CsvSettings) -> Result<Self, FileError> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(FileError::NotFound(path.display().to_string()));
        }
        Ok(CsvAdapter { path, settings })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn open(&self) -> Result<CsvRowSource, FileError> {
        let file = BufReader::new(File::open(&self.path)?);
        CsvRowSource::new(file, &self.settings)
    }

    pub fn count_rows(&self) -> Result<u64, FileError> {
        let file = BufReader::new(File::open(&self.path)?);
        count_rows(file, &self.settings)
    }
}
