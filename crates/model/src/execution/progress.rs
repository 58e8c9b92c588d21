use crate::records::job::JobCounts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Row outcome tallies for one file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl RowCounts {
    pub fn completed(&self) -> u64 {
        self.updated + self.skipped + self.failed
    }

    pub fn add(&mut self, other: RowCounts) {
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }

    pub fn is_empty(&self) -> bool {
        self.completed() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowLevel {
    pub last_processed_row: u64,
    pub total_rows: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub completed_rows: u64,
    pub remaining_rows: u64,
}

impl RowLevel {
    pub fn new(last_processed_row: u64, total_rows: u64, counts: RowCounts) -> Self {
        let completed_rows = counts.completed();
        RowLevel {
            last_processed_row,
            total_rows,
            updated: counts.updated,
            skipped: counts.skipped,
            failed: counts.failed,
            completed_rows,
            remaining_rows: total_rows.saturating_sub(completed_rows),
        }
    }

    pub fn counts(&self) -> RowCounts {
        RowCounts {
            updated: self.updated,
            skipped: self.skipped,
            failed: self.failed,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLevel {
    pub waiting: u64,
    pub active: u64,
    pub delayed: u64,
    pub total_remaining_jobs: u64,
}

impl From<JobCounts> for JobLevel {
    fn from(counts: JobCounts) -> Self {
        JobLevel {
            waiting: counts.waiting,
            active: counts.active,
            delayed: counts.delayed,
            total_remaining_jobs: counts.remaining(),
        }
    }
}

/// Human-readable durable progress snapshot for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressDocument {
    pub file_key: String,
    pub row_level: RowLevel,
    pub job_level: JobLevel,
    pub timestamp: DateTime<Utc>,
}

impl ProgressDocument {
    pub fn new(file_key: &str, row_level: RowLevel, job_level: JobLevel) -> Self {
        ProgressDocument {
            file_key: file_key.to_string(),
            row_level,
            job_level,
            timestamp: Utc::now(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.row_level.total_rows > 0 && self.row_level.remaining_rows == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_level_derives_completion() {
        let level = RowLevel::new(
            6,
            10,
            RowCounts {
                updated: 3,
                skipped: 2,
                failed: 1,
            },
        );
        assert_eq!(level.completed_rows, 6);
        assert_eq!(level.remaining_rows, 4);
    }

    #[test]
    fn document_serializes_camel_case() {
        let doc = ProgressDocument::new("vendor.csv", RowLevel::default(), JobLevel::default());
        let json = serde_json::to_value(&doc).unwrap();
        assert!(json["rowLevel"].get("lastProcessedRow").is_some());
        assert!(json["jobLevel"].get("totalRemainingJobs").is_some());
    }
}
