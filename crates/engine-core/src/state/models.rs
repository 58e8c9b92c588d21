use chrono::{DateTime, Utc};
use model::execution::progress::RowCounts;
use serde::{Deserialize, Serialize};

/// Fast-store checkpoint for one file.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    pub file_key: String,
    /// Exclusive end of the highest contiguous region reported done.
    pub last_processed_row: u64,
    pub total_rows: u64,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(file_key: &str, last_processed_row: u64, total_rows: u64) -> Self {
        Checkpoint {
            file_key: file_key.to_string(),
            last_processed_row,
            total_rows,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced { previous: Option<u64>, current: u64 },
    /// The stored value was already at or beyond the proposal.
    Unchanged { current: u64 },
}

impl AdvanceOutcome {
    pub fn advanced(&self) -> bool {
        matches!(self, AdvanceOutcome::Advanced { .. })
    }

    pub fn current(&self) -> u64 {
        match self {
            AdvanceOutcome::Advanced { current, .. } | AdvanceOutcome::Unchanged { current } => {
                *current
            }
        }
    }
}

/// Result of recording one job's row outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded(RowCounts),
    /// The job's outcomes were already counted by an earlier delivery.
    AlreadyRecorded(RowCounts),
}

impl RecordOutcome {
    pub fn recorded(&self) -> bool {
        matches!(self, RecordOutcome::Recorded(_))
    }

    pub fn totals(&self) -> RowCounts {
        match self {
            RecordOutcome::Recorded(totals) | RecordOutcome::AlreadyRecorded(totals) => *totals,
        }
    }
}
