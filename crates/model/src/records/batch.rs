use crate::records::row::CanonicalRow;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// One slot of a batch. Malformed source rows keep their slot so that batches
/// still partition the file's row space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchEntry {
    Row(CanonicalRow),
    Malformed { reason: String },
}

impl BatchEntry {
    fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            BatchEntry::Row(row) => row.canonical_bytes(),
            BatchEntry::Malformed { reason } => {
                let mut out = b"!malformed:".to_vec();
                out.extend_from_slice(reason.as_bytes());
                out.push(0x1e);
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Zero-based offset of the first entry within the source file.
    pub start_index: u64,
    pub entries: Vec<BatchEntry>,
    pub manifest: Manifest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub row_count: usize,
    pub checksum_xxh3: u64, // rolling checksum over canonicalized entries
}

pub fn manifest_for(entries: &[BatchEntry]) -> Manifest {
    let mut h: u64 = 0;
    for entry in entries {
        h = xxh3_64_with_seed(&entry.canonical_bytes(), h);
    }
    Manifest {
        row_count: entries.len(),
        checksum_xxh3: h,
    }
}

impl Batch {
    pub fn new(start_index: u64, entries: Vec<BatchEntry>) -> Self {
        let manifest = manifest_for(&entries);
        Batch {
            start_index,
            entries,
            manifest,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exclusive end of the row range covered by this batch.
    pub fn end_index(&self) -> u64 {
        self.start_index + self.entries.len() as u64
    }
}
