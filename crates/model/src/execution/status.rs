use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Per-file human-readable trail of row outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusNotes {
    #[serde(default)]
    pub updated: Vec<String>,
    #[serde(default)]
    pub skipped: Vec<String>,
    #[serde(default)]
    pub failed: Vec<String>,
    /// Rows with no remote record, kept for manual creation.
    #[serde(default)]
    pub missing: Vec<String>,
}

impl StatusNotes {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn len(&self) -> usize {
        self.updated.len() + self.skipped.len() + self.failed.len() + self.missing.len()
    }

    pub fn clear(&mut self) {
        self.updated.clear();
        self.skipped.clear();
        self.failed.clear();
        self.missing.clear();
    }

    /// Appends `other`, dropping notes already present. First-seen order is kept.
    pub fn merge(&mut self, other: &StatusNotes) {
        merge_dedup(&mut self.updated, &other.updated);
        merge_dedup(&mut self.skipped, &other.skipped);
        merge_dedup(&mut self.failed, &other.failed);
        merge_dedup(&mut self.missing, &other.missing);
    }
}

fn merge_dedup(into: &mut Vec<String>, from: &[String]) {
    let mut seen: HashSet<String> = into.iter().cloned().collect();
    for note in from {
        if seen.insert(note.clone()) {
            into.push(note.clone());
        }
    }
}
