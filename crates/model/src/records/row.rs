use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical field names every vendor file is normalized into.
pub const IDENTIFIER: &str = "identifier";
pub const MANUFACTURER: &str = "manufacturer";
pub const CATEGORY: &str = "category";

/// A vendor CSV row after header folding and identifier backfill.
///
/// The three identity fields are fixed; every other column lands in `attributes`
/// keyed by its folded header name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub identifier: String,
    pub manufacturer: String,
    pub category: String,
    pub attributes: BTreeMap<String, String>,
}

impl CanonicalRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        match field {
            IDENTIFIER => Some(self.identifier.as_str()),
            MANUFACTURER => Some(self.manufacturer.as_str()),
            CATEGORY => Some(self.category.as_str()),
            other => self.attributes.get(other).map(String::as_str),
        }
    }

    /// Returns the attribute value, treating a blank value as absent.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn has_identifier(&self) -> bool {
        !self.identifier.trim().is_empty()
    }

    /// Stable byte encoding used for batch checksums.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        for part in [&self.identifier, &self.manufacturer, &self.category] {
            out.extend_from_slice(part.as_bytes());
            out.push(0x1f);
        }
        for (key, value) in &self.attributes {
            out.extend_from_slice(key.as_bytes());
            out.push(0x1d);
            out.extend_from_slice(value.as_bytes());
            out.push(0x1f);
        }
        out.push(0x1e);
        out
    }
}
