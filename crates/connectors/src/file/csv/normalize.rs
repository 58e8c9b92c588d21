use crate::file::csv::metadata::{CsvMetadata, normalize_col_name};
use model::records::row::{CATEGORY, CanonicalRow, IDENTIFIER, MANUFACTURER};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Vendor synonyms consulted, in order, when a canonical field is still empty.
const IDENTIFIER_ALIASES: &[&str] = &[
    "mpn",
    "manufacturer_part_number",
    "mfr_part_number",
    "part_number",
    "part_no",
    "partnumber",
    "item_number",
];
const MANUFACTURER_ALIASES: &[&str] = &["brand", "brand_name", "manufacturer_name", "mfr", "make"];
const CATEGORY_ALIASES: &[&str] = &["product_category", "category_name", "product_type"];

/// Explicit canonical field -> source column assignments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(BTreeMap<String, String>);

impl ColumnMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, column: &str) -> Self {
        self.0
            .insert(normalize_col_name(field), column.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn column_for(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    /// Source columns named by the mapping, folded like headers are.
    pub fn folded_columns(&self) -> impl Iterator<Item = String> + '_ {
        self.0.values().map(|c| normalize_col_name(c))
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Identifier,
    Manufacturer,
    Category,
    Attribute,
}

/// Turns raw CSV cells into a [`CanonicalRow`]. Pure; built once per file
/// so header folding happens once rather than per row.
#[derive(Debug, Clone)]
pub struct RowNormalizer {
    meta: CsvMetadata,
    mapped: [Option<usize>; 3],
    aliases: [Vec<usize>; 3],
}

impl RowNormalizer {
    pub fn new(raw_headers: Vec<String>, mapping: Option<&ColumnMapping>) -> Self {
        let meta = CsvMetadata::new(raw_headers);
        let fields = [IDENTIFIER, MANUFACTURER, CATEGORY];
        let alias_tables = [IDENTIFIER_ALIASES, MANUFACTURER_ALIASES, CATEGORY_ALIASES];

        let mapped = fields.map(|field| {
            mapping
                .and_then(|m| m.column_for(field))
                .and_then(|column| meta.position(column))
        });

        let aliases = std::array::from_fn(|i| {
            // An explicitly mapped field never falls back to inference.
            if mapping.and_then(|m| m.column_for(fields[i])).is_some() {
                return Vec::new();
            }
            alias_tables[i]
                .iter()
                .filter_map(|alias| meta.position(alias))
                .collect()
        });

        RowNormalizer {
            meta,
            mapped,
            aliases,
        }
    }

    pub fn metadata(&self) -> &CsvMetadata {
        &self.meta
    }

    pub fn normalize(&self, cells: &[String]) -> CanonicalRow {
        let mut row = CanonicalRow::default();

        for (idx, column) in self.meta.columns.iter().enumerate() {
            if column.is_empty() {
                continue;
            }
            let value = cell(cells, idx);
            match slot_for(column) {
                Slot::Identifier => fill_if_empty(&mut row.identifier, value),
                Slot::Manufacturer => fill_if_empty(&mut row.manufacturer, value),
                Slot::Category => fill_if_empty(&mut row.category, value),
                Slot::Attribute => {
                    let entry = row.attributes.entry(column.clone()).or_default();
                    fill_if_empty(entry, value);
                }
            }
        }

        let targets = [
            &mut row.identifier,
            &mut row.manufacturer,
            &mut row.category,
        ];
        for (i, target) in targets.into_iter().enumerate() {
            if let Some(idx) = self.mapped[i] {
                *target = cell(cells, idx).to_string();
                continue;
            }
            for &idx in &self.aliases[i] {
                fill_if_empty(target, cell(cells, idx));
            }
        }

        row
    }
}

/// True for folded column names that feed an identity field, either
/// directly or as a vendor synonym.
pub fn is_identity_alias(column: &str) -> bool {
    !matches!(slot_for(column), Slot::Attribute)
        || IDENTIFIER_ALIASES.contains(&column)
        || MANUFACTURER_ALIASES.contains(&column)
        || CATEGORY_ALIASES.contains(&column)
}

fn slot_for(column: &str) -> Slot {
    match column {
        IDENTIFIER => Slot::Identifier,
        MANUFACTURER => Slot::Manufacturer,
        CATEGORY => Slot::Category,
        _ => Slot::Attribute,
    }
}

fn cell(cells: &[String], idx: usize) -> &str {
    cells.get(idx).map(|c| c.trim()).unwrap_or("")
}

fn fill_if_empty(target: &mut String, value: &str) {
    if target.is_empty() && !value.is_empty() {
        *target = value.to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn backfills_from_aliases_without_mapping() {
        let normalizer =
            RowNormalizer::new(strings(&["MPN", "Brand", "Product Category", "Color"]), None);
        let row = normalizer.normalize(&strings(&["X-100", "Acme", "Widgets", " red "]));

        assert_eq!(row.identifier, "X-100");
        assert_eq!(row.manufacturer, "Acme");
        assert_eq!(row.category, "Widgets");
        assert_eq!(row.attributes.get("color").map(String::as_str), Some("red"));
        // Alias columns remain visible as attributes.
        assert_eq!(row.attributes.get("mpn").map(String::as_str), Some("X-100"));
    }

    #[test]
    fn canonical_column_beats_alias() {
        let normalizer = RowNormalizer::new(strings(&["MPN", "Identifier"]), None);
        let row = normalizer.normalize(&strings(&["alias-value", "direct-value"]));
        assert_eq!(row.identifier, "direct-value");
    }

    #[test]
    fn alias_only_fills_empty_fields() {
        let normalizer = RowNormalizer::new(strings(&["Identifier", "MPN"]), None);
        let row = normalizer.normalize(&strings(&["", "from-alias"]));
        assert_eq!(row.identifier, "from-alias");
    }

    #[test]
    fn explicit_mapping_overrides_aliases() {
        let mapping = ColumnMapping::new()
            .with("identifier", "Vendor Code")
            .with("manufacturer", "Maker");
        let normalizer = RowNormalizer::new(
            strings(&["MPN", "Vendor Code", "Brand", "Maker"]),
            Some(&mapping),
        );
        let row = normalizer.normalize(&strings(&["M-1", "V-1", "BrandCo", "MakerCo"]));

        assert_eq!(row.identifier, "V-1");
        assert_eq!(row.manufacturer, "MakerCo");
    }

    #[test]
    fn mapped_empty_column_does_not_fall_back() {
        let mapping = ColumnMapping::new().with("identifier", "Vendor Code");
        let normalizer = RowNormalizer::new(strings(&["MPN", "Vendor Code"]), Some(&mapping));
        let row = normalizer.normalize(&strings(&["M-1", ""]));
        assert_eq!(row.identifier, "");
    }

    #[test]
    fn short_rows_become_empty_strings() {
        let normalizer = RowNormalizer::new(strings(&["MPN", "Brand", "Color"]), None);
        let row = normalizer.normalize(&strings(&["X"]));
        assert_eq!(row.identifier, "X");
        assert_eq!(row.manufacturer, "");
        assert_eq!(row.attributes.get("color").map(String::as_str), Some(""));
    }

    #[test]
    fn identity_aliases_are_recognized() {
        assert!(is_identity_alias("mpn"));
        assert!(is_identity_alias("brand"));
        assert!(is_identity_alias("identifier"));
        assert!(!is_identity_alias("color"));
    }
}
