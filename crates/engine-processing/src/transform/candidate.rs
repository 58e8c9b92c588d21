use crate::transform::attributes::AttributeBlock;
use connectors::file::csv::normalize::{ColumnMapping, is_identity_alias};
use model::{
    catalog::record::{Attribute, CandidateRecord},
    records::row::{CATEGORY, CanonicalRow},
};
use std::collections::BTreeSet;

pub const IMAGE: &str = "image";
pub const DATASHEET: &str = "datasheet";
pub const ADDITIONAL_ATTRIBUTES: &str = "additional_attributes";

const NAME_COLUMNS: &[&str] = &["name", "product_name", "title"];
const DESCRIPTION_COLUMNS: &[&str] = &["description", "long_description", "product_description"];
const IMAGE_COLUMNS: &[&str] = &["image", "image_url", "main_image"];
const DATASHEET_COLUMNS: &[&str] = &["datasheet", "datasheet_url", "spec_sheet"];

/// Maps a [`CanonicalRow`] onto the remote record's field shape.
#[derive(Debug, Clone, Default)]
pub struct CandidateBuilder {
    // Columns already consumed by an explicit mapping.
    mapped_columns: BTreeSet<String>,
}

fn first_of<'a>(row: &'a CanonicalRow, columns: &[&str]) -> Option<&'a str> {
    columns.iter().find_map(|c| row.attribute(c))
}

fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;
    for c in value.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_uppercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// `MANUFACTURER-IDENTIFIER`, uppercased with punctuation runs folded to `-`.
pub fn derive_sku(manufacturer: &str, identifier: &str) -> String {
    let parts: Vec<String> = [slug(manufacturer), slug(identifier)]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    parts.join("-")
}

impl CandidateBuilder {
    pub fn new(mapping: Option<&ColumnMapping>) -> Self {
        CandidateBuilder {
            mapped_columns: mapping
                .map(|m| m.folded_columns().collect())
                .unwrap_or_default(),
        }
    }

    pub fn build(&self, row: &CanonicalRow) -> CandidateRecord {
        let mut attributes = Vec::new();
        if !row.category.trim().is_empty() {
            attributes.push(Attribute::new(CATEGORY, row.category.trim()));
        }
        if let Some(image) = first_of(row, IMAGE_COLUMNS) {
            attributes.push(Attribute::new(IMAGE, image));
        }
        if let Some(sheet) = first_of(row, DATASHEET_COLUMNS) {
            attributes.push(Attribute::new(DATASHEET, sheet));
        }

        let extra = AttributeBlock::from_pairs(
            row.attributes
                .iter()
                .filter(|(key, _)| !self.is_consumed(key))
                .map(|(key, value)| (key.as_str(), value.trim()))
                .filter(|(_, value)| !value.is_empty()),
        );
        if !extra.is_empty() {
            attributes.push(Attribute::new(ADDITIONAL_ATTRIBUTES, extra.render()));
        }

        CandidateRecord {
            identifier: row.identifier.trim().to_string(),
            manufacturer: row.manufacturer.trim().to_string(),
            name: first_of(row, NAME_COLUMNS).unwrap_or_default().to_string(),
            sku: derive_sku(&row.manufacturer, &row.identifier),
            description: first_of(row, DESCRIPTION_COLUMNS)
                .unwrap_or_default()
                .to_string(),
            attributes,
        }
    }

    fn is_consumed(&self, key: &str) -> bool {
        is_identity_alias(key)
            || self.mapped_columns.contains(key)
            || [NAME_COLUMNS, DESCRIPTION_COLUMNS, IMAGE_COLUMNS, DATASHEET_COLUMNS]
                .iter()
                .any(|cols| cols.contains(&key))
    }
}
