use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Top-level writable fields; every other key addresses the attribute list.
pub const NAME: &str = "name";
pub const SKU: &str = "sku";
pub const DESCRIPTION: &str = "description";

pub fn is_top_level(key: &str) -> bool {
    matches!(key, NAME | SKU | DESCRIPTION)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(pub u64);

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Attribute {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Read access to writable fields by key, shared by current and candidate records.
pub trait FieldSource {
    fn field(&self, key: &str) -> Option<&str>;
}

fn attribute_value<'a>(attributes: &'a [Attribute], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .find(|a| a.key == key)
        .map(|a| a.value.as_str())
}

/// Snapshot of the remote record, fetched fresh for each row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentRecord {
    pub id: RemoteId,
    pub identifier: String,
    #[serde(default)]
    pub manufacturer: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: Vec<Attribute>,
}

impl FieldSource for CurrentRecord {
    fn field(&self, key: &str) -> Option<&str> {
        match key {
            NAME => Some(&self.name),
            SKU => Some(&self.sku),
            DESCRIPTION => Some(&self.description),
            other => attribute_value(&self.attributes, other),
        }
    }
}

impl CurrentRecord {
    /// Applies a patch in place, the way the remote API would.
    pub fn apply(&mut self, payload: &UpdatePayload) {
        for (key, value) in &payload.fields {
            match key.as_str() {
                NAME => self.name = value.clone(),
                SKU => self.sku = value.clone(),
                DESCRIPTION => self.description = value.clone(),
                _ => {}
            }
        }
        for attr in &payload.attributes {
            match self.attributes.iter_mut().find(|a| a.key == attr.key) {
                Some(existing) => existing.value = attr.value.clone(),
                None => self.attributes.push(attr.clone()),
            }
        }
    }
}

/// The record proposed by one CSV row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    pub identifier: String,
    pub manufacturer: String,
    pub name: String,
    pub sku: String,
    pub description: String,
    pub attributes: Vec<Attribute>,
}

impl FieldSource for CandidateRecord {
    fn field(&self, key: &str) -> Option<&str> {
        match key {
            NAME => Some(&self.name),
            SKU => Some(&self.sku),
            DESCRIPTION => Some(&self.description),
            other => attribute_value(&self.attributes, other),
        }
    }
}

/// Minimal patch: only the fields that must change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub id: RemoteId,
    pub identifier: String,
    pub fields: BTreeMap<String, String>,
    pub attributes: Vec<Attribute>,
}

impl UpdatePayload {
    pub fn new(id: RemoteId, identifier: impl Into<String>) -> Self {
        UpdatePayload {
            id,
            identifier: identifier.into(),
            fields: BTreeMap::new(),
            attributes: Vec::new(),
        }
    }

    /// Routes a changed key to the top-level map or the attribute list.
    pub fn set(&mut self, key: &str, value: String) {
        if is_top_level(key) {
            self.fields.insert(key.to_string(), value);
        } else {
            self.attributes.push(Attribute::new(key, value));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.attributes.is_empty()
    }
}
