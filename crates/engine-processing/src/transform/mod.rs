pub mod attributes;
pub mod candidate;
pub mod diff;
pub mod provenance;
pub mod text;
