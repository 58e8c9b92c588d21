pub mod catalog;
pub mod execution;
pub mod records;
