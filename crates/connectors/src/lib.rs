pub mod catalog;
pub mod file;
