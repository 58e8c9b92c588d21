pub mod config;
pub mod lookup;
pub mod processor;
pub mod status;
