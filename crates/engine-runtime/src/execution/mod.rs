pub mod context;
pub mod executor;
pub mod source;
pub mod workers;
