pub mod adapter;
pub mod error;
pub mod metadata;
pub mod normalize;
pub mod settings;
pub mod source;
