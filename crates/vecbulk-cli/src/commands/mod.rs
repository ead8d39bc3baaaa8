//! CLI command implementations.

pub mod upload;
pub mod validate;
pub mod write;
