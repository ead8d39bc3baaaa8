//! vecbulk core - schema-validated bulk writer for vector database collections
//!
//! This library turns rows of JSON into sealed chunk files ready for a
//! vector database bulk import:
//!
//! - Per-row validation against a collection schema, with defaults and
//!   dynamic fields
//! - Size-bounded chunk files committed in creation order, one at a time
//! - Staged uploads to object storage with credential refresh and retries

pub mod buffer;
pub mod chunk;
pub mod config;
pub mod error;
pub mod metrics;
pub mod schema;
pub mod upload;
pub mod writer;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
pub use error::{FlushError, SchemaError, UploadError, ValidationError};
pub use schema::{CollectionSchema, FieldSpec, Row};
pub use writer::{BulkWriter, CommitMode};
