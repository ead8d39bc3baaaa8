//! Error types for the vecbulk core library.
//!
//! Uses hierarchical domain-specific errors following the thiserror pattern.

use thiserror::Error;

/// Result type alias for vecbulk operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for vecbulk.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Collection schema is malformed
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// A row was rejected by the schema validator
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Sealing or committing a chunk failed
    #[error("Flush error: {0}")]
    Flush(#[from] FlushError),

    /// Staging upload failed
    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The writer has already been closed
    #[error("Writer is closed")]
    Closed,
}

/// Errors raised while building a collection schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    /// No field is marked as primary key
    #[error("Schema has no primary key field")]
    NoPrimaryKey,

    /// More than one field is marked as primary key
    #[error("Schema has multiple primary key fields: {0:?}")]
    MultiplePrimaryKeys(Vec<String>),

    /// Two fields share a name
    #[error("Duplicate field name: {0}")]
    DuplicateField(String),

    /// Primary key must be int64 or varchar
    #[error("Primary key {field} has unsupported type {data_type}")]
    InvalidPrimaryKeyType { field: String, data_type: String },

    /// Primary key cannot be nullable
    #[error("Primary key {0} cannot be nullable")]
    NullablePrimaryKey(String),

    /// A type parameter is required but absent
    #[error("Field {field} requires parameter {param}")]
    MissingParam { field: String, param: &'static str },

    /// Default value does not fit the declared type
    #[error("Invalid default value for {field}: {message}")]
    InvalidDefault { field: String, message: String },

    /// A function references a field that is not declared
    #[error("Function {function} references unknown field {field}")]
    UnknownFunctionField { function: String, field: String },

    /// Field name collides with a reserved name
    #[error("Field name {0} is reserved")]
    ReservedName(String),

    /// Binary vector dimension is not a whole number of bytes
    #[error("Binary vector {field} dimension {dim} must be a multiple of 8")]
    InvalidBinaryDim { field: String, dim: usize },
}

/// Per-row validation errors. Always reject the single offending row.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Field is not nullable, has no default and no value was supplied
    #[error("Field {field} is not nullable and has no default value, but no value was provided")]
    MissingValue { field: String },

    /// Auto-id primary key value was supplied by the caller
    #[error("Primary key {field} is auto-generated, no value should be provided")]
    AutoIdSupplied { field: String },

    /// Function output field was supplied by the caller
    #[error("Field {field} is a function output, no value should be provided")]
    FunctionOutputSupplied { field: String },

    /// Value has the wrong JSON type for the declared field type
    #[error("Field {field} expects {expected}, got {actual}")]
    TypeMismatch {
        field: String,
        expected: String,
        actual: String,
    },

    /// Numeric value does not fit the declared width
    #[error("Field {field} value {value} is out of range for {data_type}")]
    OutOfRange {
        field: String,
        data_type: String,
        value: String,
    },

    /// Vector length does not match the declared dimension
    #[error("Field {field} expects dimension {expected}, got {actual}")]
    DimensionMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },

    /// String is longer than max_length
    #[error("Field {field} length {actual} exceeds max_length {max}")]
    ExceedsMaxLength {
        field: String,
        max: usize,
        actual: usize,
    },

    /// Array has more elements than max_capacity
    #[error("Field {field} has {actual} elements, exceeding max_capacity {max}")]
    ExceedsCapacity {
        field: String,
        max: usize,
        actual: usize,
    },

    /// Sparse vector payload is malformed
    #[error("Field {field} is not a valid sparse vector: {message}")]
    InvalidSparse { field: String, message: String },

    /// The dynamic field payload is not a JSON object
    #[error("Dynamic field $meta must be a JSON object, got {actual}")]
    DynamicNotObject { actual: String },

    /// JSON payload could not be encoded
    #[error("Field {field} could not be encoded: {message}")]
    Encoding { field: String, message: String },
}

/// Chunk sealing and commit errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FlushError {
    /// Closing the chunk builder failed
    #[error("Sealing chunk {chunk} failed: {message}")]
    Seal { chunk: u64, message: String },

    /// The commit sink rejected a sealed chunk
    #[error("Committing chunk {chunk} failed: {message}")]
    Commit { chunk: u64, message: String },

    /// Opening the next chunk builder failed
    #[error("Opening chunk {chunk} failed: {message}")]
    Open { chunk: u64, message: String },

    /// The commit worker is no longer running
    #[error("Commit worker stopped")]
    WorkerStopped,
}

/// Upload session errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UploadError {
    /// Apply call to the stage control endpoint failed
    #[error("Stage apply failed: {0}")]
    Apply(String),

    /// Local payload exceeds the stage content length limit
    #[error("Total content length {total} exceeds stage limit {max}")]
    ContentLengthExceeded { total: u64, max: u64 },

    /// Local payload exceeds the stage file count limit
    #[error("File count {count} exceeds stage limit {max}")]
    FileCountExceeded { count: u64, max: u64 },

    /// Retryable storage or network failure for a single object
    #[error("Transient failure uploading {key}: {message}")]
    Transient { key: String, message: String },

    /// Every attempt for a single object failed
    #[error("Upload of {key} failed after {attempts} attempts: {message}")]
    Exhausted {
        key: String,
        attempts: u32,
        message: String,
    },

    /// Local file could not be read
    #[error("Local file {path}: {message}")]
    LocalFile { path: String, message: String },

    /// Object store client could not be built from the session credential
    #[error("Object store connection failed: {0}")]
    Connect(String),
}

impl UploadError {
    /// Whether a retry after refreshing the session may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Apply(_) | UploadError::Transient { .. } | UploadError::Connect(_)
        )
    }

    /// Whether the error is a stage quota violation.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            UploadError::ContentLengthExceeded { .. } | UploadError::FileCountExceeded { .. }
        )
    }
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}
