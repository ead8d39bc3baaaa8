//! Collection schema and row validation.

mod types;
mod validator;
mod value;

pub use types::{
    CollectionSchema, CollectionSchemaBuilder, DataType, FieldSpec, FunctionSpec,
    DYNAMIC_FIELD_NAME,
};
pub use validator::{validate_row, SchemaValidator};
pub use value::{json_type_name, FieldValue, NormalizedRow};

/// Input row: a JSON object keyed by field name.
pub type Row = serde_json::Map<String, serde_json::Value>;
