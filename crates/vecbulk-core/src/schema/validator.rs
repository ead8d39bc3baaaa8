//! Row validation against a collection schema.
//!
//! Validation is pure: a row either normalizes into a [`NormalizedRow`] with a
//! byte-size estimate, or fails with a [`ValidationError`] naming the first
//! offending field.

use super::types::{CollectionSchema, DataType, FieldSpec, DYNAMIC_FIELD_NAME};
use super::value::{coerce_scalar, mismatch, FieldValue, NormalizedRow};
use super::Row;
use crate::chunk::VectorEncoding;
use crate::error::ValidationError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Bytes accounted per non-zero sparse entry (u32 index + f32 value + offset).
const SPARSE_ENTRY_BYTES: usize = 12;

/// Validates rows for one writer.
#[derive(Debug, Clone)]
pub struct SchemaValidator {
    schema: Arc<CollectionSchema>,
    encoding: VectorEncoding,
}

impl SchemaValidator {
    pub fn new(schema: Arc<CollectionSchema>, encoding: VectorEncoding) -> Self {
        Self { schema, encoding }
    }

    pub fn schema(&self) -> &Arc<CollectionSchema> {
        &self.schema
    }

    pub fn encoding(&self) -> VectorEncoding {
        self.encoding
    }

    /// Validate and normalize one row.
    pub fn validate(&self, row: &Row) -> Result<NormalizedRow, ValidationError> {
        validate_row(&self.schema, row, self.encoding)
    }
}

/// Validate `row` against `schema`, sizing half-precision vectors for `encoding`.
pub fn validate_row(
    schema: &CollectionSchema,
    row: &Row,
    encoding: VectorEncoding,
) -> Result<NormalizedRow, ValidationError> {
    let mut normalized = NormalizedRow::with_capacity(schema.fields().len() + 1);

    for field in schema.fields() {
        // Explicit null is treated the same as an omitted key.
        let supplied = row.get(&field.name).filter(|v| !v.is_null());

        if field.is_primary_key && field.auto_id {
            if supplied.is_some() {
                return Err(ValidationError::AutoIdSupplied {
                    field: field.name.clone(),
                });
            }
            continue;
        }

        if schema.is_function_output(&field.name) {
            if supplied.is_some() {
                return Err(ValidationError::FunctionOutputSupplied {
                    field: field.name.clone(),
                });
            }
            continue;
        }

        let value = match (supplied, &field.default_value) {
            (Some(value), _) => value,
            (None, Some(default)) => default,
            (None, None) if field.nullable => {
                normalized.push(field.name.as_str(), FieldValue::Null, 0);
                continue;
            }
            (None, None) => {
                return Err(ValidationError::MissingValue {
                    field: field.name.clone(),
                })
            }
        };

        let (value, size) = coerce_field(field, value, encoding)?;
        normalized.push(field.name.as_str(), value, size);
    }

    if schema.enable_dynamic_field() {
        let meta = collect_dynamic(schema, row)?;
        let encoded = serde_json::to_string(&meta).map_err(|e| ValidationError::Encoding {
            field: DYNAMIC_FIELD_NAME.to_string(),
            message: e.to_string(),
        })?;
        normalized.push(DYNAMIC_FIELD_NAME, FieldValue::Json(Value::Object(meta)), encoded.len());
    } else {
        for key in row.keys() {
            if schema.field(key).is_none() {
                debug!(field = %key, "Ignoring undeclared field, dynamic fields disabled");
            }
        }
    }

    Ok(normalized)
}

fn collect_dynamic(schema: &CollectionSchema, row: &Row) -> Result<Map<String, Value>, ValidationError> {
    let mut meta = match row.get(DYNAMIC_FIELD_NAME) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(supplied)) => supplied.clone(),
        Some(other) => {
            return Err(ValidationError::DynamicNotObject {
                actual: super::value::json_type_name(other).to_string(),
            })
        }
    };

    for (key, value) in row {
        if key == DYNAMIC_FIELD_NAME || schema.field(key).is_some() {
            continue;
        }
        meta.insert(key.clone(), value.clone());
    }

    Ok(meta)
}

fn coerce_field(
    field: &FieldSpec,
    value: &Value,
    encoding: VectorEncoding,
) -> Result<(FieldValue, usize), ValidationError> {
    let dim = field.dim.unwrap_or(0);
    match field.data_type {
        DataType::Json => coerce_json(&field.name, value),
        DataType::Array => coerce_array(field, value),
        DataType::FloatVector => {
            let v = float_list(field, value, dim)?;
            Ok((FieldValue::FloatVector(v), 4 * dim))
        }
        DataType::Float16Vector | DataType::BFloat16Vector => {
            let v = float_list(field, value, dim)?;
            let per_dim = match encoding {
                VectorEncoding::Binary => 2,
                VectorEncoding::Textual => 4,
            };
            let value = if field.data_type == DataType::Float16Vector {
                FieldValue::Float16Vector(v)
            } else {
                FieldValue::BFloat16Vector(v)
            };
            Ok((value, per_dim * dim))
        }
        DataType::BinaryVector => {
            let bytes = integer_list::<u8>(field, value, dim / 8)?;
            let size = bytes.len();
            Ok((FieldValue::BinaryVector(bytes), size))
        }
        DataType::Int8Vector => {
            let v = integer_list::<i8>(field, value, dim)?;
            Ok((FieldValue::Int8Vector(v), dim))
        }
        DataType::SparseFloatVector => {
            let entries = sparse_entries(&field.name, value)?;
            let size = SPARSE_ENTRY_BYTES * entries.len();
            Ok((FieldValue::SparseFloatVector(entries), size))
        }
        scalar => coerce_scalar(&field.name, scalar, value, field.max_length),
    }
}

fn coerce_json(field: &str, value: &Value) -> Result<(FieldValue, usize), ValidationError> {
    let encoding_error = |e: serde_json::Error| ValidationError::Encoding {
        field: field.to_string(),
        message: e.to_string(),
    };

    match value {
        // Strings carry pre-encoded JSON documents.
        Value::String(s) => {
            let parsed: Value = serde_json::from_str(s).map_err(encoding_error)?;
            Ok((FieldValue::Json(parsed), s.len()))
        }
        other => {
            let encoded = serde_json::to_string(other).map_err(encoding_error)?;
            Ok((FieldValue::Json(other.clone()), encoded.len()))
        }
    }
}

fn coerce_array(field: &FieldSpec, value: &Value) -> Result<(FieldValue, usize), ValidationError> {
    let Value::Array(items) = value else {
        return Err(mismatch(&field.name, DataType::Array, value));
    };

    let max = field.max_capacity.unwrap_or(usize::MAX);
    if items.len() > max {
        return Err(ValidationError::ExceedsCapacity {
            field: field.name.clone(),
            max,
            actual: items.len(),
        });
    }

    let element_type = field
        .element_type
        .ok_or_else(|| mismatch(&field.name, DataType::Array, value))?;

    let mut elements = Vec::with_capacity(items.len());
    let mut size = 0;
    for item in items {
        let (element, element_size) =
            coerce_scalar(&field.name, element_type, item, field.max_length)?;
        elements.push(element);
        size += element_size;
    }

    Ok((FieldValue::Array(elements), size))
}

fn check_dim(field: &FieldSpec, expected: usize, actual: usize) -> Result<(), ValidationError> {
    if expected != actual {
        return Err(ValidationError::DimensionMismatch {
            field: field.name.clone(),
            expected,
            actual,
        });
    }
    Ok(())
}

fn float_list(field: &FieldSpec, value: &Value, dim: usize) -> Result<Vec<f32>, ValidationError> {
    let Value::Array(items) = value else {
        return Err(mismatch(&field.name, field.data_type, value));
    };
    check_dim(field, dim, items.len())?;

    items
        .iter()
        .map(|item| {
            item.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| mismatch(&field.name, "float element", item))
        })
        .collect()
}

fn integer_list<T>(field: &FieldSpec, value: &Value, len: usize) -> Result<Vec<T>, ValidationError>
where
    T: TryFrom<i64>,
{
    let Value::Array(items) = value else {
        return Err(mismatch(&field.name, field.data_type, value));
    };
    check_dim(field, len, items.len())?;

    items
        .iter()
        .map(|item| {
            let i = item
                .as_i64()
                .ok_or_else(|| mismatch(&field.name, "integer element", item))?;
            T::try_from(i).map_err(|_| ValidationError::OutOfRange {
                field: field.name.clone(),
                data_type: field.data_type.to_string(),
                value: i.to_string(),
            })
        })
        .collect()
}

fn sparse_entries(field: &str, value: &Value) -> Result<BTreeMap<u32, f32>, ValidationError> {
    let invalid = |message: String| ValidationError::InvalidSparse {
        field: field.to_string(),
        message,
    };

    let Value::Object(map) = value else {
        return Err(mismatch(field, DataType::SparseFloatVector, value));
    };

    let parse_value = |v: &Value| {
        v.as_f64()
            .map(|f| f as f32)
            .ok_or_else(|| invalid(format!("value {} is not a number", v)))
    };

    let mut entries = BTreeMap::new();

    if map.len() == 2 && map.contains_key("indices") && map.contains_key("values") {
        let (Some(indices), Some(values)) = (
            map.get("indices").and_then(Value::as_array),
            map.get("values").and_then(Value::as_array),
        ) else {
            return Err(invalid("indices and values must be arrays".into()));
        };
        if indices.len() != values.len() {
            return Err(invalid(format!(
                "{} indices but {} values",
                indices.len(),
                values.len()
            )));
        }
        for (index, value) in indices.iter().zip(values) {
            let index = index
                .as_u64()
                .and_then(|i| u32::try_from(i).ok())
                .ok_or_else(|| invalid(format!("index {} is not a u32", index)))?;
            if entries.insert(index, parse_value(value)?).is_some() {
                return Err(invalid(format!("duplicate index {}", index)));
            }
        }
        return Ok(entries);
    }

    for (key, value) in map {
        let index: u32 = key
            .parse()
            .map_err(|_| invalid(format!("index {} is not a u32", key)))?;
        entries.insert(index, parse_value(value)?);
    }
    Ok(entries)
}
