//! Typed field values produced by validation.

use super::types::DataType;
use crate::error::ValidationError;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// A single validated field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Json(Value),
    Array(Vec<FieldValue>),
    FloatVector(Vec<f32>),
    BinaryVector(Vec<u8>),
    Float16Vector(Vec<f32>),
    BFloat16Vector(Vec<f32>),
    Int8Vector(Vec<i8>),
    SparseFloatVector(BTreeMap<u32, f32>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    /// Render as JSON for textual chunk formats.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(i) => Value::from(*i),
            FieldValue::Float(f) => float_json(*f),
            FieldValue::String(s) => Value::String(s.clone()),
            FieldValue::Json(v) => v.clone(),
            FieldValue::Array(items) => Value::Array(items.iter().map(FieldValue::to_json).collect()),
            FieldValue::FloatVector(v)
            | FieldValue::Float16Vector(v)
            | FieldValue::BFloat16Vector(v) => {
                Value::Array(v.iter().map(|f| float_json(f64::from(*f))).collect())
            }
            FieldValue::BinaryVector(v) => Value::Array(v.iter().map(|b| Value::from(*b)).collect()),
            FieldValue::Int8Vector(v) => Value::Array(v.iter().map(|b| Value::from(*b)).collect()),
            FieldValue::SparseFloatVector(entries) => {
                let mut map = Map::with_capacity(entries.len());
                for (index, value) in entries {
                    map.insert(index.to_string(), float_json(f64::from(*value)));
                }
                Value::Object(map)
            }
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

fn float_json(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// A validated row in schema order, with its estimated byte size.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NormalizedRow {
    values: Vec<(String, FieldValue)>,
    size_bytes: usize,
}

impl NormalizedRow {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            values: Vec::with_capacity(capacity),
            size_bytes: 0,
        }
    }

    pub(crate) fn push(&mut self, name: impl Into<String>, value: FieldValue, size: usize) {
        self.values.push((name.into(), value));
        self.size_bytes += size;
    }

    /// Field values in schema order.
    pub fn values(&self) -> &[(String, FieldValue)] {
        &self.values
    }

    /// Look up a field value by name.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Estimated in-memory size used for flush decisions.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Render the row as a JSON object.
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.values.len());
        for (name, value) in &self.values {
            map.insert(name.clone(), value.to_json());
        }
        Value::Object(map)
    }
}

// Serializes as an object in schema order.
impl Serialize for NormalizedRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in &self.values {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Short JSON type name for error messages.
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

pub(crate) fn mismatch(field: &str, expected: impl ToString, value: &Value) -> ValidationError {
    ValidationError::TypeMismatch {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: json_type_name(value).to_string(),
    }
}

fn out_of_range(field: &str, data_type: DataType, value: impl ToString) -> ValidationError {
    ValidationError::OutOfRange {
        field: field.to_string(),
        data_type: data_type.to_string(),
        value: value.to_string(),
    }
}

fn integer_bounds(data_type: DataType) -> (i64, i64) {
    match data_type {
        DataType::Int8 => (i8::MIN.into(), i8::MAX.into()),
        DataType::Int16 => (i16::MIN.into(), i16::MAX.into()),
        DataType::Int32 => (i32::MIN.into(), i32::MAX.into()),
        _ => (i64::MIN, i64::MAX),
    }
}

/// Coerce a JSON value into a scalar or varchar field value.
///
/// Returns the typed value and its byte size. Only fixed-width scalars and
/// varchar are handled here; callers dispatch the other types.
pub fn coerce_scalar(
    field: &str,
    data_type: DataType,
    value: &Value,
    max_length: Option<usize>,
) -> Result<(FieldValue, usize), ValidationError> {
    match data_type {
        DataType::Bool => match value {
            Value::Bool(b) => Ok((FieldValue::Bool(*b), 1)),
            other => Err(mismatch(field, data_type, other)),
        },
        DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64 => {
            let Value::Number(n) = value else {
                return Err(mismatch(field, data_type, value));
            };
            let i = match n.as_i64() {
                Some(i) => i,
                None if n.is_u64() => return Err(out_of_range(field, data_type, n)),
                None => return Err(mismatch(field, data_type, value)),
            };
            let (min, max) = integer_bounds(data_type);
            if i < min || i > max {
                return Err(out_of_range(field, data_type, i));
            }
            let width = data_type.fixed_width().unwrap_or(8);
            Ok((FieldValue::Int(i), width))
        }
        DataType::Float | DataType::Double => {
            let f = value
                .as_f64()
                .ok_or_else(|| mismatch(field, data_type, value))?;
            if data_type == DataType::Float && f.is_finite() && f.abs() > f64::from(f32::MAX) {
                return Err(out_of_range(field, data_type, f));
            }
            let width = data_type.fixed_width().unwrap_or(8);
            Ok((FieldValue::Float(f), width))
        }
        DataType::VarChar => {
            let Value::String(s) = value else {
                return Err(mismatch(field, data_type, value));
            };
            if let Some(max) = max_length {
                if s.len() > max {
                    return Err(ValidationError::ExceedsMaxLength {
                        field: field.to_string(),
                        max,
                        actual: s.len(),
                    });
                }
            }
            Ok((FieldValue::String(s.clone()), s.len()))
        }
        other => Err(mismatch(field, other, value)),
    }
}
