//! Collection schema: field declarations and schema-level invariants.

use super::value::coerce_scalar;
use crate::error::SchemaError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

/// Reserved field that absorbs undeclared keys when dynamic fields are enabled.
pub const DYNAMIC_FIELD_NAME: &str = "$meta";

/// Logical data type of a collection field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    #[serde(rename = "varchar")]
    VarChar,
    Json,
    Array,
    FloatVector,
    BinaryVector,
    Float16Vector,
    #[serde(rename = "bfloat16_vector")]
    BFloat16Vector,
    Int8Vector,
    SparseFloatVector,
}

impl DataType {
    /// Byte width of fixed-size scalar types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            DataType::Bool | DataType::Int8 => Some(1),
            DataType::Int16 => Some(2),
            DataType::Int32 | DataType::Float => Some(4),
            DataType::Int64 | DataType::Double => Some(8),
            _ => None,
        }
    }

    /// Whether this is one of the vector types.
    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            DataType::FloatVector
                | DataType::BinaryVector
                | DataType::Float16Vector
                | DataType::BFloat16Vector
                | DataType::Int8Vector
                | DataType::SparseFloatVector
        )
    }

    /// Whether the type needs a `dim` parameter.
    pub fn requires_dim(&self) -> bool {
        self.is_vector() && *self != DataType::SparseFloatVector
    }

    /// Whether a value of this type can be used as an array element.
    pub fn is_array_element(&self) -> bool {
        self.fixed_width().is_some() || *self == DataType::VarChar
    }

    /// Whether a default value may be declared for this type.
    pub fn supports_default(&self) -> bool {
        self.fixed_width().is_some() || *self == DataType::VarChar
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::VarChar => "varchar",
            DataType::Json => "json",
            DataType::Array => "array",
            DataType::FloatVector => "float_vector",
            DataType::BinaryVector => "binary_vector",
            DataType::Float16Vector => "float16_vector",
            DataType::BFloat16Vector => "bfloat16_vector",
            DataType::Int8Vector => "int8_vector",
            DataType::SparseFloatVector => "sparse_float_vector",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declaration of a single collection field.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldSpec {
    /// Field name
    pub name: String,

    /// Logical data type
    pub data_type: DataType,

    /// Whether this is the primary key
    #[serde(default)]
    pub is_primary_key: bool,

    /// Primary key values are assigned by the server
    #[serde(default)]
    pub auto_id: bool,

    /// Field may hold null
    #[serde(default)]
    pub nullable: bool,

    /// Value substituted when the row omits this field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,

    /// Element type for array fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_type: Option<DataType>,

    /// Maximum element count for array fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_capacity: Option<usize>,

    /// Maximum byte length for varchar fields and varchar array elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,

    /// Dimension for dense vector fields
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dim: Option<usize>,
}

impl FieldSpec {
    /// Create a field with no type parameters.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            is_primary_key: false,
            auto_id: false,
            nullable: false,
            default_value: None,
            element_type: None,
            max_capacity: None,
            max_length: None,
            dim: None,
        }
    }

    /// Mark as primary key.
    pub fn primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    /// Let the server assign primary key values.
    pub fn with_auto_id(mut self) -> Self {
        self.auto_id = true;
        self
    }

    /// Allow null values.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Set the default value.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    /// Set the vector dimension.
    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = Some(dim);
        self
    }

    /// Set the varchar max length.
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    /// Set the array element type and capacity.
    pub fn with_elements(mut self, element_type: DataType, max_capacity: usize) -> Self {
        self.element_type = Some(element_type);
        self.max_capacity = Some(max_capacity);
        self
    }

    fn check(&self) -> Result<(), SchemaError> {
        if self.name == DYNAMIC_FIELD_NAME {
            return Err(SchemaError::ReservedName(self.name.clone()));
        }

        if self.data_type.requires_dim() && self.dim.unwrap_or(0) == 0 {
            return Err(self.missing("dim"));
        }

        if self.data_type == DataType::BinaryVector {
            let dim = self.dim.unwrap_or(0);
            if dim % 8 != 0 {
                return Err(SchemaError::InvalidBinaryDim {
                    field: self.name.clone(),
                    dim,
                });
            }
        }

        if self.data_type == DataType::VarChar && self.max_length.is_none() {
            return Err(self.missing("max_length"));
        }

        if self.data_type == DataType::Array {
            let element = self.element_type.ok_or_else(|| self.missing("element_type"))?;
            if !element.is_array_element() {
                return Err(SchemaError::InvalidDefault {
                    field: self.name.clone(),
                    message: format!("{} cannot be an array element", element),
                });
            }
            if self.max_capacity.is_none() {
                return Err(self.missing("max_capacity"));
            }
            if element == DataType::VarChar && self.max_length.is_none() {
                return Err(self.missing("max_length"));
            }
        }

        if let Some(default) = &self.default_value {
            if !self.data_type.supports_default() {
                return Err(SchemaError::InvalidDefault {
                    field: self.name.clone(),
                    message: format!("{} fields cannot declare a default", self.data_type),
                });
            }
            coerce_scalar(&self.name, self.data_type, default, self.max_length).map_err(|e| {
                SchemaError::InvalidDefault {
                    field: self.name.clone(),
                    message: e.to_string(),
                }
            })?;
        }

        Ok(())
    }

    fn missing(&self, param: &'static str) -> SchemaError {
        SchemaError::MissingParam {
            field: self.name.clone(),
            param,
        }
    }
}

/// A server-side function whose outputs are computed, never supplied by callers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FunctionSpec {
    /// Function name
    pub name: String,

    /// Fields the function reads
    #[serde(default)]
    pub input_fields: Vec<String>,

    /// Fields the function produces
    pub output_fields: Vec<String>,
}

/// Validated, immutable collection schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSchema {
    fields: Vec<FieldSpec>,
    enable_dynamic_field: bool,
    functions: Vec<FunctionSpec>,
    function_outputs: HashSet<String>,
    primary_key: usize,
}

impl CollectionSchema {
    /// Build a schema, checking every schema-level invariant.
    pub fn new(
        fields: Vec<FieldSpec>,
        enable_dynamic_field: bool,
        functions: Vec<FunctionSpec>,
    ) -> Result<Self, SchemaError> {
        let mut names = HashSet::new();
        for field in &fields {
            if !names.insert(field.name.as_str()) {
                return Err(SchemaError::DuplicateField(field.name.clone()));
            }
            field.check()?;
        }

        let primary: Vec<usize> = fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.is_primary_key)
            .map(|(i, _)| i)
            .collect();
        let primary_key = match primary.as_slice() {
            [] => return Err(SchemaError::NoPrimaryKey),
            [index] => *index,
            many => {
                return Err(SchemaError::MultiplePrimaryKeys(
                    many.iter().map(|&i| fields[i].name.clone()).collect(),
                ))
            }
        };

        let pk = &fields[primary_key];
        if !matches!(pk.data_type, DataType::Int64 | DataType::VarChar) {
            return Err(SchemaError::InvalidPrimaryKeyType {
                field: pk.name.clone(),
                data_type: pk.data_type.to_string(),
            });
        }
        if pk.nullable {
            return Err(SchemaError::NullablePrimaryKey(pk.name.clone()));
        }

        let mut function_outputs = HashSet::new();
        for function in &functions {
            for name in function.input_fields.iter().chain(&function.output_fields) {
                if !names.contains(name.as_str()) {
                    return Err(SchemaError::UnknownFunctionField {
                        function: function.name.clone(),
                        field: name.clone(),
                    });
                }
            }
            function_outputs.extend(function.output_fields.iter().cloned());
        }

        Ok(Self {
            fields,
            enable_dynamic_field,
            functions,
            function_outputs,
            primary_key,
        })
    }

    /// Start a schema builder.
    pub fn builder() -> CollectionSchemaBuilder {
        CollectionSchemaBuilder::default()
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Look up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The primary key field.
    pub fn primary_key(&self) -> &FieldSpec {
        &self.fields[self.primary_key]
    }

    pub fn enable_dynamic_field(&self) -> bool {
        self.enable_dynamic_field
    }

    pub fn functions(&self) -> &[FunctionSpec] {
        &self.functions
    }

    /// Whether the field is computed by a server-side function.
    pub fn is_function_output(&self, name: &str) -> bool {
        self.function_outputs.contains(name)
    }
}

/// Builder for [`CollectionSchema`].
#[derive(Debug, Default)]
pub struct CollectionSchemaBuilder {
    fields: Vec<FieldSpec>,
    enable_dynamic_field: bool,
    functions: Vec<FunctionSpec>,
}

impl CollectionSchemaBuilder {
    /// Append a field.
    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    /// Enable the `$meta` dynamic field.
    pub fn enable_dynamic_field(mut self, enabled: bool) -> Self {
        self.enable_dynamic_field = enabled;
        self
    }

    /// Declare a server-side function.
    pub fn function(mut self, function: FunctionSpec) -> Self {
        self.functions.push(function);
        self
    }

    pub fn build(self) -> Result<CollectionSchema, SchemaError> {
        CollectionSchema::new(self.fields, self.enable_dynamic_field, self.functions)
    }
}
