use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::registry::SchemaRegistry;

/// The only descriptor version this build understands.
pub const DESCRIPTOR_VERSION: u32 = 1;

// The primitive result types a caller can ask for by keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimitiveKind {
    String,
    Integer,
    Float,
    Boolean,
}

impl PrimitiveKind {
    /// Maps a `response_format` keyword (`str`, `int`, `float`, `bool`) to its kind.
    pub fn from_keyword(token: &str) -> Option<Self> {
        match token {
            "str" => Some(Self::String),
            "int" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "bool" => Some(Self::Boolean),
            _ => None,
        }
    }

    pub fn json_schema(self) -> Value {
        let ty = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "number",
            Self::Boolean => "boolean",
        };
        json!({ "type": ty })
    }

    /// Whether `value` is an instance of this kind. Integers count as floats.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::Boolean => value.is_boolean(),
        }
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
        };
        f.write_str(name)
    }
}

/// A named JSON Schema describing a composite result.
///
/// Handles are built once (per request, or once at registry load) and only
/// ever shared behind an `Arc`, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaHandle {
    name: String,
    schema: Value,
}

impl SchemaHandle {
    pub fn new(name: impl Into<String>, schema: Value) -> Result<Self, ShapeError> {
        let name = name.into();
        if !schema.is_object() {
            return Err(ShapeError::InvalidSchema(name));
        }
        Ok(Self { name, schema })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }
}

/// The concrete result type a single invocation is asked to produce.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputShape {
    Primitive(PrimitiveKind),
    Custom(Arc<SchemaHandle>),
}

impl Default for OutputShape {
    fn default() -> Self {
        Self::Primitive(PrimitiveKind::String)
    }
}

impl OutputShape {
    pub fn name(&self) -> String {
        match self {
            Self::Primitive(kind) => kind.to_string(),
            Self::Custom(handle) => handle.name().to_string(),
        }
    }

    pub fn json_schema(&self) -> Value {
        match self {
            Self::Primitive(kind) => kind.json_schema(),
            Self::Custom(handle) => handle.schema().clone(),
        }
    }

    /// Checks a produced value against the shape. Custom schemas reach the
    /// provider as a non-strict hint and are not re-validated here, so any
    /// value is accepted for them.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Primitive(kind) => kind.accepts(value),
            Self::Custom(_) => true,
        }
    }
}

impl fmt::Display for OutputShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(kind) => write!(f, "{kind}"),
            Self::Custom(handle) => write!(f, "schema '{}'", handle.name()),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ShapeError {
    #[error("unknown registered schema '{0}'")]
    UnknownSchema(String),

    #[error("schema '{0}' must be a JSON object")]
    InvalidSchema(String),

    #[error("token is neither a primitive keyword nor a valid descriptor ({0})")]
    Undecodable(String),
}

/// Wire form of a caller-supplied shape: `{"version": 1, "shape": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeDescriptor {
    pub version: u32,
    pub shape: ShapeSpec,
}

impl ShapeDescriptor {
    pub fn new(shape: ShapeSpec) -> Self {
        Self {
            version: DESCRIPTOR_VERSION,
            shape,
        }
    }
}

/// Closed set of shapes a descriptor can name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShapeSpec {
    String,
    Integer,
    Float,
    Boolean,
    List {
        items: Box<ShapeSpec>,
    },
    Object {
        name: String,
        fields: BTreeMap<String, ShapeSpec>,
    },
    JsonSchema {
        name: String,
        schema: Value,
    },
    Registered {
        id: String,
    },
}

impl ShapeSpec {
    fn primitive(&self) -> Option<PrimitiveKind> {
        match self {
            Self::String => Some(PrimitiveKind::String),
            Self::Integer => Some(PrimitiveKind::Integer),
            Self::Float => Some(PrimitiveKind::Float),
            Self::Boolean => Some(PrimitiveKind::Boolean),
            _ => None,
        }
    }

    /// Resolves the spec into a shape, looking up registered ids in `registry`.
    pub fn into_shape(self, registry: &SchemaRegistry) -> Result<OutputShape, ShapeError> {
        if let Some(kind) = self.primitive() {
            return Ok(OutputShape::Primitive(kind));
        }
        let handle = match self {
            Self::Registered { id } => registry.get(&id).ok_or(ShapeError::UnknownSchema(id))?,
            Self::JsonSchema { name, schema } => Arc::new(SchemaHandle::new(name, schema)?),
            composite => {
                let schema = composite.to_schema(registry)?;
                Arc::new(SchemaHandle::new(composite.title(), schema)?)
            }
        };
        Ok(OutputShape::Custom(handle))
    }

    fn title(&self) -> String {
        match self {
            Self::Object { name, .. } | Self::JsonSchema { name, .. } => name.clone(),
            Self::Registered { id } => id.clone(),
            Self::List { .. } => String::from("list"),
            _ => self.primitive().map(|kind| kind.to_string()).unwrap_or_default(),
        }
    }

    fn to_schema(&self, registry: &SchemaRegistry) -> Result<Value, ShapeError> {
        if let Some(kind) = self.primitive() {
            return Ok(kind.json_schema());
        }
        match self {
            Self::List { items } => Ok(json!({ "type": "array", "items": items.to_schema(registry)? })),
            Self::Object { name, fields } => {
                let mut properties = serde_json::Map::new();
                for (field, spec) in fields {
                    properties.insert(field.clone(), spec.to_schema(registry)?);
                }
                let required: Vec<&String> = fields.keys().collect();
                Ok(json!({
                    "type": "object",
                    "title": name,
                    "properties": properties,
                    "required": required,
                    "additionalProperties": false,
                }))
            }
            Self::JsonSchema { name, schema } => {
                if schema.is_object() {
                    Ok(schema.clone())
                } else {
                    Err(ShapeError::InvalidSchema(name.clone()))
                }
            }
            Self::Registered { id } => registry
                .get(id)
                .map(|handle| handle.schema().clone())
                .ok_or_else(|| ShapeError::UnknownSchema(id.clone())),
            _ => Ok(Value::Null),
        }
    }
}
