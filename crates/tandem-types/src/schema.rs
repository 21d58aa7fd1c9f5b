//! Declarative object schemas for step inputs and outputs.
//!
//! Every step names the exact state keys it reads and writes, each with a
//! JSON kind. The engine uses the input schema to *project* the relevant
//! slice of the state bag, validates it, and validates the step's output
//! before merging it back. The schema model is deliberately flat: named
//! top-level keys with primitive/array/object kinds, no nesting rules.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The JSON kind a schema field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Bool,
    Array,
    Object,
    /// Accepts any JSON value (used by pass-through steps like `echo`).
    Any,
}

impl FieldKind {
    /// Whether `value` is of this kind. `Number` accepts integers too;
    /// `Integer` requires a whole number.
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
            FieldKind::Any => true,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Bool => "bool",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
            FieldKind::Any => "any",
        }
    }
}

/// A single named field in an object schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Field {
    pub key: String,
    pub kind: FieldKind,
    /// Optional fields may be absent; present values are still kind-checked.
    pub required: bool,
}

/// A flat object schema: the exact keys a step reads or writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectSchema {
    pub fields: Vec<Field>,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a required field.
    pub fn field(mut self, key: &str, kind: FieldKind) -> Self {
        self.fields.push(Field {
            key: key.to_string(),
            kind,
            required: true,
        });
        self
    }

    /// Add an optional field.
    pub fn optional(mut self, key: &str, kind: FieldKind) -> Self {
        self.fields.push(Field {
            key: key.to_string(),
            kind,
            required: false,
        });
        self
    }

    /// Validate `value` against this schema: it must be a JSON object, every
    /// required key must be present, and every present declared key must
    /// match its kind. Undeclared keys are ignored.
    pub fn validate(&self, value: &serde_json::Value) -> Result<(), SchemaError> {
        let obj = value.as_object().ok_or(SchemaError::NotAnObject)?;
        for field in &self.fields {
            match obj.get(&field.key) {
                Some(v) if v.is_null() && !field.required => {}
                Some(v) => {
                    if !field.kind.matches(v) {
                        return Err(SchemaError::WrongKind {
                            key: field.key.clone(),
                            expected: field.kind.name(),
                        });
                    }
                }
                None if field.required => {
                    return Err(SchemaError::MissingKey {
                        key: field.key.clone(),
                    });
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Project the declared keys out of `state`, dropping everything else.
    /// Missing optional keys are simply absent from the projection.
    pub fn project(&self, state: &serde_json::Map<String, serde_json::Value>) -> serde_json::Value {
        let mut out = serde_json::Map::new();
        for field in &self.fields {
            if let Some(v) = state.get(&field.key) {
                out.insert(field.key.clone(), v.clone());
            }
        }
        serde_json::Value::Object(out)
    }
}

/// Schema validation failure.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("value is not a JSON object")]
    NotAnObject,

    #[error("missing required key '{key}'")]
    MissingKey { key: String },

    #[error("key '{key}' is not a {expected}")]
    WrongKind { key: String, expected: &'static str },
}
