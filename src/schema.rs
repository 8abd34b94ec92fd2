//! Form schema model
//!
//! A form is described by a JSON-Schema-like object:
//! `{"type": "object", "properties": {...}, "required": [...]}`.
//! Only the outer shape is validated here. Property subschemas and any other
//! top-level keywords (`title`, `additionalProperties`, ...) are passed to the
//! model untouched.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Field values collected for a form, keyed by field name
pub type FormValues = Map<String, Value>;

/// Errors raised while building a schema
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Invalid schema JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Failed to read schema file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Schema type must be \"object\", got {0:?}")]
    NotAnObject(String),
    #[error("Schema must register at least one field")]
    NoFields,
    #[error("Required field {0:?} is not declared in properties")]
    UnknownRequired(String),
    #[error("Required field {0:?} is listed more than once")]
    DuplicateRequired(String),
}

/// Validated form schema. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawSchema", into = "RawSchema")]
pub struct FormSchema {
    properties: Map<String, Value>,
    required: Vec<String>,
    /// Top-level keywords other than `type`, `properties` and `required`
    extra: Map<String, Value>,
}

#[derive(Serialize, Deserialize)]
struct RawSchema {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    required: Vec<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<RawSchema> for FormSchema {
    type Error = SchemaError;

    fn try_from(raw: RawSchema) -> Result<Self, Self::Error> {
        if raw.kind != "object" {
            return Err(SchemaError::NotAnObject(raw.kind));
        }
        let mut schema = FormSchema::new(raw.properties, raw.required)?;
        schema.extra = raw.extra;
        Ok(schema)
    }
}

impl From<FormSchema> for RawSchema {
    fn from(schema: FormSchema) -> Self {
        RawSchema {
            kind: "object".to_string(),
            properties: schema.properties,
            required: schema.required,
            extra: schema.extra,
        }
    }
}

impl FormSchema {
    /// Build a schema from its properties and ordered required names.
    ///
    /// # Errors
    /// Fails when there are no properties, or when a required name is unknown
    /// or repeated.
    pub fn new(properties: Map<String, Value>, required: Vec<String>) -> Result<Self, SchemaError> {
        if properties.is_empty() {
            return Err(SchemaError::NoFields);
        }
        let mut seen = HashSet::new();
        for name in &required {
            if !properties.contains_key(name) {
                return Err(SchemaError::UnknownRequired(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(SchemaError::DuplicateRequired(name.clone()));
            }
        }
        Ok(Self {
            properties,
            required,
            extra: Map::new(),
        })
    }

    /// # Errors
    /// Fails when the value does not have the schema shape.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        Ok(serde_json::from_value(value)?)
    }

    /// # Errors
    /// Fails on invalid JSON or an invalid schema shape.
    pub fn from_json_str(text: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(text)?)
    }

    /// # Errors
    /// Fails when the file cannot be read or does not hold a valid schema.
    pub fn from_path(path: &Path) -> Result<Self, SchemaError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Contact form used when no schema is configured
    pub fn contact_form() -> Self {
        let properties = [
            ("email", json!({ "type": "string", "format": "email" })),
            ("country", json!({ "type": "string" })),
            ("firstName", json!({ "type": "string" })),
            ("lastName", json!({ "type": "string" })),
        ]
        .into_iter()
        .map(|(name, subschema)| (name.to_string(), subschema))
        .collect();
        Self {
            properties,
            required: vec!["email".to_string()],
            extra: Map::new(),
        }
    }

    pub fn properties(&self) -> &Map<String, Value> {
        &self.properties
    }

    pub fn required(&self) -> &[String] {
        &self.required
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Required fields that are absent or `null` in `values`, in schema order
    pub fn missing_required<'a>(&'a self, values: &FormValues) -> Vec<&'a str> {
        self.required
            .iter()
            .filter(|name| values.get(name.as_str()).map_or(true, Value::is_null))
            .map(String::as_str)
            .collect()
    }

    /// The schema as a JSON value, used as function parameters
    pub fn to_value(&self) -> Value {
        let mut object = self.extra.clone();
        object.insert("type".to_string(), json!("object"));
        object.insert("properties".to_string(), Value::Object(self.properties.clone()));
        object.insert("required".to_string(), json!(self.required));
        Value::Object(object)
    }
}
