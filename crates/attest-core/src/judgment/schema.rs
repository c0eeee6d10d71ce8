//! JSON Schema validation for judgment responses.
//!
//! The built-in schema is compiled once and shared. Organizations may supply
//! their own schema; it is compiled per evaluation and must still require
//! the fields the pipeline reads.

use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Embedded default response schema (loaded at compile time).
const DEFAULT_SCHEMA_JSON: &str = include_str!("../../schemas/judgment_response.schema.json");

/// Fields every response schema must require.
pub const REQUIRED_FIELDS: [&str; 4] = ["narrative", "status", "confidence", "citations"];

static DEFAULT_SCHEMA: OnceLock<Result<(JsonValue, jsonschema::Validator), String>> = OnceLock::new();

/// Errors from loading a response schema.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Failed to load schema: {0}")]
    LoadError(String),

    #[error("Response schema must require field '{0}'")]
    MissingRequiredField(String),
}

fn default_schema() -> Result<&'static (JsonValue, jsonschema::Validator), SchemaError> {
    let result = DEFAULT_SCHEMA.get_or_init(|| {
        let value: JsonValue = match serde_json::from_str(DEFAULT_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };
        match jsonschema::options().build(&value) {
            Ok(validator) => Ok((value, validator)),
            Err(e) => Err(format!("Failed to compile schema: {}", e)),
        }
    });

    result.as_ref().map_err(|e| SchemaError::LoadError(e.clone()))
}

/// The default schema as JSON, for embedding into prompts.
pub fn default_schema_value() -> Result<&'static JsonValue, SchemaError> {
    default_schema().map(|(value, _)| value)
}

/// A compiled response schema.
pub enum ResponseSchema {
    Default,
    Custom {
        value: JsonValue,
        validator: jsonschema::Validator,
    },
}

impl fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseSchema::Default => f.write_str("ResponseSchema::Default"),
            ResponseSchema::Custom { value, .. } => {
                f.debug_struct("ResponseSchema::Custom").field("value", value).finish()
            }
        }
    }
}

impl ResponseSchema {
    /// Compile an optional organization schema, falling back to the default.
    pub fn from_config(custom: Option<&JsonValue>) -> Result<Self, SchemaError> {
        match custom {
            None => {
                default_schema()?;
                Ok(ResponseSchema::Default)
            }
            Some(value) => Self::custom(value.clone()),
        }
    }

    /// Compile a custom schema after checking it requires the pipeline's
    /// fields.
    pub fn custom(value: JsonValue) -> Result<Self, SchemaError> {
        let required: Vec<&str> = value
            .get("required")
            .and_then(JsonValue::as_array)
            .map(|fields| fields.iter().filter_map(JsonValue::as_str).collect())
            .unwrap_or_default();
        if let Some(missing) = REQUIRED_FIELDS.iter().find(|f| !required.contains(f)) {
            return Err(SchemaError::MissingRequiredField(missing.to_string()));
        }

        let validator = jsonschema::options()
            .build(&value)
            .map_err(|e| SchemaError::LoadError(format!("Failed to compile schema: {}", e)))?;
        Ok(ResponseSchema::Custom { value, validator })
    }

    /// Schema JSON, for embedding into prompts.
    pub fn value(&self) -> Result<&JsonValue, SchemaError> {
        match self {
            ResponseSchema::Default => default_schema_value(),
            ResponseSchema::Custom { value, .. } => Ok(value),
        }
    }

    /// Validate a response value. Returns every violation.
    pub fn validate(&self, instance: &JsonValue) -> Result<(), Vec<String>> {
        let validator = match self {
            ResponseSchema::Default => &default_schema().map_err(|e| vec![e.to_string()])?.1,
            ResponseSchema::Custom { validator, .. } => validator,
        };

        let errors: Vec<String> = validator
            .iter_errors(instance)
            .map(|e| format!("{} at {}", e, e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
