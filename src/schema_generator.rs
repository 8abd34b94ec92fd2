//! Form schema generation from draft field names
//!
//! Asks the model to turn a plain list of field names into a form schema,
//! then validates the reply like any other schema source.

use crate::llm::{LlmError, LlmRequest, LlmService, Message};
use crate::schema::{FormSchema, SchemaError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;

const GENERATION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SchemaGenerationError {
    #[error("Must register at least one field")]
    NoFields,
    #[error("Schema generation LLM error: {0}")]
    Llm(#[from] LlmError),
    #[error("Generated schema is invalid: {0}")]
    Invalid(#[from] SchemaError),
    #[error("Schema generation timed out after {0:?}")]
    Timeout(Duration),
}

/// Shape the model is asked to follow
fn reference_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "firstFieldName": { "type": "string", "format": "email" },
            "secondFieldName": { "type": "number" }
        },
        "required": ["firstFieldName"]
    })
}

fn generation_prompt(field_names: &[String]) -> String {
    let fields = Value::from(field_names.to_vec());
    format!(
        "I'm designing a form and need a direct, parsable JSON schema \
for the following field names: {fields}, \
Based on common conventions and best practices and on this reference schema {}, \
please provide a direct JSON schema specific to these inputs without any additional explanations, \
formatting, comments, or the \"$schema\" property.",
        reference_schema()
    )
}

/// Generate a schema for `field_names`, bounded by a 30 second timeout.
///
/// # Errors
/// Fails when no field name is given, on backend errors or timeout, and when
/// the reply is not a valid form schema.
pub async fn generate_schema(
    field_names: &[String],
    llm_service: Arc<dyn LlmService>,
) -> Result<FormSchema, SchemaGenerationError> {
    generate_schema_within(field_names, llm_service, GENERATION_TIMEOUT).await
}

/// Like [`generate_schema`] with an explicit deadline.
///
/// # Errors
/// Same as [`generate_schema`].
pub async fn generate_schema_within(
    field_names: &[String],
    llm_service: Arc<dyn LlmService>,
    deadline: Duration,
) -> Result<FormSchema, SchemaGenerationError> {
    if field_names.iter().all(|name| name.trim().is_empty()) {
        return Err(SchemaGenerationError::NoFields);
    }

    let request = LlmRequest {
        messages: vec![Message::system(generation_prompt(field_names))],
        ..LlmRequest::default()
    };

    let response = match timeout(deadline, llm_service.complete(&request)).await {
        Ok(result) => result?,
        Err(_) => {
            tracing::warn!(fields = field_names.len(), "Schema generation timed out");
            return Err(SchemaGenerationError::Timeout(deadline));
        }
    };

    let schema = parse_generated(&response.message.content)?;
    tracing::info!(
        fields = schema.properties().len(),
        required = schema.required().len(),
        "Generated form schema"
    );
    Ok(schema)
}

/// Parse a model reply into a schema, tolerating code fences and `$schema`.
fn parse_generated(reply: &str) -> Result<FormSchema, SchemaError> {
    let mut value: Value = serde_json::from_str(strip_code_fence(reply))?;
    if let Some(object) = value.as_object_mut() {
        object.remove("$schema");
    }
    FormSchema::from_value(value)
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json") on the opening line
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().trim_end_matches("```").trim()
}
