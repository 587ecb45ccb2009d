//! Response schemas and the output contract given to the model.
//!
//! A [`ResponseSchema`] pairs the caller's content schema with the fixed
//! error schema. Both carry a `type` discriminator (`"content"` or
//! `"error"`), are compiled once with `jsonschema`, and are rendered into
//! the instruction message appended to every uncached request.

use crate::error::LmError;
use crate::types::{ChatMessage, ErrorResponse};
use schemars::JsonSchema;
use serde_json::{json, Value};

/// Discriminator value of a successful reply.
pub const CONTENT_TYPE: &str = "content";
/// Discriminator value of a model-reported error.
pub const ERROR_TYPE: &str = "error";

/// Compiled content and error schemas for one kind of check.
pub struct ResponseSchema {
    content: Value,
    error: Value,
    content_validator: jsonschema::Validator,
    error_validator: jsonschema::Validator,
}

impl std::fmt::Debug for ResponseSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseSchema")
            .field("content", &self.content)
            .finish()
    }
}

impl ResponseSchema {
    /// Build the schema for payload type `T`.
    pub fn of<T: JsonSchema>() -> Result<Self, LmError> {
        let payload = serde_json::to_value(schemars::schema_for!(T))?;
        Self::from_payload_schema(payload)
    }

    /// Build from a hand-written JSON schema describing the payload fields.
    ///
    /// The `type` discriminator is added to the schema; callers describe
    /// only their own fields.
    pub fn from_payload_schema(payload: Value) -> Result<Self, LmError> {
        let content = with_type_tag(payload, CONTENT_TYPE)?;
        let error = with_type_tag(
            serde_json::to_value(schemars::schema_for!(ErrorResponse))?,
            ERROR_TYPE,
        )?;

        let content_validator = jsonschema::validator_for(&content)
            .map_err(|e| LmError::configuration(format!("invalid content schema: {}", e)))?;
        let error_validator = jsonschema::validator_for(&error)
            .map_err(|e| LmError::configuration(format!("invalid error schema: {}", e)))?;

        Ok(Self {
            content,
            error,
            content_validator,
            error_validator,
        })
    }

    /// Content schema including the `type` discriminator
    pub fn content_schema(&self) -> &Value {
        &self.content
    }

    /// Error schema including the `type` discriminator
    pub fn error_schema(&self) -> &Value {
        &self.error
    }

    /// Validate a `type: "content"` reply
    pub fn validate_content(&self, value: &Value) -> Result<(), LmError> {
        collect_errors(&self.content_validator, value)
    }

    /// Validate a `type: "error"` reply
    pub fn validate_error(&self, value: &Value) -> Result<(), LmError> {
        collect_errors(&self.error_validator, value)
    }

    /// The instruction appended after the caller's messages.
    pub fn instruction(&self) -> Result<ChatMessage, LmError> {
        let error_schema = serde_json::to_string_pretty(&self.error)?;
        let content_schema = serde_json::to_string_pretty(&self.content)?;
        Ok(ChatMessage::user(format!(
            "** Important: your response MUST follow the rules below **\n\
            - If an error occurs, respond with a valid JSON object that matches this schema:\n\
            ```json schema\n{}\n```\n\
            - Otherwise, respond with a valid JSON object or array that matches this schema:\n\
            ```json schema\n{}\n```\n\
            - The response MUST contain exactly one JSON value and no other text.\n\
            - The JSON value MUST NOT be wrapped in triple backticks or any other formatting.\n\
            - Double check that the JSON is valid, follows the schema and fills every required field.",
            error_schema, content_schema
        )))
    }
}

fn collect_errors(validator: &jsonschema::Validator, value: &Value) -> Result<(), LmError> {
    let errors: Vec<String> = validator
        .iter_errors(value)
        .map(|e| format!("{}: {}", e.instance_path, e))
        .collect();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(LmError::schema(errors.join("; ")))
    }
}

/// Add a required `type` property fixed to `tag`.
fn with_type_tag(mut schema: Value, tag: &str) -> Result<Value, LmError> {
    let object = schema
        .as_object_mut()
        .ok_or_else(|| LmError::configuration("payload schema must be a JSON object"))?;

    object
        .entry("type")
        .or_insert_with(|| Value::String("object".to_string()));

    let properties = object
        .entry("properties")
        .or_insert_with(|| json!({}))
        .as_object_mut()
        .ok_or_else(|| LmError::configuration("schema 'properties' must be an object"))?;
    properties.insert("type".to_string(), json!({ "type": "string", "const": tag }));

    let required = object
        .entry("required")
        .or_insert_with(|| json!([]))
        .as_array_mut()
        .ok_or_else(|| LmError::configuration("schema 'required' must be an array"))?;
    if !required.iter().any(|v| v == "type") {
        required.insert(0, Value::String("type".to_string()));
    }

    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, JsonSchema)]
    #[allow(dead_code)]
    struct RenameCheck {
        /// Whether the name should change
        rename_needed: bool,
        suggested_names: Vec<String>,
    }

    #[test]
    fn test_content_schema_requires_tag() {
        let schema = ResponseSchema::of::<RenameCheck>().unwrap();

        assert_eq!(
            schema.content_schema()["properties"]["type"]["const"],
            json!("content")
        );
        assert!(schema
            .validate_content(&json!({
                "type": "content",
                "rename_needed": true,
                "suggested_names": ["IsEnabled"]
            }))
            .is_ok());

        let err = schema
            .validate_content(&json!({"rename_needed": true, "suggested_names": []}))
            .unwrap_err();
        assert!(matches!(err, LmError::Schema(_)));

        let wrong_type = json!({"type": "content", "rename_needed": "yes", "suggested_names": []});
        assert!(schema.validate_content(&wrong_type).is_err());
    }

    #[test]
    fn test_error_schema() {
        let schema = ResponseSchema::of::<RenameCheck>().unwrap();

        assert!(schema
            .validate_error(&json!({"type": "error", "error": "unknown property"}))
            .is_ok());
        assert!(schema.validate_error(&json!({"type": "error"})).is_err());
        assert!(schema
            .validate_error(&json!({"type": "error", "error": 42}))
            .is_err());
    }

    #[test]
    fn test_from_payload_schema() {
        let schema = ResponseSchema::from_payload_schema(json!({
            "properties": { "score": { "type": "number" } },
            "required": ["score"]
        }))
        .unwrap();

        assert!(schema
            .validate_content(&json!({"type": "content", "score": 0.4}))
            .is_ok());
        assert!(schema
            .validate_content(&json!({"type": "error", "score": 0.4}))
            .is_err());
        assert!(ResponseSchema::from_payload_schema(json!(true)).is_err());
    }

    #[test]
    fn test_instruction_mentions_both_schemas() {
        let schema = ResponseSchema::of::<RenameCheck>().unwrap();
        let message = schema.instruction().unwrap();

        assert!(message.content.contains("\"const\": \"error\""));
        assert!(message.content.contains("suggested_names"));
        assert!(message.content.contains("no other text"));
    }
}
