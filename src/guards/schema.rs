//! JSON Schema validation for structured LLM/tool output.
//!
//! Grounded on `schema_validator.py`. The Python original degrades to a
//! warning when the `jsonschema` library isn't installed at runtime; Rust
//! has no equivalent of a missing optional import, so that behavior becomes
//! `GuardsConfig::schema_strict` instead (a compile-time dependency,
//! runtime-toggled strictness).

use std::collections::HashMap;
use std::sync::Mutex;

use jsonschema::Validator;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub schema_name: Option<String>,
}

/// Validates JSON values against named, registered schemas.
///
/// `strict`: when a referenced schema is missing, `validate` returns
/// `valid: false` with an error if strict, or `valid: true` with a warning
/// otherwise.
pub struct SchemaValidator {
    schemas: Mutex<HashMap<String, Validator>>,
    strict: bool,
}

impl SchemaValidator {
    pub fn new(strict: bool) -> Self {
        Self { schemas: Mutex::new(HashMap::new()), strict }
    }

    /// Register a schema under `name`. Returns an error string if the
    /// schema itself doesn't compile.
    pub fn register_schema(&self, name: &str, schema: &Value) -> Result<(), String> {
        let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        self.schemas.lock().unwrap().insert(name.to_string(), validator);
        Ok(())
    }

    pub fn validate_data(&self, data: &Value, schema_name: &str) -> ValidationResult {
        let schemas = self.schemas.lock().unwrap();
        let Some(validator) = schemas.get(schema_name) else {
            return if self.strict {
                ValidationResult {
                    valid: false,
                    errors: vec![format!("schema '{schema_name}' not registered")],
                    warnings: Vec::new(),
                    schema_name: Some(schema_name.to_string()),
                }
            } else {
                ValidationResult {
                    valid: true,
                    errors: Vec::new(),
                    warnings: vec![format!("schema '{schema_name}' not registered, validation skipped")],
                    schema_name: Some(schema_name.to_string()),
                }
            };
        };

        let errors: Vec<String> = validator
            .iter_errors(data)
            .map(|e| {
                let path = e.instance_path.to_string();
                let path = if path.is_empty() { "root".to_string() } else { path };
                format!("{path}: {e}")
            })
            .collect();

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings: Vec::new(),
            schema_name: Some(schema_name.to_string()),
        }
    }

    /// Lightweight required-field validation, with no schema registration.
    pub fn validate_required_fields(data: &Value, required: &[&str]) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let obj = data.as_object();

        for field in required {
            match obj.and_then(|o| o.get(*field)) {
                None => errors.push(format!("missing required field: {field}")),
                Some(Value::Null) => warnings.push(format!("field '{field}' is null")),
                Some(Value::String(s)) if s.trim().is_empty() => {
                    warnings.push(format!("field '{field}' is empty string"))
                }
                Some(_) => {}
            }
        }

        ValidationResult { valid: errors.is_empty(), errors, warnings, schema_name: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_data_passes() {
        let v = SchemaValidator::new(true);
        v.register_schema(
            "greeting",
            &json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}),
        )
        .unwrap();
        let result = v.validate_data(&json!({"name": "ada"}), "greeting");
        assert!(result.valid);
    }

    #[test]
    fn invalid_data_fails_with_path() {
        let v = SchemaValidator::new(true);
        v.register_schema(
            "greeting",
            &json!({"type": "object", "required": ["name"], "properties": {"name": {"type": "string"}}}),
        )
        .unwrap();
        let result = v.validate_data(&json!({"name": 5}), "greeting");
        assert!(!result.valid);
        assert!(!result.errors.is_empty());
    }

    #[test]
    fn missing_schema_strict_fails() {
        let v = SchemaValidator::new(true);
        let result = v.validate_data(&json!({}), "unknown");
        assert!(!result.valid);
    }

    #[test]
    fn missing_schema_non_strict_warns() {
        let v = SchemaValidator::new(false);
        let result = v.validate_data(&json!({}), "unknown");
        assert!(result.valid);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn required_fields_missing_reported() {
        let result = SchemaValidator::validate_required_fields(&json!({"a": 1}), &["a", "b"]);
        assert!(!result.valid);
        assert!(result.errors[0].contains('b'));
    }
}
