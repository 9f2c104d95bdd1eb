//! Guard pipeline: a sequential, short-circuiting chain of output checks
//! applied to synthesized LLM responses before they reach the caller.
//!
//! Order: Hallucination Checker -> Honesty Policy -> Schema Validator.
//! Each stage can append warnings without stopping the pipeline; only a
//! stage explicitly configured to hard-fail (schema validator in strict
//! mode) halts it early.

pub mod hallucination;
pub mod honesty;
pub mod schema;

use serde::Serialize;
use serde_json::Value;

use crate::config::GuardsConfig;
use hallucination::{HallucinationCheck, HallucinationChecker};
use honesty::{HonestyAnalysis, HonestyPolicy};
use schema::{SchemaValidator, ValidationResult};

#[derive(Debug, Clone, Serialize)]
pub struct GuardReport {
    pub passed: bool,
    pub hallucination: Option<HallucinationCheck>,
    pub honesty: Option<HonestyAnalysis>,
    pub schema: Option<ValidationResult>,
    pub warnings: Vec<String>,
}

pub struct GuardPipeline {
    hallucination_checker: HallucinationChecker,
    honesty_policy: HonestyPolicy,
    schema_validator: SchemaValidator,
    hallucination_enabled: bool,
    honesty_enabled: bool,
}

impl GuardPipeline {
    pub fn new(config: &GuardsConfig) -> Self {
        Self {
            hallucination_checker: HallucinationChecker::new(false),
            honesty_policy: HonestyPolicy::new(true, true),
            schema_validator: SchemaValidator::new(config.schema_strict),
            hallucination_enabled: config.hallucination_checker_enabled,
            honesty_enabled: config.honesty_policy_enabled,
        }
    }

    /// Register a named output schema checked by `run` when `schema_name`
    /// is supplied.
    pub fn register_schema(&self, name: &str, schema: &Value) -> Result<(), String> {
        self.schema_validator.register_schema(name, schema)
    }

    /// Run the full pipeline over `text`, optionally validating `structured`
    /// against `schema_name` when the response carries a tool call or other
    /// structured payload. Returns a report; `passed` is false only when the
    /// schema stage hard-fails (strict mode) — hallucination/honesty issues
    /// are always advisory (surfaced as warnings, never blocking).
    pub fn run(&self, text: &str, structured: Option<(&Value, &str)>) -> GuardReport {
        let mut warnings = Vec::new();

        let hallucination = if self.hallucination_enabled {
            let check = self.hallucination_checker.check_text(text);
            if check.hallucination_detected {
                warnings.push("hallucination checker flagged this response".to_string());
            }
            warnings.extend(check.warnings.clone());
            Some(check)
        } else {
            None
        };

        let honesty = if self.honesty_enabled {
            let analysis = self.honesty_policy.analyze_text(text);
            if !analysis.compliant {
                warnings.push("honesty policy violations detected".to_string());
            }
            warnings.extend(analysis.suggestions.clone());
            Some(analysis)
        } else {
            None
        };

        let schema = structured.map(|(data, name)| self.schema_validator.validate_data(data, name));
        if let Some(result) = &schema {
            warnings.extend(result.warnings.clone());
        }

        let passed = schema.as_ref().is_none_or(|r| r.valid);

        GuardReport { passed, hallucination, honesty, schema, warnings }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(schema_strict: bool) -> GuardPipeline {
        GuardPipeline::new(&GuardsConfig {
            schema_strict,
            hallucination_checker_enabled: true,
            honesty_policy_enabled: true,
        })
    }

    #[test]
    fn clean_response_passes() {
        let report = pipeline(false).run("Paris is the capital of France.", None);
        assert!(report.passed);
    }

    #[test]
    fn structured_output_validated_against_schema() {
        let p = pipeline(true);
        p.register_schema("tool_call", &serde_json::json!({
            "type": "object",
            "required": ["tool"],
            "properties": {"tool": {"type": "string"}}
        }))
        .unwrap();
        let data = serde_json::json!({"tool": "web_search"});
        let report = p.run("ok", Some((&data, "tool_call")));
        assert!(report.passed);
    }

    #[test]
    fn structured_output_failing_schema_fails_pipeline_in_strict_mode() {
        let p = pipeline(true);
        p.register_schema("tool_call", &serde_json::json!({
            "type": "object",
            "required": ["tool"],
            "properties": {"tool": {"type": "string"}}
        }))
        .unwrap();
        let data = serde_json::json!({"nope": true});
        let report = p.run("ok", Some((&data, "tool_call")));
        assert!(!report.passed);
    }

    #[test]
    fn disabled_stages_are_skipped() {
        let p = GuardPipeline::new(&GuardsConfig {
            schema_strict: false,
            hallucination_checker_enabled: false,
            honesty_policy_enabled: false,
        });
        let report = p.run("As an AI I cannot verify this.", None);
        assert!(report.hallucination.is_none());
        assert!(report.honesty.is_none());
        assert!(report.passed);
    }
}
