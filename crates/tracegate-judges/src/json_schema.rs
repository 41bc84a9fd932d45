//! Validates the case's final output against its embedded JSON Schema.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "json_schema";

#[derive(Default)]
pub struct JsonSchemaJudge;

#[async_trait]
impl Judge for JsonSchemaJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        let Some(schema) = &case.json_schema else {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no json_schema"));
        };

        // compiled per case: schemas are small and the compile keeps the
        // judge free of lifetime ties to the case
        let compiled = jsonschema::JSONSchema::compile(schema)
            .map_err(|e| anyhow!("invalid json_schema on case '{}': {}", case.case_id, e))?;

        let output = match case.final_output() {
            Some(v) => v.clone(),
            None => Value::Null,
        };
        // string outputs that parse as JSON are validated as the parsed value
        let candidate = match &output {
            Value::String(s) => serde_json::from_str::<Value>(s).unwrap_or(output.clone()),
            other => other.clone(),
        };

        let errors: Vec<Value> = match compiled.validate(&candidate) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| json!({ "path": e.instance_path.to_string(), "error": e.to_string() }))
                .collect(),
        };

        let passed = errors.is_empty();
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            if passed { 1.0 } else { 0.0 },
            if passed {
                "output conforms to schema".to_string()
            } else {
                format!("{} schema violation(s)", errors.len())
            },
            false,
            errors,
        ))
    }
}
