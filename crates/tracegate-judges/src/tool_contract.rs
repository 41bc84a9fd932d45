//! Checks every tool call against the case's per-tool contracts: required
//! and forbidden arguments, declared argument types, and the recorded
//! output type. Contract violations are hard failures: an agent calling a
//! tool with malformed arguments is broken, not merely wrong.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "tool_contract";

#[derive(Default)]
pub struct ToolContractJudge;

fn json_type_matches(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => false,
    }
}

#[async_trait]
impl Judge for ToolContractJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        if case.tool_contracts.is_empty() {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no tool contracts"));
        }

        let mut checked = 0usize;
        let mut violations: Vec<Value> = Vec::new();
        for event in &case.trace {
            let Some(tool) = &event.tool else { continue };
            let Some(contract) = case.tool_contracts.get(tool) else {
                continue;
            };
            if event.event_type == "tool_result" {
                if let Some(expected) = &contract.output_type {
                    if !event.output.is_null() && !json_type_matches(&event.output, expected) {
                        violations.push(json!({
                            "idx": event.idx,
                            "tool": tool,
                            "kind": "output_type",
                            "expected": expected,
                        }));
                    }
                }
                continue;
            }
            if event.event_type != "tool_call" {
                continue;
            }
            checked += 1;
            let args = event.input.as_object().cloned().unwrap_or_default();
            for required in &contract.required_args {
                if !args.contains_key(required) {
                    violations.push(json!({
                        "idx": event.idx,
                        "tool": tool,
                        "kind": "missing_required_arg",
                        "arg": required,
                    }));
                }
            }
            for forbidden in &contract.forbidden_args {
                if args.contains_key(forbidden) {
                    violations.push(json!({
                        "idx": event.idx,
                        "tool": tool,
                        "kind": "forbidden_arg",
                        "arg": forbidden,
                    }));
                }
            }
            for (arg, expected) in &contract.arg_types {
                if let Some(value) = args.get(arg) {
                    if !json_type_matches(value, expected) {
                        violations.push(json!({
                            "idx": event.idx,
                            "tool": tool,
                            "kind": "arg_type",
                            "arg": arg,
                            "expected": expected,
                        }));
                    }
                }
            }
        }

        // contracts name tools the agent is expected to use; never calling
        // any of them is itself a violation, not a skip
        if checked == 0 && violations.is_empty() {
            let contracted: Vec<&String> = case.tool_contracts.keys().collect();
            return Ok(crate::verdict(
                JUDGE_ID,
                &case.case_id,
                false,
                0.0,
                "tool contracts configured but no matching tool calls were found",
                true,
                vec![json!({ "kind": "no_contracted_calls", "contracts": contracted })],
            ));
        }

        let passed = violations.is_empty();
        let reason = if passed {
            format!("{checked} contracted call(s) compliant")
        } else {
            format!("{} contract violation(s)", violations.len())
        };
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            if passed { 1.0 } else { 0.0 },
            reason,
            true,
            violations,
        ))
    }
}
