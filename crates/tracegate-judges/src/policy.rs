//! Tool policy enforcement: forbidden tools must never be called, required
//! tools must be called at least once. A forbidden-tool call is a hard
//! failure; a missing required tool is a soft one.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "policy";

#[derive(Default)]
pub struct PolicyJudge;

#[async_trait]
impl Judge for PolicyJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        if case.policy.is_empty() {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no policy"));
        }

        let called: BTreeSet<&str> = case
            .trace
            .iter()
            .filter(|e| e.event_type == "tool_call")
            .filter_map(|e| e.tool.as_deref())
            .collect();

        let mut evidence: Vec<Value> = Vec::new();
        let mut forbidden_hit = false;
        for tool in &case.policy.forbidden_tools {
            if called.contains(tool.as_str()) {
                forbidden_hit = true;
                evidence.push(json!({ "kind": "forbidden_tool_called", "tool": tool }));
            }
        }
        for tool in &case.policy.required_tools {
            if !called.contains(tool.as_str()) {
                evidence.push(json!({ "kind": "required_tool_missing", "tool": tool }));
            }
        }

        let passed = evidence.is_empty();
        let reason = if passed {
            "policy satisfied".to_string()
        } else {
            evidence
                .iter()
                .map(|e| {
                    format!(
                        "{} '{}'",
                        e["kind"].as_str().unwrap_or(""),
                        e["tool"].as_str().unwrap_or("")
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        };
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            if passed { 1.0 } else { 0.0 },
            reason,
            forbidden_hit,
            evidence,
        ))
    }
}
