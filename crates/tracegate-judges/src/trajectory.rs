//! Checks that the trace contains an expected sequence of steps, in
//! order, as a subsequence. Steps name either an event type ("message")
//! or a specific tool call ("tool:search").

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult, TraceEvent};

pub const JUDGE_ID: &str = "trajectory_step";

pub const EXPECTED_STEPS_KEY: &str = "expected_steps";

#[derive(Default)]
pub struct TrajectoryStepJudge;

fn step_matches(step: &str, event: &TraceEvent) -> bool {
    if let Some(tool) = step.strip_prefix("tool:") {
        return event.event_type == "tool_call" && event.tool.as_deref() == Some(tool);
    }
    event.event_type == step
}

#[async_trait]
impl Judge for TrajectoryStepJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        let steps: Vec<String> = match case.metadata.get(EXPECTED_STEPS_KEY) {
            Some(v) => serde_json::from_value(v.clone())
                .map_err(|e| anyhow::anyhow!("'{EXPECTED_STEPS_KEY}' must be a string array: {e}"))?,
            None => Vec::new(),
        };
        if steps.is_empty() {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no expected steps"));
        }

        let mut matched = 0usize;
        let mut matched_at: Vec<Value> = Vec::new();
        for event in &case.trace {
            if matched == steps.len() {
                break;
            }
            if step_matches(&steps[matched], event) {
                matched_at.push(json!({ "step": steps[matched], "idx": event.idx }));
                matched += 1;
            }
        }

        let passed = matched == steps.len();
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            matched as f64 / steps.len() as f64,
            if passed {
                format!("all {} step(s) in order", steps.len())
            } else {
                format!("stuck at step '{}' ({matched} of {})", steps[matched], steps.len())
            },
            false,
            matched_at,
        ))
    }
}
