//! Detects retry storms: the same tool call (tool plus canonical argument
//! form) issued over and over. Distinct from `loop_guard`, which budgets
//! repetition inside one attempt regardless of errors; this judge scores
//! retry pressure across the whole trace.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracegate_core::fingerprint::canonical_json;
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "retry_storm";

const DEFAULT_MAX_RETRIES_PER_CALL: usize = 2;
const DEFAULT_MAX_TOTAL_RETRIES: usize = 6;

#[derive(Debug, Default, Deserialize)]
struct RetryStormConfig {
    max_retries_per_call: Option<usize>,
    max_total_retries: Option<usize>,
}

pub struct RetryStormJudge {
    max_per_call: usize,
    max_total: usize,
}

impl RetryStormJudge {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: RetryStormConfig = crate::parse_config(JUDGE_ID, config)?;
        Ok(Self {
            max_per_call: config
                .max_retries_per_call
                .unwrap_or(DEFAULT_MAX_RETRIES_PER_CALL),
            max_total: config.max_total_retries.unwrap_or(DEFAULT_MAX_TOTAL_RETRIES),
        })
    }
}

#[async_trait]
impl Judge for RetryStormJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        let mut call_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut errors_seen = 0usize;
        for event in &case.trace {
            if event.event_type == "tool_call" {
                let key = format!(
                    "{}({})",
                    event.tool.as_deref().unwrap_or("unknown"),
                    canonical_json(&event.input)
                );
                *call_counts.entry(key).or_default() += 1;
            }
            if event.error.is_some() {
                errors_seen += 1;
            }
        }
        if call_counts.is_empty() {
            return Ok(crate::not_applicable(
                JUDGE_ID,
                &case.case_id,
                "no tool calls to evaluate retries",
            ));
        }

        let mut total_retries = 0usize;
        let mut high_retry_calls: Vec<Value> = Vec::new();
        for (call, count) in &call_counts {
            let retries = count.saturating_sub(1);
            total_retries += retries;
            if retries > self.max_per_call {
                high_retry_calls.push(json!({ "call": call, "retries": retries }));
            }
        }

        let mut violations: Vec<Value> = Vec::new();
        if !high_retry_calls.is_empty() {
            violations.push(json!({
                "kind": "per_call_retries",
                "budget": self.max_per_call,
                "calls": high_retry_calls,
            }));
        }
        if total_retries > self.max_total {
            violations.push(json!({
                "kind": "total_retries",
                "retries": total_retries,
                "budget": self.max_total,
            }));
        }

        let score = (1.0 - violations.len() as f64 / 2.0).max(0.0);
        let passed = violations.is_empty();
        let reason = if passed {
            format!(
                "{} retry(ies) across {} distinct call(s)",
                total_retries,
                call_counts.len()
            )
        } else {
            format!("retry storm: {} violation(s)", violations.len())
        };
        let mut evidence = violations;
        evidence.push(json!({
            "errors_seen": errors_seen,
            "distinct_calls": call_counts.len(),
            "total_retries": total_retries,
        }));
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            score,
            reason,
            false,
            evidence,
        ))
    }
}
