//! Detects an agent stuck in a loop: the same tool called with the same
//! arguments more times than the budget allows, a runaway trace, too many
//! repair attempts, or the assistant repeating itself verbatim.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracegate_core::fingerprint::canonical_json;
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "loop_guard";

pub const DEFAULT_MAX_REPEATS: u64 = 3;

#[derive(Debug, Default, Deserialize)]
struct LoopGuardConfig {
    #[serde(default)]
    max_repeats: Option<u64>,
    #[serde(default)]
    max_trace_len: Option<u64>,
    #[serde(default)]
    max_attempts: Option<u64>,
    #[serde(default)]
    max_identical_outputs: Option<u64>,
}

pub struct LoopGuardJudge {
    max_repeats: u64,
    max_trace_len: Option<u64>,
    max_attempts: Option<u64>,
    max_identical_outputs: Option<u64>,
}

impl LoopGuardJudge {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: LoopGuardConfig = crate::parse_config(JUDGE_ID, config)?;
        let max_repeats = match config.max_repeats {
            None => DEFAULT_MAX_REPEATS,
            Some(n) if n >= 1 => n,
            Some(_) => anyhow::bail!("loop_guard config: 'max_repeats' must be >= 1"),
        };
        Ok(Self {
            max_repeats,
            max_trace_len: config.max_trace_len,
            max_attempts: config.max_attempts,
            max_identical_outputs: config.max_identical_outputs,
        })
    }
}

#[async_trait]
impl Judge for LoopGuardJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        if case.trace.is_empty() {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "empty trace"));
        }

        let mut call_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut output_counts: BTreeMap<String, u64> = BTreeMap::new();
        let mut attempts: BTreeSet<u32> = BTreeSet::new();
        for event in &case.trace {
            if let Some(attempt) = event.attempt {
                attempts.insert(attempt);
            }
            match event.event_type.as_str() {
                "tool_call" => {
                    let tool = event.tool.as_deref().unwrap_or("");
                    let signature = format!("{}({})", tool, canonical_json(&event.input));
                    *call_counts.entry(signature).or_default() += 1;
                }
                "message" if event.actor == "assistant" && !event.output.is_null() => {
                    *output_counts.entry(canonical_json(&event.output)).or_default() += 1;
                }
                _ => {}
            }
        }

        let mut violations: Vec<Value> = call_counts
            .iter()
            .filter(|(_, count)| **count > self.max_repeats)
            .map(|(signature, count)| json!({
                "kind": "repeated_call",
                "call": signature,
                "count": count,
            }))
            .collect();
        if let Some(max_len) = self.max_trace_len {
            if case.trace.len() as u64 > max_len {
                violations.push(json!({
                    "kind": "trace_length",
                    "len": case.trace.len(),
                    "max": max_len,
                }));
            }
        }
        if let Some(max_attempts) = self.max_attempts {
            if attempts.len() as u64 > max_attempts {
                violations.push(json!({
                    "kind": "attempts",
                    "count": attempts.len(),
                    "max": max_attempts,
                }));
            }
        }
        if let Some(max_identical) = self.max_identical_outputs {
            for (output, count) in &output_counts {
                if *count > max_identical {
                    violations.push(json!({
                        "kind": "identical_output",
                        "output": output,
                        "count": count,
                    }));
                }
            }
        }

        let passed = violations.is_empty();
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            if passed { 1.0 } else { 0.0 },
            if passed {
                "no looping behavior".to_string()
            } else {
                format!("{} loop violation(s)", violations.len())
            },
            false,
            violations,
        ))
    }
}
