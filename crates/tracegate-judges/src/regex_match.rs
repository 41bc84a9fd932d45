//! Regex matching over the case's final output. Patterns come from the
//! case itself plus any configured globally for the judge; all of them
//! must match. Patterns are compiled up front so a bad pattern surfaces
//! at build time, not per case.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "regex";

pub struct RegexJudge {
    global_patterns: Vec<Regex>,
}

impl RegexJudge {
    pub fn from_config(config: &Value) -> Result<Self> {
        let raw: Vec<String> = config
            .get("patterns")
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .context("regex judge config: 'patterns' must be an array of strings")?
            .unwrap_or_default();
        let global_patterns = raw
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid regex pattern '{p}'")))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { global_patterns })
    }
}

fn output_text(case: &EvalCase) -> String {
    match case.final_output() {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

#[async_trait]
impl Judge for RegexJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        let case_patterns = case
            .regex_patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("invalid regex pattern '{p}'")))
            .collect::<Result<Vec<_>>>()?;
        if self.global_patterns.is_empty() && case_patterns.is_empty() {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no patterns"));
        }

        let text = output_text(case);
        let mut missed: Vec<Value> = Vec::new();
        let mut total = 0usize;
        for pattern in self.global_patterns.iter().chain(case_patterns.iter()) {
            total += 1;
            if !pattern.is_match(&text) {
                missed.push(json!({ "pattern": pattern.as_str() }));
            }
        }

        let matched = total - missed.len();
        let passed = missed.is_empty();
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            matched as f64 / total as f64,
            if passed {
                format!("all {total} pattern(s) matched")
            } else {
                format!("{} of {total} pattern(s) unmatched", missed.len())
            },
            false,
            missed,
        ))
    }
}
