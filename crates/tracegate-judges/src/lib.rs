//! The built-in judge set. Every judge here is deterministic: the same
//! case and config always produce the same verdict.

pub mod cost_budget;
pub mod json_schema;
pub mod latency_slo;
pub mod lean;
pub mod loop_guard;
pub mod policy;
pub mod prompt_injection;
pub mod regex_match;
pub mod registry;
pub mod repair_path;
pub mod retry_storm;
pub mod tool_abuse;
pub mod tool_contract;
pub mod trajectory;

pub use registry::{BuiltinJudges, DEFAULT_JUDGES};

use serde_json::json;
use tracegate_core::model::JudgeResult;

/// Deserializes a judge config blob; an absent (null) blob means the
/// config type's default.
pub(crate) fn parse_config<T>(judge_id: &str, config: &serde_json::Value) -> anyhow::Result<T>
where
    T: Default + serde::de::DeserializeOwned,
{
    if config.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(config.clone()).map_err(|e| anyhow::anyhow!("{judge_id} config: {e}"))
}

/// A completed verdict.
pub(crate) fn verdict(
    judge_id: &str,
    case_id: &str,
    passed: bool,
    score: f64,
    reason: impl Into<String>,
    hard_fail: bool,
    evidence: Vec<serde_json::Value>,
) -> JudgeResult {
    JudgeResult {
        judge_id: judge_id.to_string(),
        case_id: case_id.to_string(),
        score,
        passed,
        reason: reason.into(),
        hard_fail,
        evidence_refs: json!(evidence),
        skipped: false,
    }
}

/// A verdict for a judge that does not apply to this case. Skipped results
/// never affect the case outcome.
pub(crate) fn not_applicable(judge_id: &str, case_id: &str, reason: impl Into<String>) -> JudgeResult {
    JudgeResult {
        judge_id: judge_id.to_string(),
        case_id: case_id.to_string(),
        score: 0.0,
        passed: false,
        reason: reason.into(),
        hard_fail: false,
        evidence_refs: json!([]),
        skipped: true,
    }
}
