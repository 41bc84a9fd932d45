use crate::model::{EvalCase, JudgeResult};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

/// A verdict source. Implementations score one case at a time and must be
/// deterministic: the same case and config always yield the same result.
#[async_trait]
pub trait Judge: Send + Sync {
    fn judge_id(&self) -> &str;

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult>;
}

/// Builds judges by id from an opaque per-judge config blob. The engine
/// depends on this seam only; the concrete judge set is wired by the caller.
pub trait JudgeFactory: Send + Sync {
    fn known_judges(&self) -> Vec<String>;

    fn build(&self, judge_id: &str, config: &Value) -> Result<Arc<dyn Judge>>;
}

/// A skipped non-verdict emitted when a judge cannot run at all. The case
/// outcome is computed over non-skipped results only, so an unavailable
/// judge never flips a case.
pub fn unavailable_result(judge_id: &str, case_id: &str, reason: impl Into<String>) -> JudgeResult {
    JudgeResult {
        judge_id: judge_id.to_string(),
        case_id: case_id.to_string(),
        score: 0.0,
        passed: false,
        reason: format!("judge_unavailable: {}", reason.into()),
        hard_fail: false,
        evidence_refs: json!([]),
        skipped: true,
    }
}
