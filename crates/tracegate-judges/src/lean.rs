//! External proof-checking judge. Sends the case's `lean_payload` to a
//! configured checker subprocess and maps its JSON verdict back. Any
//! failure to reach or run the checker propagates as an error, which the
//! runner records as judge_unavailable without touching the case outcome.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracegate_core::engine::subprocess::{call_json_adapter, split_command, DEFAULT_ADAPTER_TIMEOUT_SECS};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};
use tracing::debug;

pub const JUDGE_ID: &str = "lean";

pub const LEAN_PAYLOAD_KEY: &str = "lean_payload";

#[derive(Debug, Deserialize)]
struct CheckerVerdict {
    passed: bool,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    reason: Option<String>,
}

pub struct LeanJudge {
    command: Vec<String>,
    timeout_secs: u64,
}

impl LeanJudge {
    pub fn from_config(config: &Value) -> Result<Self> {
        let command = match config.get("command") {
            Some(Value::String(raw)) => split_command(raw),
            Some(Value::Array(_)) => serde_json::from_value(config["command"].clone())?,
            _ => Vec::new(),
        };
        if command.is_empty() {
            anyhow::bail!("lean judge config: 'command' is required");
        }
        let timeout_secs = config
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_ADAPTER_TIMEOUT_SECS);
        Ok(Self {
            command,
            timeout_secs,
        })
    }
}

#[async_trait]
impl Judge for LeanJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        let Some(payload) = case.metadata.get(LEAN_PAYLOAD_KEY) else {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no lean payload"));
        };

        let request = json!({
            "case_id": case.case_id,
            "payload": payload,
            "final_output": case.final_output(),
        });
        debug!(case_id = %case.case_id, command = ?self.command, "invoking external checker");
        let response = call_json_adapter(&self.command, &request, self.timeout_secs).await?;
        let verdict: CheckerVerdict = serde_json::from_value(response)
            .map_err(|e| anyhow::anyhow!("checker returned an unexpected shape: {e}"))?;

        let score = verdict
            .score
            .unwrap_or(if verdict.passed { 1.0 } else { 0.0 });
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            verdict.passed,
            score,
            verdict
                .reason
                .unwrap_or_else(|| "checker verdict".to_string()),
            false,
            vec![],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case_with_payload() -> EvalCase {
        serde_json::from_value(json!({
            "case_id": "c1",
            "input": "hi",
            "metadata": { "lean_payload": { "theorem": "trivial" } },
            "trace": [],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn no_payload_is_skipped_without_calling_out() {
        let judge = LeanJudge::from_config(&json!({ "command": "definitely-missing-checker" }))
            .unwrap();
        let case: EvalCase =
            serde_json::from_value(json!({ "case_id": "c1", "input": "hi", "trace": [] })).unwrap();
        let result = judge.evaluate(&case).await.unwrap();
        assert!(result.skipped);
    }

    #[tokio::test]
    async fn checker_verdict_maps_through() {
        let judge = LeanJudge::from_config(&json!({
            "command": ["sh", "-c", "cat >/dev/null; echo '{\"passed\": true, \"reason\": \"qed\"}'"]
        }))
        .unwrap();
        let result = judge.evaluate(&case_with_payload()).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.reason, "qed");
        assert_eq!(result.score, 1.0);
    }

    #[tokio::test]
    async fn missing_checker_binary_errors() {
        let judge = LeanJudge::from_config(&json!({ "command": "definitely-missing-checker" }))
            .unwrap();
        assert!(judge.evaluate(&case_with_payload()).await.is_err());
    }

    #[test]
    fn command_is_required() {
        assert!(LeanJudge::from_config(&json!({})).is_err());
    }
}
