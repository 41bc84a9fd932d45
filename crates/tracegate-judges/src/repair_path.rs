//! Scores how a case made it through the propose/execute/repair loop:
//! full marks for a first-attempt pass, efficiency drops with every
//! repair spent, and an out-of-order attempt history is a violation.
//! Only applies to cases carrying loop bookkeeping in their metadata.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "repair_path";

#[derive(Default)]
pub struct RepairPathJudge;

/// Attempt numbers in the history must count up from zero without gaps.
fn history_is_monotonic(history: &[Value]) -> bool {
    history
        .iter()
        .enumerate()
        .all(|(i, entry)| entry.get("attempt").and_then(|v| v.as_u64()) == Some(i as u64))
}

#[async_trait]
impl Judge for RepairPathJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        let Some(selected) = case
            .metadata
            .get("selected_attempt")
            .and_then(|v| v.as_u64())
        else {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no loop metadata"));
        };
        let loop_passed = case
            .metadata
            .get("loop_passed")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let max_repairs = case
            .metadata
            .get("max_repairs")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let history = case
            .metadata
            .get("attempt_history")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let evidence = json!({
            "selected_attempt": selected,
            "max_repairs": max_repairs,
            "loop_passed": loop_passed,
            "attempts_recorded": history.len(),
        });
        if !history.is_empty() && !history_is_monotonic(&history) {
            return Ok(crate::verdict(
                JUDGE_ID,
                &case.case_id,
                false,
                0.0,
                "attempt history is out of order".to_string(),
                false,
                vec![evidence],
            ));
        }

        let attempts_used = selected + 1;
        let score = if loop_passed {
            1.0 / attempts_used as f64
        } else {
            0.0
        };
        let reason = if loop_passed {
            format!(
                "passed on attempt {selected} ({attempts_used} of {} used)",
                max_repairs + 1
            )
        } else {
            format!("never passed within {} attempt(s)", max_repairs + 1)
        };
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            loop_passed,
            score,
            reason,
            false,
            vec![evidence],
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn case(selected: u64, max_repairs: u64, loop_passed: bool) -> EvalCase {
        serde_json::from_value(json!({
            "case_id": "c1",
            "input": "hi",
            "metadata": {
                "selected_attempt": selected,
                "max_repairs": max_repairs,
                "loop_passed": loop_passed,
            },
            "trace": [],
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn first_attempt_pass_scores_full() {
        let result = RepairPathJudge.evaluate(&case(0, 2, true)).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score, 1.0);
    }

    #[tokio::test]
    async fn each_repair_costs_score() {
        let result = RepairPathJudge.evaluate(&case(2, 2, true)).await.unwrap();
        assert!(result.passed);
        assert!((result.score - 1.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn exhausted_budget_fails_soft() {
        let result = RepairPathJudge.evaluate(&case(2, 2, false)).await.unwrap();
        assert!(!result.passed);
        assert!(!result.hard_fail);
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn out_of_order_history_fails() {
        let case: EvalCase = serde_json::from_value(json!({
            "case_id": "c1",
            "input": "hi",
            "metadata": {
                "selected_attempt": 1,
                "loop_passed": true,
                "attempt_history": [{ "attempt": 1 }, { "attempt": 0 }],
            },
            "trace": [],
        }))
        .unwrap();
        let result = RepairPathJudge.evaluate(&case).await.unwrap();
        assert!(!result.passed);
        assert!(result.reason.contains("out of order"));
    }

    #[tokio::test]
    async fn trace_score_cases_are_skipped() {
        let case: EvalCase = serde_json::from_value(json!({
            "case_id": "c1", "input": "hi", "trace": []
        }))
        .unwrap();
        assert!(RepairPathJudge.evaluate(&case).await.unwrap().skipped);
    }
}
