//! Wires judge ids to constructors. The set is closed: an id outside this
//! registry is a configuration error, not a silently dropped judge.

use crate::{
    cost_budget::CostBudgetJudge, json_schema::JsonSchemaJudge, latency_slo::LatencySloJudge,
    lean::LeanJudge, loop_guard::LoopGuardJudge, policy::PolicyJudge,
    prompt_injection::PromptInjectionJudge, regex_match::RegexJudge, repair_path::RepairPathJudge,
    retry_storm::RetryStormJudge, tool_abuse::ToolAbuseJudge, tool_contract::ToolContractJudge,
    trajectory::TrajectoryStepJudge,
};
use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use tracegate_core::judge::{Judge, JudgeFactory};

/// The judges a run gets when none are configured explicitly.
pub const DEFAULT_JUDGES: &[&str] = &[
    "tool_contract",
    "policy",
    "trajectory_step",
    "regex",
    "json_schema",
];

const ALL_JUDGES: &[&str] = &[
    "tool_contract",
    "policy",
    "trajectory_step",
    "regex",
    "json_schema",
    "repair_path",
    "latency_slo",
    "loop_guard",
    "cost_budget",
    "tool_abuse",
    "retry_storm",
    "prompt_injection",
    "lean",
];

#[derive(Default)]
pub struct BuiltinJudges;

impl JudgeFactory for BuiltinJudges {
    fn known_judges(&self) -> Vec<String> {
        ALL_JUDGES.iter().map(|s| s.to_string()).collect()
    }

    fn build(&self, judge_id: &str, config: &Value) -> Result<Arc<dyn Judge>> {
        let judge: Arc<dyn Judge> = match judge_id {
            "tool_contract" => Arc::new(ToolContractJudge),
            "policy" => Arc::new(PolicyJudge),
            "trajectory_step" => Arc::new(TrajectoryStepJudge),
            "regex" => Arc::new(RegexJudge::from_config(config)?),
            "json_schema" => Arc::new(JsonSchemaJudge),
            "repair_path" => Arc::new(RepairPathJudge),
            "latency_slo" => Arc::new(LatencySloJudge::from_config(config)?),
            "loop_guard" => Arc::new(LoopGuardJudge::from_config(config)?),
            "cost_budget" => Arc::new(CostBudgetJudge::from_config(config)?),
            "tool_abuse" => Arc::new(ToolAbuseJudge::from_config(config)?),
            "retry_storm" => Arc::new(RetryStormJudge::from_config(config)?),
            "prompt_injection" => Arc::new(PromptInjectionJudge::from_config(config)?),
            "lean" => Arc::new(LeanJudge::from_config(config)?),
            other => anyhow::bail!(
                "unknown judge '{}' (known: {})",
                other,
                ALL_JUDGES.join(", ")
            ),
        };
        Ok(judge)
    }
}

/// Builds the judge list for a run config: the configured judges, or the
/// defaults when the list is empty, each with its config blob.
pub fn build_judges(
    factory: &dyn JudgeFactory,
    judge_ids: &[String],
    judge_configs: &Value,
) -> Result<Vec<Arc<dyn Judge>>> {
    let ids: Vec<String> = if judge_ids.is_empty() {
        DEFAULT_JUDGES.iter().map(|s| s.to_string()).collect()
    } else {
        judge_ids.to_vec()
    };
    ids.iter()
        .map(|id| {
            let config = judge_configs.get(id).cloned().unwrap_or(Value::Null);
            factory.build(id, &config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_listed_judge_builds() {
        let factory = BuiltinJudges;
        let configs = json!({ "lean": { "command": "lean-check" } });
        for id in factory.known_judges() {
            let config = configs.get(&id).cloned().unwrap_or(Value::Null);
            let judge = factory.build(&id, &config).unwrap();
            assert_eq!(judge.judge_id(), id);
        }
    }

    #[test]
    fn unknown_judge_is_rejected() {
        assert!(BuiltinJudges.build("vibes", &Value::Null).is_err());
    }

    #[test]
    fn empty_list_falls_back_to_defaults() {
        let judges = build_judges(&BuiltinJudges, &[], &Value::Null).unwrap();
        let ids: Vec<&str> = judges.iter().map(|j| j.judge_id()).collect();
        assert_eq!(ids, DEFAULT_JUDGES);
    }

    #[test]
    fn configs_are_routed_by_judge_id() {
        let err = build_judges(
            &BuiltinJudges,
            &["regex".to_string()],
            &json!({ "regex": { "patterns": ["("] } }),
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("invalid regex"));
    }
}
