//! Token and cost budgets over the case's recorded usage. Usage comes from
//! `metadata.token_usage` and from per-event `usage.*` / `gen_ai.usage.*`
//! attributes; a recorded `cost_usd` wins over the per-1k estimate.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "cost_budget";

#[derive(Debug, Default, Deserialize)]
pub struct CostBudgetConfig {
    pub max_input_tokens: Option<f64>,
    pub max_output_tokens: Option<f64>,
    pub max_total_tokens: Option<f64>,
    pub max_cost_usd: Option<f64>,
    #[serde(default)]
    pub input_cost_per_1k: f64,
    #[serde(default)]
    pub output_cost_per_1k: f64,
}

impl CostBudgetConfig {
    fn budgets(&self) -> [Option<f64>; 4] {
        [
            self.max_input_tokens,
            self.max_output_tokens,
            self.max_total_tokens,
            self.max_cost_usd,
        ]
    }
}

pub struct CostBudgetJudge {
    config: CostBudgetConfig,
}

impl CostBudgetJudge {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: CostBudgetConfig = crate::parse_config(JUDGE_ID, config)?;
        Ok(Self { config })
    }
}

struct Usage {
    input_tokens: f64,
    output_tokens: f64,
    direct_cost: Option<f64>,
}

fn as_f64(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

fn extract_usage(case: &EvalCase) -> Usage {
    let mut input_tokens = 0.0;
    let mut output_tokens = 0.0;
    let mut direct_cost = None;

    if let Some(usage) = case.metadata.get("token_usage") {
        input_tokens += as_f64(usage.get("input_tokens")).unwrap_or(0.0);
        output_tokens += as_f64(usage.get("output_tokens")).unwrap_or(0.0);
        if let Some(cost) = as_f64(usage.get("cost_usd")) {
            direct_cost = Some(cost);
        }
    }

    for event in &case.trace {
        let attrs = &event.attributes;
        input_tokens += as_f64(
            attrs
                .get("usage.input_tokens")
                .or_else(|| attrs.get("gen_ai.usage.input_tokens")),
        )
        .unwrap_or(0.0);
        output_tokens += as_f64(
            attrs
                .get("usage.output_tokens")
                .or_else(|| attrs.get("gen_ai.usage.output_tokens")),
        )
        .unwrap_or(0.0);
        if let Some(cost) = as_f64(attrs.get("cost_usd")) {
            direct_cost = Some(cost);
        }
    }

    Usage {
        input_tokens,
        output_tokens,
        direct_cost,
    }
}

#[async_trait]
impl Judge for CostBudgetJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        let budgets = self.config.budgets();
        if budgets.iter().all(Option::is_none) {
            return Ok(crate::not_applicable(
                JUDGE_ID,
                &case.case_id,
                "no cost/token budgets configured",
            ));
        }

        let usage = extract_usage(case);
        let total_tokens = usage.input_tokens + usage.output_tokens;
        let estimated_cost = usage.direct_cost.unwrap_or_else(|| {
            (usage.input_tokens / 1000.0) * self.config.input_cost_per_1k
                + (usage.output_tokens / 1000.0) * self.config.output_cost_per_1k
        });

        let mut violations: Vec<Value> = Vec::new();
        let checks = [
            ("input_tokens", usage.input_tokens, self.config.max_input_tokens),
            ("output_tokens", usage.output_tokens, self.config.max_output_tokens),
            ("total_tokens", total_tokens, self.config.max_total_tokens),
            ("cost_usd", estimated_cost, self.config.max_cost_usd),
        ];
        for (metric, actual, budget) in checks {
            if let Some(budget) = budget {
                if actual > budget {
                    violations.push(json!({
                        "metric": metric,
                        "actual": actual,
                        "budget": budget,
                    }));
                }
            }
        }

        let configured = budgets.iter().flatten().count().max(1);
        let score = (1.0 - violations.len() as f64 / configured as f64).max(0.0);
        let passed = violations.is_empty();
        let reason = if passed {
            format!(
                "within budget ({:.0} tokens, ${:.4})",
                total_tokens, estimated_cost
            )
        } else {
            format!("{} budget violation(s)", violations.len())
        };
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            score,
            reason,
            false,
            violations,
        ))
    }
}
