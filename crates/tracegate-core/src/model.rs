use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const SCHEMA_VERSION: &str = "1.0.0";

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// One atomic occurrence inside a case trajectory. Ordering by `idx` is the
/// trajectory; events are append-only and never reordered after capture.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TraceEvent {
    pub idx: u64,
    #[serde(default)]
    pub ts: String,
    pub actor: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolContractSpec {
    #[serde(default, alias = "required")]
    pub required_args: Vec<String>,
    #[serde(default, alias = "forbidden")]
    pub forbidden_args: Vec<String>,
    /// Expected JSON type per argument ("string", "number", "integer",
    /// "boolean", "object", "array", "null").
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arg_types: BTreeMap<String, String>,
    /// Expected JSON type of the tool's recorded output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PolicySpec {
    #[serde(default)]
    pub forbidden_tools: Vec<String>,
    #[serde(default)]
    pub required_tools: Vec<String>,
}

impl PolicySpec {
    pub fn is_empty(&self) -> bool {
        self.forbidden_tools.is_empty() && self.required_tools.is_empty()
    }
}

/// One unit of evaluation: input, expectation/contracts, recorded trajectory
/// and fixed tool-response fixtures (in `metadata.tool_responses`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalCase {
    pub case_id: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub input: Value,
    #[serde(default, alias = "expected", skip_serializing_if = "Value::is_null")]
    pub expected_output: Value,
    #[serde(default)]
    pub trace: Vec<TraceEvent>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_contracts: BTreeMap<String, ToolContractSpec>,
    #[serde(default, skip_serializing_if = "PolicySpec::is_empty")]
    pub policy: PolicySpec,
    #[serde(default, alias = "regex", skip_serializing_if = "Vec::is_empty")]
    pub regex_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl EvalCase {
    /// Final assistant output: last agent/assistant event with an output,
    /// falling back to the last event with any output.
    pub fn final_output(&self) -> Option<&Value> {
        for event in self.trace.iter().rev() {
            if !event.output.is_null() && matches!(event.actor.as_str(), "assistant" | "agent") {
                return Some(&event.output);
            }
        }
        self.trace
            .iter()
            .rev()
            .find(|e| !e.output.is_null())
            .map(|e| &e.output)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalSuite {
    pub dataset_id: String,
    pub cases: Vec<EvalCase>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl EvalSuite {
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            anyhow::Error::new(
                crate::errors::Diagnostic::new(
                    crate::errors::codes::E_PATH_NOT_FOUND,
                    format!("failed to read suite file '{}': {}", path.display(), e),
                )
                .with_details(serde_json::json!({ "path": path })),
            )
        })?;
        let suite = if matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        ) {
            serde_yaml::from_str(&raw)?
        } else {
            serde_json::from_str(&raw)?
        };
        Ok(suite)
    }
}

/// Output of one judge on one case. Keyed by `(judge_id, case_id)`;
/// re-running the same judge on the same case+config yields a byte-identical
/// result (no timestamps, no random ids).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeResult {
    pub judge_id: String,
    pub case_id: String,
    pub score: f64,
    pub passed: bool,
    pub reason: String,
    pub hard_fail: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub evidence_refs: Value,
    #[serde(default)]
    pub skipped: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    pub passed: bool,
    pub hard_failed: bool,
    pub judge_results: Vec<JudgeResult>,
    #[serde(default)]
    pub replay_issues: Vec<String>,
}

/// Pinned configuration of one evaluation execution. Immutable once written
/// to an evidence pack; each execution/repair run produces a new one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    pub run_id: String,
    pub dataset_id: String,
    pub agent_version: String,
    pub model: String,
    pub started_at: String,
    pub seed: u64,
    pub judges: Vec<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub judge_configs: Value,
    #[serde(default = "default_execution_mode")]
    pub execution_mode: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub execution_config: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub pinned_env: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_lock_hash: Option<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

pub const MODE_TRACE_SCORE: &str = "trace_score";
pub const MODE_PROPOSE_EXECUTE_REPAIR: &str = "propose_execute_repair";

fn default_execution_mode() -> String {
    MODE_TRACE_SCORE.to_string()
}

fn default_schema_version() -> String {
    SCHEMA_VERSION.to_string()
}

/// Derived, never hand-edited: recomputed deterministically from the case
/// results on every run and every replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub run_id: String,
    pub dataset_id: String,
    pub total_cases: usize,
    pub passed_cases: usize,
    pub failed_cases: usize,
    pub hard_fail_cases: usize,
    pub pass_rate: f64,
    pub hard_fail_rate: f64,
    pub judge_pass_rates: BTreeMap<String, f64>,
    /// Partial failures that did not flip any verdict, e.g. unavailable judges.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default = "default_schema_version")]
    pub schema_version: String,
}

impl RunSummary {
    pub fn compute(run_config: &RunConfig, dataset_id: &str, results: &[CaseResult]) -> Self {
        let mut judge_total: BTreeMap<String, usize> = BTreeMap::new();
        let mut judge_passed: BTreeMap<String, usize> = BTreeMap::new();
        let mut judge_skipped: BTreeMap<String, usize> = BTreeMap::new();
        for case in results {
            for r in &case.judge_results {
                if r.skipped {
                    // only unavailability is worth surfacing; a judge that
                    // simply does not apply to a case is routine
                    if r.reason.starts_with("judge_unavailable") {
                        *judge_skipped.entry(r.judge_id.clone()).or_default() += 1;
                    }
                    continue;
                }
                *judge_total.entry(r.judge_id.clone()).or_default() += 1;
                if r.passed {
                    *judge_passed.entry(r.judge_id.clone()).or_default() += 1;
                }
            }
        }
        let warnings: Vec<String> = judge_skipped
            .iter()
            .map(|(id, count)| format!("judge '{id}' unavailable on {count} case(s)"))
            .collect();
        let total_cases = results.len();
        let passed_cases = results.iter().filter(|c| c.passed).count();
        let hard_fail_cases = results.iter().filter(|c| c.hard_failed).count();
        let judge_pass_rates = judge_total
            .iter()
            .map(|(id, total)| {
                let passed = judge_passed.get(id).copied().unwrap_or(0);
                (id.clone(), passed as f64 / *total as f64)
            })
            .collect();

        RunSummary {
            run_id: run_config.run_id.clone(),
            dataset_id: dataset_id.to_string(),
            total_cases,
            passed_cases,
            failed_cases: total_cases - passed_cases,
            hard_fail_cases,
            pass_rate: if total_cases > 0 {
                passed_cases as f64 / total_cases as f64
            } else {
                0.0
            },
            hard_fail_rate: if total_cases > 0 {
                hard_fail_cases as f64 / total_cases as f64
            } else {
                0.0
            },
            judge_pass_rates,
            warnings,
            schema_version: run_config.schema_version.clone(),
        }
    }
}
