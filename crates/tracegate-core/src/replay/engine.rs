//! Re-execution of a recorded pack. Pure replay re-scores the stored
//! trajectories and demands verdict parity; execution replay re-drives
//! the adapter loop under the recorded seed and also demands trace
//! parity. Environment pins are checked before any work happens.

use crate::engine::loop_runner::LoopRunner;
use crate::engine::runner::EvalRunner;
use crate::environment::{capture_environment_metadata, compare_environment_pins};
use crate::errors::{codes, Diagnostic};
use crate::evidence;
use crate::judge::Judge;
use crate::model::{CaseResult, TraceEvent};
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct ReplayMismatch {
    pub case_id: String,
    pub field: String,
    pub expected: Value,
    pub actual: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub pack: String,
    pub mode: String,
    pub cases_checked: usize,
    pub matched: bool,
    pub mismatches: Vec<ReplayMismatch>,
    pub env_check_skipped: bool,
}

fn check_environment(pack: &Path, pinned_env: &Value, skip: bool) -> Result<()> {
    if skip {
        warn!(pack = %pack.display(), "environment pin check skipped");
        return Ok(());
    }
    let current = capture_environment_metadata(None);
    let mismatches = compare_environment_pins(pinned_env, &current, None);
    if mismatches.is_empty() {
        return Ok(());
    }
    Err(anyhow::Error::new(
        Diagnostic::new(
            codes::E_ENV_PIN,
            format!(
                "environment differs from recorded pins: {}",
                mismatches
                    .iter()
                    .map(|m| m.key.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        )
        .with_details(json!({ "mismatches": mismatches })),
    ))
}

/// Pure replay: re-score the stored trajectories with freshly built judges
/// and compare the new verdicts against the recorded ones.
pub async fn replay_pack(
    pack: &Path,
    judges: Vec<Arc<dyn Judge>>,
    parallel: usize,
    skip_env_check: bool,
) -> Result<ReplayReport> {
    let config = evidence::read_run_config(pack)?;
    check_environment(pack, &config.pinned_env, skip_env_check)?;

    let suite = evidence::read_suite_from_pack(pack)?;
    let recorded = evidence::read_case_results(pack)?;

    let runner = EvalRunner::new(judges, parallel);
    let (fresh, _) = runner.run(&suite, &config).await?;

    let mut mismatches = Vec::new();
    compare_verdicts(&recorded, &fresh, &mut mismatches);
    finish_report(pack, "pure", suite.cases.len(), mismatches, skip_env_check)
}

/// Execution replay: re-drive the propose/execute/repair loop with the
/// recorded seed and adapter, then compare both trajectories and verdicts.
pub async fn replay_pack_exec(
    pack: &Path,
    adapter_command: Vec<String>,
    judges: Vec<Arc<dyn Judge>>,
    max_repairs: u32,
    timeout_secs: u64,
    skip_env_check: bool,
) -> Result<ReplayReport> {
    let config = evidence::read_run_config(pack)?;
    check_environment(pack, &config.pinned_env, skip_env_check)?;

    let recorded_suite = evidence::read_suite_from_pack(pack)?;
    let recorded_results = evidence::read_case_results(pack)?;

    // replay against the original (pre-execution) cases: strip the
    // recorded trajectories and loop bookkeeping before re-driving
    let mut base_suite = recorded_suite.clone();
    for case in &mut base_suite.cases {
        case.trace.clear();
        for key in ["attempt_history", "selected_attempt", "max_repairs", "loop_passed"] {
            case.metadata.remove(key);
        }
    }

    let loop_runner = LoopRunner::new(adapter_command, judges, max_repairs, timeout_secs);
    let (fresh_suite, fresh_results, _) = loop_runner.run(&base_suite, &config).await?;

    let mut mismatches = Vec::new();
    for (recorded, fresh) in recorded_suite.cases.iter().zip(&fresh_suite.cases) {
        let expected = normalize_trace(&recorded.trace);
        let actual = normalize_trace(&fresh.trace);
        if expected != actual {
            mismatches.push(ReplayMismatch {
                case_id: recorded.case_id.clone(),
                field: "trace".to_string(),
                expected: Value::Array(expected),
                actual: Value::Array(actual),
            });
        }
        for key in ["selected_attempt", "loop_passed"] {
            let expected = recorded.metadata.get(key).cloned().unwrap_or(Value::Null);
            let actual = fresh.metadata.get(key).cloned().unwrap_or(Value::Null);
            if expected != actual {
                mismatches.push(ReplayMismatch {
                    case_id: recorded.case_id.clone(),
                    field: format!("metadata.{key}"),
                    expected,
                    actual,
                });
            }
        }
        compare_attempt_histories(recorded, fresh, &mut mismatches);
    }
    compare_verdicts(&recorded_results, &fresh_results, &mut mismatches);
    finish_report(pack, "execution", recorded_suite.cases.len(), mismatches, skip_env_check)
}

/// Every repair attempt must reproduce, not just the selected one: a
/// divergence at an intermediate attempt signals adapter nondeterminism
/// even when the final verdicts coincide.
fn compare_attempt_histories(
    recorded: &crate::model::EvalCase,
    fresh: &crate::model::EvalCase,
    mismatches: &mut Vec<ReplayMismatch>,
) {
    let recorded_history = attempt_history(recorded);
    let fresh_history = attempt_history(fresh);
    if recorded_history.len() != fresh_history.len() {
        mismatches.push(ReplayMismatch {
            case_id: recorded.case_id.clone(),
            field: "attempt_history.len".to_string(),
            expected: json!(recorded_history.len()),
            actual: json!(fresh_history.len()),
        });
        return;
    }
    for (attempt, (rec, new)) in recorded_history.iter().zip(&fresh_history).enumerate() {
        for key in ["passed", "hard_failed"] {
            let expected = rec.get(key).cloned().unwrap_or(Value::Null);
            let actual = new.get(key).cloned().unwrap_or(Value::Null);
            if expected != actual {
                mismatches.push(ReplayMismatch {
                    case_id: recorded.case_id.clone(),
                    field: format!("attempt_history[{attempt}].{key}"),
                    expected,
                    actual,
                });
            }
        }
        let expected = normalize_history_trace(rec);
        let actual = normalize_history_trace(new);
        if expected != actual {
            mismatches.push(ReplayMismatch {
                case_id: recorded.case_id.clone(),
                field: format!("attempt_history[{attempt}].trace"),
                expected: Value::Array(expected),
                actual: Value::Array(actual),
            });
        }
    }
}

fn attempt_history(case: &crate::model::EvalCase) -> Vec<Value> {
    case.metadata
        .get("attempt_history")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

fn normalize_history_trace(entry: &Value) -> Vec<Value> {
    let events: Vec<TraceEvent> = entry
        .get("trace")
        .cloned()
        .and_then(|t| serde_json::from_value(t).ok())
        .unwrap_or_default();
    normalize_trace(&events)
}

fn finish_report(
    pack: &Path,
    mode: &str,
    cases: usize,
    mismatches: Vec<ReplayMismatch>,
    env_check_skipped: bool,
) -> Result<ReplayReport> {
    let matched = mismatches.is_empty();
    if matched {
        info!(pack = %pack.display(), mode, cases, "replay matched");
    } else {
        warn!(pack = %pack.display(), mode, mismatches = mismatches.len(), "replay diverged");
    }
    Ok(ReplayReport {
        pack: pack.display().to_string(),
        mode: mode.to_string(),
        cases_checked: cases,
        matched,
        mismatches,
        env_check_skipped,
    })
}

fn compare_verdicts(
    recorded: &[CaseResult],
    fresh: &[CaseResult],
    mismatches: &mut Vec<ReplayMismatch>,
) {
    for rec in recorded {
        let Some(new) = fresh.iter().find(|r| r.case_id == rec.case_id) else {
            mismatches.push(ReplayMismatch {
                case_id: rec.case_id.clone(),
                field: "case".to_string(),
                expected: json!("present"),
                actual: json!("missing"),
            });
            continue;
        };
        if rec.passed != new.passed {
            mismatches.push(ReplayMismatch {
                case_id: rec.case_id.clone(),
                field: "passed".to_string(),
                expected: json!(rec.passed),
                actual: json!(new.passed),
            });
        }
        if rec.hard_failed != new.hard_failed {
            mismatches.push(ReplayMismatch {
                case_id: rec.case_id.clone(),
                field: "hard_failed".to_string(),
                expected: json!(rec.hard_failed),
                actual: json!(new.hard_failed),
            });
        }
        for rec_jr in &rec.judge_results {
            let Some(new_jr) = new
                .judge_results
                .iter()
                .find(|j| j.judge_id == rec_jr.judge_id)
            else {
                mismatches.push(ReplayMismatch {
                    case_id: rec.case_id.clone(),
                    field: format!("judges.{}", rec_jr.judge_id),
                    expected: json!("present"),
                    actual: json!("missing"),
                });
                continue;
            };
            // an unavailable judge on either side is environmental noise,
            // not divergence
            if rec_jr.skipped || new_jr.skipped {
                continue;
            }
            if rec_jr.passed != new_jr.passed || rec_jr.score != new_jr.score {
                mismatches.push(ReplayMismatch {
                    case_id: rec.case_id.clone(),
                    field: format!("judges.{}", rec_jr.judge_id),
                    expected: json!({ "passed": rec_jr.passed, "score": rec_jr.score }),
                    actual: json!({ "passed": new_jr.passed, "score": new_jr.score }),
                });
            }
        }
    }
}

/// Projects a trace down to the replay-stable fields. Timestamps and span
/// wiring are excluded; ids derived from the seed are not, so id drift is
/// caught.
fn normalize_trace(trace: &[TraceEvent]) -> Vec<Value> {
    trace
        .iter()
        .map(|e| {
            json!({
                "idx": e.idx,
                "actor": e.actor,
                "type": e.event_type,
                "tool": e.tool,
                "input": e.input,
                "output": e.output,
                "error": e.error,
                "attempt": e.attempt,
            })
        })
        .collect()
}
