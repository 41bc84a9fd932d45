//! Propose/execute/repair execution. Each case walks an explicit state
//! machine: the adapter proposes an action plan, the executor materializes
//! it into a trace against the case's pinned tool responses, the judges
//! score it, and failures below the repair budget loop back with feedback.

use crate::engine::runner::EvalRunner;
use crate::engine::subprocess::call_json_adapter;
use crate::fingerprint::{self, canonical_json, derived_trace_id};
use crate::model::{
    CaseResult, EvalCase, EvalSuite, RunConfig, RunSummary, TraceEvent, MODE_PROPOSE_EXECUTE_REPAIR,
};
use anyhow::Result;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Proposing,
    Executing,
    Scoring,
    Repairing,
    Done,
}

#[derive(Debug, Deserialize)]
struct AdapterResponse {
    #[serde(default, alias = "final_output", alias = "assistant_output")]
    output: Value,
    #[serde(default)]
    tool_calls: Vec<AdapterToolCall>,
}

#[derive(Debug, Deserialize)]
struct AdapterToolCall {
    #[serde(alias = "tool")]
    name: String,
    #[serde(default, alias = "args", alias = "arguments")]
    input: Value,
}

pub struct LoopRunner {
    adapter_command: Vec<String>,
    runner: EvalRunner,
    max_repairs: u32,
    timeout_secs: u64,
}

impl LoopRunner {
    pub fn new(
        adapter_command: Vec<String>,
        judges: Vec<Arc<dyn crate::judge::Judge>>,
        max_repairs: u32,
        timeout_secs: u64,
    ) -> Self {
        Self {
            adapter_command,
            runner: EvalRunner::new(judges, 1),
            max_repairs,
            timeout_secs,
        }
    }

    /// Drives every case through the loop and returns the executed suite
    /// (selected-attempt traces plus attempt history in case metadata)
    /// together with the verdicts for the selected attempts.
    pub async fn run(
        &self,
        suite: &EvalSuite,
        config: &RunConfig,
    ) -> Result<(EvalSuite, Vec<CaseResult>, RunSummary)> {
        let mut executed_cases = Vec::with_capacity(suite.cases.len());
        let mut results = Vec::with_capacity(suite.cases.len());

        for case in &suite.cases {
            let (executed, result) = self.run_case(case, config).await?;
            executed_cases.push(executed);
            results.push(result);
        }

        let mut metadata = suite.metadata.clone();
        metadata.insert("execution_mode".to_string(), json!(MODE_PROPOSE_EXECUTE_REPAIR));
        let executed_suite = EvalSuite {
            dataset_id: suite.dataset_id.clone(),
            cases: executed_cases,
            metadata,
        };
        let summary = RunSummary::compute(config, &suite.dataset_id, &results);
        Ok((executed_suite, results, summary))
    }

    async fn run_case(&self, case: &EvalCase, config: &RunConfig) -> Result<(EvalCase, CaseResult)> {
        let mut state = LoopState::Proposing;
        let mut attempt: u32 = 0;
        let mut feedback: Vec<String> = Vec::new();
        let mut history: Vec<Value> = Vec::new();

        let mut proposal: Option<AdapterResponse> = None;
        let mut trace: Vec<TraceEvent> = Vec::new();
        let mut selected: Option<(Vec<TraceEvent>, CaseResult)> = None;

        while state != LoopState::Done {
            match state {
                LoopState::Proposing => {
                    match self.propose(case, attempt, &feedback, &history).await {
                        Ok(response) => {
                            proposal = Some(response);
                            state = LoopState::Executing;
                        }
                        // a timed-out or misbehaving adapter fails this
                        // attempt, never the whole run; the error lands in
                        // the trace and the replay contract flags it
                        Err(err) => {
                            warn!(
                                case = %case.case_id,
                                attempt,
                                error = %err,
                                "adapter call failed"
                            );
                            trace = adapter_error_trace(case, config, attempt, &err.to_string());
                            state = LoopState::Scoring;
                        }
                    }
                }
                LoopState::Executing => {
                    let response = proposal.take().ok_or_else(|| {
                        anyhow::anyhow!("executing without a proposal for case '{}'", case.case_id)
                    })?;
                    trace = build_attempt_trace(case, config, attempt, &response);
                    state = LoopState::Scoring;
                }
                LoopState::Scoring => {
                    let candidate = attempt_case(case, &trace, attempt);
                    let suite = EvalSuite {
                        dataset_id: config.dataset_id.clone(),
                        cases: vec![candidate],
                        metadata: BTreeMap::new(),
                    };
                    let (mut attempt_results, _) = self.runner.run(&suite, config).await?;
                    let result = attempt_results.remove(0);

                    let failing: Vec<&crate::model::JudgeResult> = result
                        .judge_results
                        .iter()
                        .filter(|r| !r.skipped && !r.passed)
                        .collect();
                    history.push(json!({
                        "attempt": attempt,
                        "passed": result.passed,
                        "hard_failed": result.hard_failed,
                        "failing_judges": failing.iter().map(|r| &r.judge_id).collect::<Vec<_>>(),
                        "trace": &trace,
                    }));

                    if result.passed {
                        info!(case = %case.case_id, attempt, "attempt passed");
                        selected = Some((std::mem::take(&mut trace), result));
                        state = LoopState::Done;
                    } else if attempt < self.max_repairs {
                        feedback = failing
                            .iter()
                            .map(|r| format!("{}: {}", r.judge_id, r.reason))
                            .collect();
                        debug!(case = %case.case_id, attempt, "attempt failed, repairing");
                        selected = Some((std::mem::take(&mut trace), result));
                        state = LoopState::Repairing;
                    } else {
                        info!(case = %case.case_id, attempt, "repair budget exhausted");
                        selected = Some((std::mem::take(&mut trace), result));
                        state = LoopState::Done;
                    }
                }
                LoopState::Repairing => {
                    attempt += 1;
                    state = LoopState::Proposing;
                }
                LoopState::Done => unreachable!(),
            }
        }

        let (final_trace, result) = selected
            .ok_or_else(|| anyhow::anyhow!("loop ended without an attempt for '{}'", case.case_id))?;

        let mut executed = case.clone();
        executed.trace = final_trace;
        executed
            .metadata
            .insert("attempt_history".to_string(), Value::Array(history));
        executed
            .metadata
            .insert("selected_attempt".to_string(), json!(attempt));
        executed
            .metadata
            .insert("max_repairs".to_string(), json!(self.max_repairs));
        executed
            .metadata
            .insert("loop_passed".to_string(), json!(result.passed));
        Ok((executed, result))
    }

    async fn propose(
        &self,
        case: &EvalCase,
        attempt: u32,
        feedback: &[String],
        history: &[Value],
    ) -> Result<AdapterResponse> {
        // prior attempts go over without their traces, which the adapter
        // has no use for and which would bloat every request
        let previous_attempts: Vec<Value> = history
            .iter()
            .map(|entry| {
                json!({
                    "attempt": entry.get("attempt").cloned().unwrap_or(Value::Null),
                    "passed": entry.get("passed").cloned().unwrap_or(Value::Null),
                    "failing_judges": entry.get("failing_judges").cloned().unwrap_or(Value::Null),
                })
            })
            .collect();
        // adapters can key their behavior on the mode: the first attempt
        // asks for a proposal, later attempts ask for a repair
        let mode = if attempt == 0 { "propose" } else { "repair" };
        let mut request = json!({
            "mode": mode,
            "case_id": case.case_id,
            "input": case.input,
            "expected_output": case.expected_output,
            "attempt": attempt,
            "previous_attempts": previous_attempts,
        });
        if !case.tool_contracts.is_empty() {
            request["contracts"] = serde_json::to_value(&case.tool_contracts)?;
        }
        if !case.policy.is_empty() {
            request["policy"] = serde_json::to_value(&case.policy)?;
        }
        if !feedback.is_empty() {
            request["feedback"] = json!(feedback);
        }
        let raw = call_json_adapter(&self.adapter_command, &request, self.timeout_secs).await?;
        Ok(serde_json::from_value(raw)?)
    }
}

/// Materializes one proposal into a trace. Ids are derived from the run
/// seed so the same proposal on the same seed yields an identical trace.
fn build_attempt_trace(
    case: &EvalCase,
    config: &RunConfig,
    attempt: u32,
    response: &AdapterResponse,
) -> Vec<TraceEvent> {
    let trace_id = derived_trace_id(config.seed, &case.case_id, attempt);
    let responses = case
        .metadata
        .get("tool_responses")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut events = Vec::new();
    let mut push = |mut event: TraceEvent| {
        let position = events.len() as u64;
        event.idx = position;
        event.trace_id = Some(trace_id.clone());
        event.span_id = Some(fingerprint::span_id(position + 1));
        if position > 0 {
            event.parent_span_id = Some(fingerprint::span_id(position));
        }
        events.push(event);
    };

    push(event("user", "message", |e| {
        e.input = case.input.clone();
        e.attempt = Some(attempt);
    }));

    for call in &response.tool_calls {
        push(event("assistant", "tool_call", |e| {
            e.tool = Some(call.name.clone());
            e.input = call.input.clone();
            e.attempt = Some(attempt);
        }));
        let resolved = resolve_tool_response(&responses, &call.name, &call.input);
        push(event("tool", "tool_result", |e| {
            e.tool = Some(call.name.clone());
            e.attempt = Some(attempt);
            match resolved {
                Some(output) => e.output = output,
                None => e.error = Some(format!("unresolved_tool: {}", call.name)),
            }
        }));
    }

    push(event("assistant", "message", |e| {
        e.output = response.output.clone();
        e.attempt = Some(attempt);
    }));
    events
}

/// The trace of an attempt whose adapter call never produced a proposal.
/// The error rides on the assistant turn with the `adapter_error:` prefix
/// the structural trace check hard-fails on.
fn adapter_error_trace(
    case: &EvalCase,
    config: &RunConfig,
    attempt: u32,
    error: &str,
) -> Vec<TraceEvent> {
    let trace_id = derived_trace_id(config.seed, &case.case_id, attempt);
    let mut events = vec![
        event("user", "message", |e| {
            e.input = case.input.clone();
            e.attempt = Some(attempt);
        }),
        event("assistant", "message", |e| {
            e.error = Some(format!("adapter_error: {error}"));
            e.attempt = Some(attempt);
        }),
    ];
    for (position, e) in events.iter_mut().enumerate() {
        let position = position as u64;
        e.idx = position;
        e.trace_id = Some(trace_id.clone());
        e.span_id = Some(fingerprint::span_id(position + 1));
        if position > 0 {
            e.parent_span_id = Some(fingerprint::span_id(position));
        }
    }
    events
}

fn event(actor: &str, event_type: &str, fill: impl FnOnce(&mut TraceEvent)) -> TraceEvent {
    let mut e = TraceEvent {
        idx: 0,
        ts: crate::model::utc_now_iso(),
        actor: actor.to_string(),
        event_type: event_type.to_string(),
        input: Value::Null,
        output: Value::Null,
        tool: None,
        error: None,
        latency_ms: None,
        trace_id: None,
        span_id: None,
        parent_span_id: None,
        attributes: BTreeMap::new(),
        attempt: None,
    };
    fill(&mut e);
    e
}

/// Looks up a pinned response for a tool call: first by the argument-keyed
/// form `<tool>:<sha256(args)[..16]>`, then by the bare tool name.
fn resolve_tool_response(
    responses: &serde_json::Map<String, Value>,
    tool: &str,
    args: &Value,
) -> Option<Value> {
    let args_key = format!(
        "{}:{}",
        tool,
        &fingerprint::sha256_hex(&canonical_json(args))[..16]
    );
    responses
        .get(&args_key)
        .or_else(|| responses.get(tool))
        .cloned()
}

fn attempt_case(case: &EvalCase, trace: &[TraceEvent], attempt: u32) -> EvalCase {
    let mut candidate = case.clone();
    candidate.trace = trace.to_vec();
    candidate
        .metadata
        .insert("attempt".to_string(), json!(attempt));
    candidate
}
