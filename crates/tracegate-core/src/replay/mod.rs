//! Trace integrity checks shared by scoring and replay. Every rule here is
//! a pure function of the trace, so a verdict derived from these issues is
//! reproducible from the stored trajectory alone.

pub mod engine;

use crate::model::{EvalCase, TraceEvent};
use std::collections::BTreeSet;

/// Structural issues in a case trace. An empty vec means the trace is sound.
pub fn validate_trace(case: &EvalCase) -> Vec<String> {
    let mut issues = Vec::new();
    validate_events(&case.trace, &mut issues);
    issues
}

pub fn validate_events(trace: &[TraceEvent], issues: &mut Vec<String>) {
    let mut last_idx: Option<u64> = None;
    let mut open_calls: Vec<(u64, String)> = Vec::new();
    let mut seen_spans: BTreeSet<&str> = BTreeSet::new();

    for event in trace {
        if let Some(prev) = last_idx {
            if event.idx <= prev {
                issues.push(format!(
                    "non-monotonic idx: {} after {}",
                    event.idx, prev
                ));
            }
        }
        last_idx = Some(event.idx);

        if event.actor.is_empty() {
            issues.push(format!("event {} has empty actor", event.idx));
        }
        if event.event_type.is_empty() {
            issues.push(format!("event {} has empty type", event.idx));
        }
        if let Some(latency) = event.latency_ms {
            if latency < 0 {
                issues.push(format!(
                    "event {} has negative latency_ms {}",
                    event.idx, latency
                ));
            }
        }
        // empty ts means the timestamp was never recorded, which is fine;
        // a present one must parse
        if !event.ts.is_empty() && chrono::DateTime::parse_from_rfc3339(&event.ts).is_err() {
            issues.push(format!(
                "event {} has malformed ts '{}'",
                event.idx, event.ts
            ));
        }
        if let Some(trace_id) = &event.trace_id {
            if !is_lower_hex(trace_id, 32) {
                issues.push(format!(
                    "event {} has malformed trace_id '{}'",
                    event.idx, trace_id
                ));
            }
        }
        if let Some(span_id) = &event.span_id {
            if !is_lower_hex(span_id, 16) {
                issues.push(format!(
                    "event {} has malformed span_id '{}'",
                    event.idx, span_id
                ));
            } else if !seen_spans.insert(span_id) {
                issues.push(format!(
                    "event {} reuses span_id '{}'",
                    event.idx, span_id
                ));
            }
        }

        match event.event_type.as_str() {
            "tool_call" => {
                let tool = event.tool.clone().unwrap_or_default();
                if tool.is_empty() {
                    issues.push(format!("tool_call at idx {} missing tool name", event.idx));
                }
                open_calls.push((event.idx, tool));
            }
            "tool_result" => {
                match open_calls.pop() {
                    None => issues.push(format!(
                        "tool_result at idx {} without a preceding tool_call",
                        event.idx
                    )),
                    Some((call_idx, call_tool)) => {
                        let result_tool = event.tool.as_deref().unwrap_or("");
                        if !call_tool.is_empty()
                            && !result_tool.is_empty()
                            && call_tool != result_tool
                        {
                            issues.push(format!(
                                "tool_result at idx {} answers '{}' but the call at idx {} was '{}'",
                                event.idx, result_tool, call_idx, call_tool
                            ));
                        }
                    }
                }
                if let Some(err) = &event.error {
                    if let Some(tool) = err.strip_prefix("unresolved_tool: ") {
                        issues.push(format!(
                            "unresolved tool '{}' at idx {}",
                            tool, event.idx
                        ));
                    }
                }
            }
            _ => {
                if let Some(err) = &event.error {
                    if let Some(detail) = err.strip_prefix("adapter_error: ") {
                        issues.push(format!("adapter error at idx {}: {}", event.idx, detail));
                    }
                }
            }
        }
    }

    for (idx, tool) in open_calls {
        issues.push(format!(
            "tool_call '{}' at idx {} has no tool_result",
            tool, idx
        ));
    }
}

fn is_lower_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EvalCase;
    use serde_json::json;

    fn case_with_trace(trace: serde_json::Value) -> EvalCase {
        serde_json::from_value(json!({
            "case_id": "c1",
            "input": "hi",
            "trace": trace,
        }))
        .unwrap()
    }

    #[test]
    fn clean_trace_has_no_issues() {
        let case = case_with_trace(json!([
            { "idx": 0, "ts": "", "actor": "user", "type": "message", "input": "hi" },
            { "idx": 1, "ts": "", "actor": "assistant", "type": "tool_call", "tool": "search" },
            { "idx": 2, "ts": "", "actor": "tool", "type": "tool_result", "tool": "search" },
            { "idx": 3, "ts": "", "actor": "assistant", "type": "message", "output": "ok" }
        ]));
        assert!(validate_trace(&case).is_empty());
    }

    #[test]
    fn flags_non_monotonic_idx_and_dangling_call() {
        let case = case_with_trace(json!([
            { "idx": 1, "ts": "", "actor": "user", "type": "message" },
            { "idx": 1, "ts": "", "actor": "assistant", "type": "tool_call", "tool": "search" }
        ]));
        let issues = validate_trace(&case);
        assert!(issues.iter().any(|i| i.contains("non-monotonic")));
        assert!(issues.iter().any(|i| i.contains("no tool_result")));
    }

    #[test]
    fn flags_tool_name_mismatch_in_result() {
        let case = case_with_trace(json!([
            { "idx": 0, "ts": "", "actor": "assistant", "type": "tool_call", "tool": "search" },
            { "idx": 1, "ts": "", "actor": "tool", "type": "tool_result", "tool": "fetch" }
        ]));
        let issues = validate_trace(&case);
        assert!(issues.iter().any(|i| i.contains("answers 'fetch'")));
    }

    #[test]
    fn flags_adapter_errors_on_message_events() {
        let case = case_with_trace(json!([
            { "idx": 0, "ts": "", "actor": "user", "type": "message", "input": "hi" },
            { "idx": 1, "ts": "", "actor": "assistant", "type": "message",
              "error": "adapter_error: adapter 'sh' exited with 1" }
        ]));
        let issues = validate_trace(&case);
        assert!(issues.iter().any(|i| i.contains("adapter error at idx 1")));
    }

    #[test]
    fn flags_unresolved_tools() {
        let case = case_with_trace(json!([
            { "idx": 0, "ts": "", "actor": "assistant", "type": "tool_call", "tool": "fetch" },
            { "idx": 1, "ts": "", "actor": "tool", "type": "tool_result", "tool": "fetch",
              "error": "unresolved_tool: fetch" }
        ]));
        let issues = validate_trace(&case);
        assert!(issues.iter().any(|i| i.contains("unresolved tool 'fetch'")));
    }

    #[test]
    fn flags_malformed_ids_timestamps_and_latency() {
        let case = case_with_trace(json!([
            { "idx": 0, "ts": "not-a-time", "actor": "user", "type": "message",
              "trace_id": "XYZ", "span_id": "0000000000000001", "latency_ms": -5 },
            { "idx": 1, "ts": "2026-01-01T00:00:00Z", "actor": "assistant", "type": "message",
              "span_id": "0000000000000001" }
        ]));
        let issues = validate_trace(&case);
        assert!(issues.iter().any(|i| i.contains("malformed ts")));
        assert!(issues.iter().any(|i| i.contains("malformed trace_id")));
        assert!(issues.iter().any(|i| i.contains("reuses span_id")));
        assert!(issues.iter().any(|i| i.contains("negative latency_ms")));
    }

    #[test]
    fn unrecorded_optional_fields_are_tolerated() {
        let case = case_with_trace(json!([
            { "idx": 0, "ts": "", "actor": "user", "type": "message", "input": "hi" }
        ]));
        assert!(validate_trace(&case).is_empty());
    }

    #[test]
    fn flags_orphan_result() {
        let case = case_with_trace(json!([
            { "idx": 0, "ts": "", "actor": "tool", "type": "tool_result", "tool": "search" }
        ]));
        let issues = validate_trace(&case);
        assert!(issues.iter().any(|i| i.contains("without a preceding tool_call")));
    }
}
