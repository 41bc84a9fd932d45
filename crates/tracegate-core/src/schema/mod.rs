//! Suite schema governance: versioned validation plus an explicit directed
//! chain of pure upgrade functions, one per version hop.

use crate::errors::{codes, Diagnostic};
use crate::fingerprint;
use anyhow::Result;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

pub const LATEST_SCHEMA_VERSION: &str = "1.0.0";
pub const SUPPORTED_SCHEMA_VERSIONS: &[&str] = &["0.1.0", "1.0.0"];

const SUITE_ALLOWED_KEYS: &[&str] = &["dataset_id", "cases", "metadata"];
const CASE_ALLOWED_KEYS: &[&str] = &[
    "case_id",
    "input",
    "expected_output",
    "expected",
    "trace",
    "tool_contracts",
    "policy",
    "regex_patterns",
    "regex",
    "json_schema",
    "metadata",
];
const TRACE_ALLOWED_KEYS: &[&str] = &[
    "idx",
    "ts",
    "actor",
    "type",
    "input",
    "output",
    "tool",
    "error",
    "latency_ms",
    "trace_id",
    "span_id",
    "parent_span_id",
    "attributes",
    "attempt",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaErrorKind {
    UnknownField,
    MissingRequired,
    TypeMismatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaIssue {
    pub kind: SchemaErrorKind,
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub errors: Vec<SchemaIssue>,
    pub warnings: Vec<String>,
    pub schema_version: Option<String>,
}

fn issue(kind: SchemaErrorKind, path: impl Into<String>, message: impl Into<String>) -> SchemaIssue {
    SchemaIssue {
        kind,
        path: path.into(),
        message: message.into(),
    }
}

fn declared_version(payload: &Value) -> Option<String> {
    payload
        .pointer("/metadata/schema_version")
        .and_then(|v| v.as_str())
        .map(String::from)
}

/// Validates a suite payload against the given rules. Missing required
/// fields fail regardless of strictness; unrecognized fields fail only
/// under `strict`.
pub fn validate_suite_payload(
    payload: &Value,
    strict: bool,
    require_version: Option<&str>,
) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    match payload.get("dataset_id") {
        None => errors.push(issue(
            SchemaErrorKind::MissingRequired,
            "dataset_id",
            "dataset_id is required",
        )),
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(Value::String(_)) => errors.push(issue(
            SchemaErrorKind::MissingRequired,
            "dataset_id",
            "dataset_id must be non-empty",
        )),
        Some(_) => errors.push(issue(
            SchemaErrorKind::TypeMismatch,
            "dataset_id",
            "dataset_id must be a string",
        )),
    }

    if strict {
        if let Some(map) = payload.as_object() {
            for key in map.keys() {
                if !SUITE_ALLOWED_KEYS.contains(&key.as_str()) {
                    errors.push(issue(
                        SchemaErrorKind::UnknownField,
                        key.clone(),
                        format!("suite has unknown key '{key}'"),
                    ));
                }
            }
        }
    }

    let schema_version = declared_version(payload);
    match &schema_version {
        None => warnings.push("metadata.schema_version missing".to_string()),
        Some(v) if !SUPPORTED_SCHEMA_VERSIONS.contains(&v.as_str()) => errors.push(issue(
            SchemaErrorKind::TypeMismatch,
            "metadata.schema_version",
            format!(
                "schema_version '{}' is unsupported (supported: {})",
                v,
                SUPPORTED_SCHEMA_VERSIONS.join(", ")
            ),
        )),
        Some(_) => {}
    }
    if let Some(required) = require_version {
        if schema_version.as_deref() != Some(required) {
            errors.push(issue(
                SchemaErrorKind::MissingRequired,
                "metadata.schema_version",
                format!(
                    "metadata.schema_version must be '{}', got '{}'",
                    required,
                    schema_version.as_deref().unwrap_or("<missing>")
                ),
            ));
        }
    }

    match payload.get("cases") {
        None => errors.push(issue(
            SchemaErrorKind::MissingRequired,
            "cases",
            "cases is required",
        )),
        Some(Value::Array(cases)) => {
            for (ci, case) in cases.iter().enumerate() {
                validate_case(case, ci, strict, &mut errors);
            }
        }
        Some(_) => errors.push(issue(
            SchemaErrorKind::TypeMismatch,
            "cases",
            "cases must be an array",
        )),
    }

    ValidationReport {
        passed: errors.is_empty(),
        errors,
        warnings,
        schema_version,
    }
}

fn validate_case(case: &Value, ci: usize, strict: bool, errors: &mut Vec<SchemaIssue>) {
    let base = format!("cases[{ci}]");
    let Some(map) = case.as_object() else {
        errors.push(issue(
            SchemaErrorKind::TypeMismatch,
            base.clone(),
            "case must be an object",
        ));
        return;
    };

    match map.get("case_id") {
        Some(Value::String(s)) if !s.is_empty() => {}
        Some(Value::String(_)) | None => errors.push(issue(
            SchemaErrorKind::MissingRequired,
            format!("{base}.case_id"),
            "case_id must be a non-empty string",
        )),
        Some(_) => errors.push(issue(
            SchemaErrorKind::TypeMismatch,
            format!("{base}.case_id"),
            "case_id must be a string",
        )),
    }

    if strict {
        for key in map.keys() {
            if !CASE_ALLOWED_KEYS.contains(&key.as_str()) {
                errors.push(issue(
                    SchemaErrorKind::UnknownField,
                    format!("{base}.{key}"),
                    format!("case has unknown key '{key}'"),
                ));
            }
        }
    }

    match map.get("trace") {
        None => {}
        Some(Value::Array(trace)) => {
            for (ei, event) in trace.iter().enumerate() {
                validate_event(event, &base, ei, strict, errors);
            }
        }
        Some(_) => errors.push(issue(
            SchemaErrorKind::TypeMismatch,
            format!("{base}.trace"),
            "trace must be an array",
        )),
    }
}

fn validate_event(
    event: &Value,
    case_path: &str,
    ei: usize,
    strict: bool,
    errors: &mut Vec<SchemaIssue>,
) {
    let base = format!("{case_path}.trace[{ei}]");
    let Some(map) = event.as_object() else {
        errors.push(issue(
            SchemaErrorKind::TypeMismatch,
            base.clone(),
            "trace event must be an object",
        ));
        return;
    };

    if strict {
        for key in map.keys() {
            if !TRACE_ALLOWED_KEYS.contains(&key.as_str()) {
                errors.push(issue(
                    SchemaErrorKind::UnknownField,
                    format!("{base}.{key}"),
                    format!("trace event has unknown key '{key}'"),
                ));
            }
        }
    }

    for required in ["idx", "actor", "type"] {
        if !map.contains_key(required) {
            errors.push(issue(
                SchemaErrorKind::MissingRequired,
                format!("{base}.{required}"),
                format!("trace event missing required key '{required}'"),
            ));
        }
    }
    let typed_fields: [(&str, fn(&Value) -> bool); 4] = [
        ("trace_id", Value::is_string),
        ("span_id", Value::is_string),
        ("parent_span_id", Value::is_string),
        ("attributes", Value::is_object),
    ];
    for (key, check) in typed_fields {
        if let Some(v) = map.get(key) {
            if !v.is_null() && !check(v) {
                errors.push(issue(
                    SchemaErrorKind::TypeMismatch,
                    format!("{base}.{key}"),
                    format!("trace event field '{key}' has the wrong type"),
                ));
            }
        }
    }
}

type UpgradeFn = fn(Value) -> Value;

/// The migration chain: a directed list of pure upgrade hops. Migration
/// walks the chain from the document's declared version to the target.
const UPGRADE_CHAIN: &[(&str, &str, UpgradeFn)] = &[("0.1.0", "1.0.0", upgrade_0_1_to_1_0)];

/// Applies the minimal chain of upgrades to reach `target_version`.
pub fn migrate_suite_payload(payload: &Value, target_version: &str) -> Result<Value> {
    if !SUPPORTED_SCHEMA_VERSIONS.contains(&target_version) {
        return Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_MIGRATION,
                format!(
                    "unsupported target schema version '{}' (supported: {})",
                    target_version,
                    SUPPORTED_SCHEMA_VERSIONS.join(", ")
                ),
            )
            .with_details(json!({ "target_version": target_version })),
        ));
    }

    // Documents without a declared version predate versioning: oldest hop.
    let mut version = declared_version(payload).unwrap_or_else(|| "0.1.0".to_string());
    if !SUPPORTED_SCHEMA_VERSIONS.contains(&version.as_str()) {
        return Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_MIGRATION,
                format!("no migration chain from schema version '{version}'"),
            )
            .with_details(json!({ "declared_version": version })),
        ));
    }

    let mut doc = payload.clone();
    while version != target_version {
        let hop = UPGRADE_CHAIN.iter().find(|(from, _, _)| *from == version);
        let Some((_, to, upgrade)) = hop else {
            return Err(anyhow::Error::new(
                Diagnostic::new(
                    codes::E_MIGRATION,
                    format!("no migration chain from '{version}' to '{target_version}'"),
                )
                .with_details(json!({ "from": version, "to": target_version })),
            ));
        };
        doc = upgrade(doc);
        version = to.to_string();
    }

    stamp_version(&mut doc, target_version);
    Ok(doc)
}

fn stamp_version(doc: &mut Value, version: &str) {
    if !doc.get("metadata").map(Value::is_object).unwrap_or(false) {
        doc["metadata"] = json!({});
    }
    doc["metadata"]["schema_version"] = json!(version);
}

/// 0.1.0 -> 1.0.0: canonicalize aliases, default the required event fields,
/// and synthesize deterministic trace/span ids where absent.
fn upgrade_0_1_to_1_0(mut doc: Value) -> Value {
    let dataset_id = doc
        .get("dataset_id")
        .and_then(|v| v.as_str())
        .unwrap_or("dataset-unknown")
        .to_string();
    doc["dataset_id"] = json!(dataset_id);

    let cases = match doc.get_mut("cases").and_then(Value::as_array_mut) {
        Some(cases) => std::mem::take(cases),
        None => Vec::new(),
    };
    let normalized: Vec<Value> = cases
        .into_iter()
        .filter(|c| c.is_object())
        .map(|c| normalize_case(c, &dataset_id))
        .collect();
    doc["cases"] = Value::Array(normalized);
    doc
}

fn normalize_case(mut case: Value, dataset_id: &str) -> Value {
    let case_id = case
        .get("case_id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    case["case_id"] = json!(case_id);

    if case.get("expected_output").is_none() {
        if let Some(v) = case.get("expected").cloned() {
            case["expected_output"] = v;
        }
    }
    case.as_object_mut().map(|m| m.remove("expected"));
    if case.get("regex_patterns").is_none() {
        if let Some(v) = case.get("regex").cloned() {
            case["regex_patterns"] = v;
        }
    }
    case.as_object_mut().map(|m| m.remove("regex"));

    let contracts = case.get("tool_contracts").cloned().unwrap_or(json!({}));
    let mut normalized_contracts = serde_json::Map::new();
    if let Value::Object(map) = contracts {
        for (tool, contract) in map {
            let Value::Object(contract) = contract else {
                continue;
            };
            let required = contract
                .get("required_args")
                .or_else(|| contract.get("required"))
                .cloned()
                .unwrap_or(json!([]));
            let forbidden = contract
                .get("forbidden_args")
                .or_else(|| contract.get("forbidden"))
                .cloned()
                .unwrap_or(json!([]));
            normalized_contracts.insert(
                tool,
                json!({ "required_args": required, "forbidden_args": forbidden }),
            );
        }
    }
    case["tool_contracts"] = Value::Object(normalized_contracts);

    let policy = case.get("policy").cloned().unwrap_or(json!({}));
    case["policy"] = json!({
        "forbidden_tools": policy.get("forbidden_tools").cloned().unwrap_or(json!([])),
        "required_tools": policy.get("required_tools").cloned().unwrap_or(json!([])),
    });

    if !case.get("metadata").map(Value::is_object).unwrap_or(false) {
        case["metadata"] = json!({});
    }

    let trace = match case.get_mut("trace").and_then(Value::as_array_mut) {
        Some(trace) => std::mem::take(trace),
        None => Vec::new(),
    };
    let trace_id = fingerprint::sha256_hex(&format!("{dataset_id}:{case_id}"))[..32].to_string();
    let normalized_trace: Vec<Value> = trace
        .into_iter()
        .filter(|e| e.is_object())
        .enumerate()
        .map(|(index, mut event)| {
            let idx = event.get("idx").and_then(|v| v.as_u64()).unwrap_or(index as u64);
            event["idx"] = json!(idx);
            if !event.get("ts").map(Value::is_string).unwrap_or(false) {
                event["ts"] = json!("");
            }
            if !event.get("actor").map(Value::is_string).unwrap_or(false) {
                event["actor"] = json!("");
            }
            if !event.get("type").map(Value::is_string).unwrap_or(false) {
                event["type"] = json!("");
            }
            if !event
                .get("attributes")
                .map(Value::is_object)
                .unwrap_or(false)
            {
                event["attributes"] = json!({});
            }
            if event
                .get("trace_id")
                .and_then(|v| v.as_str())
                .map(str::is_empty)
                .unwrap_or(true)
            {
                event["trace_id"] = json!(trace_id);
            }
            if event
                .get("span_id")
                .and_then(|v| v.as_str())
                .map(str::is_empty)
                .unwrap_or(true)
            {
                event["span_id"] = json!(fingerprint::span_id(index as u64 + 1));
            }
            if event.get("parent_span_id").map(Value::is_null).unwrap_or(true) && index > 0 {
                event["parent_span_id"] = json!(fingerprint::span_id(index as u64));
            }
            event
        })
        .collect();
    case["trace"] = Value::Array(normalized_trace);
    case
}

pub fn validate_suite_file(
    input: &Path,
    strict: bool,
    require_version: Option<&str>,
) -> Result<ValidationReport> {
    let payload = load_json_object(input)?;
    Ok(validate_suite_payload(&payload, strict, require_version))
}

pub fn migrate_suite_file(input: &Path, output: &Path, target_version: &str) -> Result<ValidationReport> {
    let payload = load_json_object(input)?;
    let migrated = migrate_suite_payload(&payload, target_version)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut text = serde_json::to_string_pretty(&migrated)?;
    text.push('\n');
    std::fs::write(output, text)?;
    Ok(validate_suite_payload(&migrated, true, Some(target_version)))
}

pub fn load_json_object(path: &Path) -> Result<Value> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        anyhow::Error::new(
            Diagnostic::new(
                codes::E_PATH_NOT_FOUND,
                format!("failed to read '{}': {}", path.display(), e),
            )
            .with_details(json!({ "path": path })),
        )
    })?;
    let payload: Value = serde_json::from_str(&raw).map_err(|e| {
        anyhow::Error::new(
            Diagnostic::new(
                codes::E_SCHEMA,
                format!("'{}' is not valid JSON: {}", path.display(), e),
            )
            .with_details(json!({ "path": path })),
        )
    })?;
    if !payload.is_object() {
        return Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_SCHEMA,
                format!("'{}' must contain a JSON object", path.display()),
            )
            .with_details(json!({ "path": path })),
        ));
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_suite() -> Value {
        json!({
            "dataset_id": "demo",
            "cases": [{
                "case_id": "c1",
                "expected": "ok",
                "regex": ["ok"],
                "tool_contracts": { "search": { "required": ["query"] } },
                "trace": [
                    { "actor": "user", "type": "message", "input": "hi" },
                    { "actor": "assistant", "type": "message", "output": "ok" }
                ]
            }]
        })
    }

    #[test]
    fn migrate_then_strict_validate_succeeds() {
        let migrated = migrate_suite_payload(&legacy_suite(), LATEST_SCHEMA_VERSION).unwrap();
        let report = validate_suite_payload(&migrated, true, Some(LATEST_SCHEMA_VERSION));
        assert!(report.passed, "errors: {:?}", report.errors);
        assert_eq!(
            migrated["cases"][0]["tool_contracts"]["search"]["required_args"],
            json!(["query"])
        );
        assert_eq!(migrated["cases"][0]["trace"][0]["idx"], json!(0));
        assert_eq!(
            migrated["cases"][0]["trace"][1]["parent_span_id"],
            json!("0000000000000001")
        );
    }

    #[test]
    fn migration_is_idempotent() {
        let once = migrate_suite_payload(&legacy_suite(), LATEST_SCHEMA_VERSION).unwrap();
        let twice = migrate_suite_payload(&once, LATEST_SCHEMA_VERSION).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn unknown_declared_version_has_no_chain() {
        let mut payload = legacy_suite();
        payload["metadata"] = json!({ "schema_version": "9.9.9" });
        let err = migrate_suite_payload(&payload, LATEST_SCHEMA_VERSION).unwrap_err();
        let diag = crate::errors::try_map_error(&err).unwrap();
        assert_eq!(diag.code, codes::E_MIGRATION);
    }

    #[test]
    fn strict_flags_unknown_fields() {
        let mut payload = migrate_suite_payload(&legacy_suite(), LATEST_SCHEMA_VERSION).unwrap();
        payload["surprise"] = json!(1);
        let report = validate_suite_payload(&payload, true, None);
        assert!(!report.passed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == SchemaErrorKind::UnknownField && e.path == "surprise"));

        // lenient mode tolerates the same document
        let lenient = validate_suite_payload(&payload, false, None);
        assert!(lenient.passed);
    }

    #[test]
    fn missing_required_fails_even_lenient() {
        let payload = json!({ "cases": [] });
        let report = validate_suite_payload(&payload, false, None);
        assert!(!report.passed);
        assert!(report
            .errors
            .iter()
            .any(|e| e.kind == SchemaErrorKind::MissingRequired && e.path == "dataset_id"));
    }

    #[test]
    fn require_version_is_enforced() {
        let migrated = migrate_suite_payload(&legacy_suite(), LATEST_SCHEMA_VERSION).unwrap();
        let report = validate_suite_payload(&migrated, false, Some("0.1.0"));
        assert!(!report.passed);
    }
}
