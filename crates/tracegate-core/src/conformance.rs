//! Contract checks run in CI: every stored schema fixture must still
//! migrate and validate, and every provider's normalized adapter output
//! must cover the core event types.

use crate::schema;
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const KNOWN_PROVIDERS: &[&str] = &["openai", "anthropic", "vertex", "foundry"];
const CORE_EVENT_TYPES: &[&str] = &["message", "tool_call", "tool_result"];

#[derive(Debug, Clone, Serialize)]
pub struct FixtureOutcome {
    pub fixture: String,
    pub passed: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderCoverage {
    pub provider: String,
    pub fixtures: usize,
    pub event_types: BTreeSet<String>,
    pub missing_event_types: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConformanceReport {
    pub passed: bool,
    pub fixtures: Vec<FixtureOutcome>,
    pub providers: Vec<ProviderCoverage>,
}

fn sorted_json_fixtures(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut fixtures = Vec::new();
    if !dir.is_dir() {
        return Ok(fixtures);
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            fixtures.push(path);
        }
    }
    fixtures.sort();
    Ok(fixtures)
}

fn check_fixture(path: &Path) -> FixtureOutcome {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let outcome = schema::load_json_object(path)
        .and_then(|payload| schema::migrate_suite_payload(&payload, schema::LATEST_SCHEMA_VERSION));
    match outcome {
        Ok(migrated) => {
            let report = schema::validate_suite_payload(
                &migrated,
                true,
                Some(schema::LATEST_SCHEMA_VERSION),
            );
            FixtureOutcome {
                fixture: name,
                passed: report.passed,
                issues: report
                    .errors
                    .iter()
                    .map(|e| format!("{}: {}", e.path, e.message))
                    .collect(),
            }
        }
        Err(e) => FixtureOutcome {
            fixture: name,
            passed: false,
            issues: vec![e.to_string()],
        },
    }
}

/// Back-compat check: every fixture, at any supported schema version, must
/// migrate to the latest version and strictly validate.
pub fn check_schema_fixtures(dir: &Path) -> Result<ConformanceReport> {
    let mut fixtures = Vec::new();
    for path in sorted_json_fixtures(dir)? {
        debug!(fixture = %path.display(), "checking schema fixture");
        fixtures.push(check_fixture(&path));
    }
    let passed = !fixtures.is_empty() && fixtures.iter().all(|f| f.passed);
    Ok(ConformanceReport {
        passed,
        fixtures,
        providers: Vec::new(),
    })
}

/// Adapter conformance: fixtures are named `<provider>-*.json` and hold
/// already-normalized suite payloads. Every known provider must carry at
/// least `min_fixtures_per_provider` passing fixtures, and each provider's
/// fixtures must jointly cover every core event type.
pub fn check_adapter_fixtures(
    dir: &Path,
    min_fixtures_per_provider: usize,
) -> Result<ConformanceReport> {
    let mut fixtures = Vec::new();
    let mut coverage: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for provider in KNOWN_PROVIDERS {
        coverage.insert(provider.to_string(), BTreeSet::new());
    }

    for path in sorted_json_fixtures(dir)? {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let provider = name.split('-').next().unwrap_or("").to_string();
        let mut outcome = check_fixture(&path);
        if !KNOWN_PROVIDERS.contains(&provider.as_str()) {
            outcome.passed = false;
            outcome
                .issues
                .push(format!("unknown provider prefix '{provider}'"));
        } else if outcome.passed {
            *counts.entry(provider.clone()).or_default() += 1;
            let seen = coverage.entry(provider).or_default();
            if let Ok(payload) = schema::load_json_object(&path) {
                collect_event_types(&payload, seen);
            }
        }
        fixtures.push(outcome);
    }

    let providers: Vec<ProviderCoverage> = coverage
        .into_iter()
        .map(|(provider, event_types)| {
            let missing: Vec<String> = CORE_EVENT_TYPES
                .iter()
                .filter(|t| !event_types.contains(**t))
                .map(|t| t.to_string())
                .collect();
            ProviderCoverage {
                fixtures: counts.get(&provider).copied().unwrap_or(0),
                provider,
                event_types,
                missing_event_types: missing,
            }
        })
        .collect();

    let passed = !fixtures.is_empty()
        && fixtures.iter().all(|f| f.passed)
        && providers
            .iter()
            .all(|p| p.missing_event_types.is_empty() && p.fixtures >= min_fixtures_per_provider);
    Ok(ConformanceReport {
        passed,
        fixtures,
        providers,
    })
}

fn collect_event_types(payload: &Value, seen: &mut BTreeSet<String>) {
    let Some(cases) = payload.get("cases").and_then(Value::as_array) else {
        return;
    };
    for case in cases {
        let Some(trace) = case.get("trace").and_then(Value::as_array) else {
            continue;
        };
        for event in trace {
            if let Some(t) = event.get("type").and_then(Value::as_str) {
                seen.insert(t.to_string());
            }
        }
    }
}

/// Runs both checks and merges them into one report.
pub fn contracts_check(
    schema_dir: &Path,
    adapter_dir: &Path,
    min_fixtures_per_provider: usize,
) -> Result<ConformanceReport> {
    let schemas = check_schema_fixtures(schema_dir)?;
    let adapters = check_adapter_fixtures(adapter_dir, min_fixtures_per_provider)?;
    let passed = schemas.passed && adapters.passed;
    let mut fixtures = schemas.fixtures;
    fixtures.extend(adapters.fixtures);
    Ok(ConformanceReport {
        passed,
        fixtures,
        providers: adapters.providers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, payload: &Value) {
        fs::write(dir.join(name), serde_json::to_string_pretty(payload).unwrap()).unwrap();
    }

    fn full_trace_suite(dataset: &str) -> Value {
        json!({
            "dataset_id": dataset,
            "cases": [{
                "case_id": "c1",
                "input": "hi",
                "trace": [
                    { "idx": 0, "actor": "user", "type": "message", "input": "hi" },
                    { "idx": 1, "actor": "assistant", "type": "tool_call", "tool": "search" },
                    { "idx": 2, "actor": "tool", "type": "tool_result", "tool": "search" },
                    { "idx": 3, "actor": "assistant", "type": "message", "output": "ok" }
                ]
            }]
        })
    }

    #[test]
    fn schema_fixtures_must_all_migrate() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "v0.json", &full_trace_suite("legacy"));
        let mut current = full_trace_suite("current");
        current["metadata"] = json!({ "schema_version": "1.0.0" });
        // current-version fixtures still need full event defaults
        let migrated = schema::migrate_suite_payload(&current, "1.0.0").unwrap();
        write(dir.path(), "v1.json", &migrated);

        let report = check_schema_fixtures(dir.path()).unwrap();
        assert!(report.passed, "fixtures: {:?}", report.fixtures);
        assert_eq!(report.fixtures.len(), 2);
    }

    #[test]
    fn empty_fixture_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!check_schema_fixtures(dir.path()).unwrap().passed);
    }

    #[test]
    fn adapter_coverage_requires_all_event_types() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "openai-full.json", &full_trace_suite("openai-ds"));
        // anthropic fixture lacks tool events
        write(
            dir.path(),
            "anthropic-minimal.json",
            &json!({
                "dataset_id": "anthropic-ds",
                "cases": [{
                    "case_id": "c1",
                    "input": "hi",
                    "trace": [
                        { "idx": 0, "actor": "user", "type": "message", "input": "hi" }
                    ]
                }]
            }),
        );
        let report = check_adapter_fixtures(dir.path(), 1).unwrap();
        assert!(!report.passed);
        let anthropic = report
            .providers
            .iter()
            .find(|p| p.provider == "anthropic")
            .unwrap();
        assert_eq!(
            anthropic.missing_event_types,
            vec!["tool_call", "tool_result"]
        );
        let openai = report.providers.iter().find(|p| p.provider == "openai").unwrap();
        assert!(openai.missing_event_types.is_empty());
    }

    #[test]
    fn providers_below_the_fixture_floor_fail() {
        let dir = tempfile::tempdir().unwrap();
        for provider in KNOWN_PROVIDERS {
            write(
                dir.path(),
                &format!("{provider}-one.json"),
                &full_trace_suite(&format!("{provider}-ds")),
            );
        }
        assert!(check_adapter_fixtures(dir.path(), 1).unwrap().passed);
        assert!(!check_adapter_fixtures(dir.path(), 2).unwrap().passed);
    }

    #[test]
    fn unknown_provider_prefix_fails() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "mystery-x.json", &full_trace_suite("ds"));
        let report = check_adapter_fixtures(dir.path(), 1).unwrap();
        assert!(!report.passed);
        assert!(report.fixtures[0]
            .issues
            .iter()
            .any(|i| i.contains("unknown provider")));
    }
}
