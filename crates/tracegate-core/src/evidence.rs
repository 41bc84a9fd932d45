//! Evidence packs: the on-disk artifact of a run. A pack is staged in a
//! sibling temp directory and renamed into place, with the manifest
//! written last, so readers never observe a partial pack.

use crate::errors::{codes, Diagnostic};
use crate::fingerprint;
use crate::model::{CaseResult, EvalCase, EvalSuite, RunConfig, RunSummary, SCHEMA_VERSION};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const MANIFEST_FILE: &str = "manifest.json";

pub struct EvidencePack {
    pub root: PathBuf,
}

/// Writes one complete pack under `dest`. Layout:
///
/// ```text
/// manifest.json
/// run/config.json  run/summary.json  run/events.jsonl
/// judges/<judge_id>.json
/// cases/<case_id>/trajectory.json
/// cases/<case_id>/verdicts.json
/// cases/<case_id>/artifacts/
/// report.json
/// ```
pub fn write_evidence_pack(
    dest: &Path,
    config: &RunConfig,
    suite: &EvalSuite,
    results: &[CaseResult],
    summary: &RunSummary,
    report: &Value,
) -> Result<EvidencePack> {
    let parent = dest.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let staging = parent.join(format!(
        ".tmp-{}-{}",
        std::process::id(),
        dest.file_name().and_then(|n| n.to_str()).unwrap_or("pack")
    ));
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    fs::create_dir_all(&staging)?;

    let outcome = stage_pack(&staging, config, suite, results, summary, report);
    if let Err(e) = outcome {
        let _ = fs::remove_dir_all(&staging);
        return Err(e);
    }

    if dest.exists() {
        fs::remove_dir_all(dest)
            .with_context(|| format!("replacing existing pack at '{}'", dest.display()))?;
    }
    fs::rename(&staging, dest)
        .with_context(|| format!("publishing pack to '{}'", dest.display()))?;
    info!(pack = %dest.display(), cases = results.len(), "evidence pack written");
    Ok(EvidencePack {
        root: dest.to_path_buf(),
    })
}

fn stage_pack(
    staging: &Path,
    config: &RunConfig,
    suite: &EvalSuite,
    results: &[CaseResult],
    summary: &RunSummary,
    report: &Value,
) -> Result<()> {
    let run_dir = staging.join("run");
    fs::create_dir_all(&run_dir)?;
    write_json(&run_dir.join("config.json"), &serde_json::to_value(config)?)?;
    write_json(&run_dir.join("summary.json"), &serde_json::to_value(summary)?)?;
    write_events(&run_dir.join("events.jsonl"), suite, results)?;

    let judges_dir = staging.join("judges");
    fs::create_dir_all(&judges_dir)?;
    for (judge_id, doc) in judge_documents(config, results) {
        write_json(&judges_dir.join(format!("{judge_id}.json")), &doc)?;
    }

    let cases_dir = staging.join("cases");
    for case in &suite.cases {
        let case_dir = cases_dir.join(&case.case_id);
        fs::create_dir_all(case_dir.join("artifacts"))?;
        write_json(
            &case_dir.join("trajectory.json"),
            &serde_json::to_value(case)?,
        )?;
        let verdicts = results
            .iter()
            .find(|r| r.case_id == case.case_id)
            .map(serde_json::to_value)
            .transpose()?
            .unwrap_or(Value::Null);
        write_json(&case_dir.join("verdicts.json"), &verdicts)?;
    }

    write_json(&staging.join("report.json"), report)?;

    // manifest last: its presence marks the pack complete
    let manifest = build_manifest(staging, config, summary)?;
    write_json(&staging.join(MANIFEST_FILE), &manifest)?;
    Ok(())
}

fn write_events(path: &Path, suite: &EvalSuite, results: &[CaseResult]) -> Result<()> {
    let mut lines = String::new();
    for case in &suite.cases {
        for event in &case.trace {
            let mut line = serde_json::to_value(event)?;
            line["case_id"] = json!(case.case_id);
            lines.push_str(&serde_json::to_string(&line)?);
            lines.push('\n');
        }
    }
    for result in results {
        lines.push_str(&serde_json::to_string(&json!({
            "type": "case_verdict",
            "case_id": result.case_id,
            "passed": result.passed,
            "hard_failed": result.hard_failed,
        }))?);
        lines.push('\n');
    }
    fs::write(path, lines)?;
    Ok(())
}

fn judge_documents(config: &RunConfig, results: &[CaseResult]) -> BTreeMap<String, Value> {
    let mut docs: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for result in results {
        for jr in &result.judge_results {
            docs.entry(jr.judge_id.clone())
                .or_default()
                .push(serde_json::to_value(jr).unwrap_or(Value::Null));
        }
    }
    docs.into_iter()
        .map(|(judge_id, verdicts)| {
            let config_blob = config
                .judge_configs
                .get(&judge_id)
                .cloned()
                .unwrap_or(Value::Null);
            let doc = json!({
                "judge_id": judge_id,
                "config": config_blob,
                "verdicts": verdicts,
            });
            (judge_id, doc)
        })
        .collect()
}

fn build_manifest(staging: &Path, config: &RunConfig, summary: &RunSummary) -> Result<Value> {
    let mut files = BTreeMap::new();
    collect_checksums(staging, staging, &mut files)?;
    Ok(json!({
        "schema_version": SCHEMA_VERSION,
        "run_id": config.run_id,
        "dataset_id": config.dataset_id,
        "created_at": crate::model::utc_now_iso(),
        "pass_rate": summary.pass_rate,
        "hard_fail_rate": summary.hard_fail_rate,
        "files": files,
    }))
}

fn collect_checksums(
    root: &Path,
    dir: &Path,
    files: &mut BTreeMap<String, String>,
) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_checksums(root, &path, files)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");
            files.insert(rel, fingerprint::sha256_file(&path)?);
        }
    }
    Ok(())
}

fn write_json(path: &Path, value: &Value) -> Result<()> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text).with_context(|| format!("writing '{}'", path.display()))?;
    Ok(())
}

fn pack_file(pack: &Path, rel: &str) -> Result<Value> {
    let path = pack.join(rel);
    crate::schema::load_json_object(&path)
}

pub fn is_evidence_pack(path: &Path) -> bool {
    path.is_dir() && path.join(MANIFEST_FILE).is_file()
}

/// Attaches a comparison-stage artifact (`compare/<name>`) to an existing
/// pack. These land after the manifest, so they are not part of its
/// checksummed file list.
pub fn write_compare_artifact(pack: &Path, name: &str, value: &Value) -> Result<()> {
    if !is_evidence_pack(pack) {
        return Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_PATH_NOT_FOUND,
                format!("'{}' is not an evidence pack", pack.display()),
            )
            .with_details(json!({ "path": pack })),
        ));
    }
    let dir = pack.join("compare");
    fs::create_dir_all(&dir)?;
    write_json(&dir.join(name), value)
}

pub fn read_run_config(pack: &Path) -> Result<RunConfig> {
    let value = pack_file(pack, "run/config.json")?;
    Ok(serde_json::from_value(value)?)
}

pub fn read_summary(pack: &Path) -> Result<RunSummary> {
    let value = pack_file(pack, "run/summary.json")?;
    Ok(serde_json::from_value(value)?)
}

pub fn read_case_results(pack: &Path) -> Result<Vec<CaseResult>> {
    let cases_dir = pack.join("cases");
    let mut results = Vec::new();
    if !cases_dir.is_dir() {
        return Ok(results);
    }
    let mut entries: Vec<_> = fs::read_dir(&cases_dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let verdicts = entry.path().join("verdicts.json");
        if verdicts.is_file() {
            let value = crate::schema::load_json_object(&verdicts)?;
            results.push(serde_json::from_value(value)?);
        }
    }
    Ok(results)
}

pub fn read_suite_from_pack(pack: &Path) -> Result<EvalSuite> {
    let config = read_run_config(pack)?;
    let cases_dir = pack.join("cases");
    let mut cases: Vec<EvalCase> = Vec::new();
    if cases_dir.is_dir() {
        let mut entries: Vec<_> = fs::read_dir(&cases_dir)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let trajectory = entry.path().join("trajectory.json");
            if trajectory.is_file() {
                let value = crate::schema::load_json_object(&trajectory)?;
                cases.push(serde_json::from_value(value)?);
            }
        }
    }
    Ok(EvalSuite {
        dataset_id: config.dataset_id,
        cases,
        metadata: BTreeMap::new(),
    })
}

/// Resolves either a pack directory or a bare summary file to its summary.
pub fn read_summary_flexible(path: &Path) -> Result<RunSummary> {
    if is_evidence_pack(path) {
        read_summary(path)
    } else if path.is_file() {
        let value = crate::schema::load_json_object(path)?;
        Ok(serde_json::from_value(value)?)
    } else {
        Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_PATH_NOT_FOUND,
                format!("'{}' is neither an evidence pack nor a summary file", path.display()),
            )
            .with_details(json!({ "path": path })),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fixtures() -> (RunConfig, EvalSuite, Vec<CaseResult>, RunSummary) {
        let config: RunConfig = serde_json::from_value(json!({
            "run_id": "r1",
            "dataset_id": "demo",
            "agent_version": "0.0.1",
            "model": "test",
            "started_at": "2026-01-01T00:00:00Z",
            "seed": 7,
            "judges": ["regex"],
            "judge_configs": { "regex": { "patterns": ["ok"] } }
        }))
        .unwrap();
        let suite: EvalSuite = serde_json::from_value(json!({
            "dataset_id": "demo",
            "cases": [{
                "case_id": "c1",
                "input": "hi",
                "trace": [
                    { "idx": 0, "ts": "", "actor": "user", "type": "message", "input": "hi" },
                    { "idx": 1, "ts": "", "actor": "assistant", "type": "message", "output": "ok" }
                ]
            }]
        }))
        .unwrap();
        let results: Vec<CaseResult> = serde_json::from_value(json!([{
            "case_id": "c1",
            "passed": true,
            "hard_failed": false,
            "judge_results": [{
                "judge_id": "regex",
                "case_id": "c1",
                "score": 1.0,
                "passed": true,
                "reason": "matched",
                "hard_fail": false,
                "evidence_refs": [],
                "skipped": false
            }],
            "replay_issues": []
        }]))
        .unwrap();
        let summary = RunSummary::compute(&config, "demo", &results);
        (config, suite, results, summary)
    }

    #[test]
    fn pack_layout_and_readers_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack");
        let (config, suite, results, summary) = fixtures();
        write_evidence_pack(&dest, &config, &suite, &results, &summary, &json!({ "ok": true }))
            .unwrap();

        assert!(is_evidence_pack(&dest));
        assert!(dest.join("run/config.json").is_file());
        assert!(dest.join("run/events.jsonl").is_file());
        assert!(dest.join("judges/regex.json").is_file());
        assert!(dest.join("cases/c1/trajectory.json").is_file());
        assert!(dest.join("cases/c1/artifacts").is_dir());
        assert!(dest.join("report.json").is_file());

        let read_config = read_run_config(&dest).unwrap();
        assert_eq!(read_config.run_id, "r1");
        let read_sum = read_summary(&dest).unwrap();
        assert_eq!(read_sum.total_cases, 1);
        let read_results = read_case_results(&dest).unwrap();
        assert_eq!(read_results.len(), 1);
        assert!(read_results[0].passed);
        let read_suite = read_suite_from_pack(&dest).unwrap();
        assert_eq!(read_suite.cases[0].case_id, "c1");

        // no stray staging directory remains
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn manifest_checksums_cover_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack");
        let (config, suite, results, summary) = fixtures();
        write_evidence_pack(&dest, &config, &suite, &results, &summary, &json!({})).unwrap();

        let manifest = crate::schema::load_json_object(&dest.join(MANIFEST_FILE)).unwrap();
        let files = manifest["files"].as_object().unwrap();
        assert!(files.contains_key("run/config.json"));
        assert!(files.contains_key("cases/c1/verdicts.json"));
        assert!(files.contains_key("report.json"));
        // the manifest never lists itself
        assert!(!files.contains_key(MANIFEST_FILE));
        for checksum in files.values() {
            assert_eq!(checksum.as_str().unwrap().len(), 64);
        }
    }

    #[test]
    fn compare_artifacts_attach_to_existing_packs_only() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack");
        let (config, suite, results, summary) = fixtures();
        write_evidence_pack(&dest, &config, &suite, &results, &summary, &json!({})).unwrap();

        write_compare_artifact(&dest, "baseline_delta.json", &json!({ "regressions": [] }))
            .unwrap();
        assert!(dest.join("compare/baseline_delta.json").is_file());

        let not_a_pack = dir.path().join("elsewhere");
        assert!(write_compare_artifact(&not_a_pack, "x.json", &json!({})).is_err());
    }

    #[test]
    fn rewriting_a_pack_replaces_it() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("pack");
        let (config, suite, results, summary) = fixtures();
        write_evidence_pack(&dest, &config, &suite, &results, &summary, &json!({ "v": 1 }))
            .unwrap();
        write_evidence_pack(&dest, &config, &suite, &results, &summary, &json!({ "v": 2 }))
            .unwrap();
        let report = crate::schema::load_json_object(&dest.join("report.json")).unwrap();
        assert_eq!(report["v"], json!(2));
    }
}
