//! Baseline comparison: metric deltas between two runs plus the per-case
//! regression set that feeds the gate. All orderings here are total so
//! the produced report is byte-stable across runs.

use crate::errors::{codes, Diagnostic};
use crate::evidence;
use crate::model::{CaseResult, RunSummary};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDelta {
    pub metric: String,
    pub baseline: f64,
    pub candidate: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRegression {
    pub case_id: String,
    pub baseline_passed: bool,
    pub candidate_passed: bool,
    pub failing_judges: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeDelta {
    pub judge_id: String,
    pub baseline_pass_rate: f64,
    pub candidate_pass_rate: f64,
    pub delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureCluster {
    pub signature: String,
    pub size: usize,
    pub case_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonReport {
    pub dataset_id: String,
    pub baseline_run_id: String,
    pub candidate_run_id: String,
    pub metric_deltas: Vec<MetricDelta>,
    pub judge_metrics: Vec<JudgeDelta>,
    pub case_regressions: Vec<CaseRegression>,
    #[serde(default)]
    pub case_improvements: Vec<CaseRegression>,
    pub regressions: Vec<String>,
    pub top_regressed_judges: Vec<String>,
    pub failure_clusters: Vec<FailureCluster>,
    pub compatible: bool,
}

pub struct RunArtifacts {
    pub summary: RunSummary,
    pub results: Vec<CaseResult>,
}

/// Loads a run either from an evidence pack directory or from a bare
/// summary JSON file (which carries no per-case verdicts).
pub fn load_run_artifacts(path: &Path) -> Result<RunArtifacts> {
    if evidence::is_evidence_pack(path) {
        Ok(RunArtifacts {
            summary: evidence::read_summary(path)?,
            results: evidence::read_case_results(path)?,
        })
    } else {
        Ok(RunArtifacts {
            summary: evidence::read_summary_flexible(path)?,
            results: Vec::new(),
        })
    }
}

/// Compares a candidate against a baseline. Unless `allow_incompatible`,
/// the two runs must score the same dataset and case set.
pub fn compare_runs(
    baseline: &RunArtifacts,
    candidate: &RunArtifacts,
    allow_incompatible: bool,
) -> Result<ComparisonReport> {
    let compatible = check_compatibility(baseline, candidate);
    if !compatible && !allow_incompatible {
        return Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_BASE_INCOMPATIBLE,
                format!(
                    "baseline '{}' (dataset '{}') is not comparable to candidate '{}' (dataset '{}')",
                    baseline.summary.run_id,
                    baseline.summary.dataset_id,
                    candidate.summary.run_id,
                    candidate.summary.dataset_id,
                ),
            )
            .with_details(json!({
                "baseline_dataset": baseline.summary.dataset_id,
                "candidate_dataset": candidate.summary.dataset_id,
                "baseline_cases": case_ids(&baseline.results),
                "candidate_cases": case_ids(&candidate.results),
            })),
        ));
    }

    let metric_deltas = vec![
        metric_delta("pass_rate", baseline.summary.pass_rate, candidate.summary.pass_rate),
        metric_delta(
            "hard_fail_rate",
            baseline.summary.hard_fail_rate,
            candidate.summary.hard_fail_rate,
        ),
        metric_delta(
            "total_cases",
            baseline.summary.total_cases as f64,
            candidate.summary.total_cases as f64,
        ),
    ];

    let judge_metrics = judge_deltas(&baseline.summary, &candidate.summary);
    let case_regressions = case_regressions(&baseline.results, &candidate.results);
    let case_improvements = case_improvements(&baseline.results, &candidate.results);
    let regressions = regression_strings(&metric_deltas, &case_regressions);
    let top_regressed_judges = top_regressed_judges(&case_regressions);
    let failure_clusters = failure_clusters(&candidate.results, &case_regressions);

    info!(
        baseline = %baseline.summary.run_id,
        candidate = %candidate.summary.run_id,
        regressed_cases = case_regressions.len(),
        "comparison complete"
    );
    Ok(ComparisonReport {
        dataset_id: candidate.summary.dataset_id.clone(),
        baseline_run_id: baseline.summary.run_id.clone(),
        candidate_run_id: candidate.summary.run_id.clone(),
        metric_deltas,
        judge_metrics,
        case_regressions,
        case_improvements,
        regressions,
        top_regressed_judges,
        failure_clusters,
        compatible,
    })
}

fn check_compatibility(baseline: &RunArtifacts, candidate: &RunArtifacts) -> bool {
    if baseline.summary.dataset_id != candidate.summary.dataset_id {
        return false;
    }
    // bare-summary baselines carry no case list; dataset match is enough
    if baseline.results.is_empty() || candidate.results.is_empty() {
        return true;
    }
    case_ids(&baseline.results) == case_ids(&candidate.results)
}

fn case_ids(results: &[CaseResult]) -> BTreeSet<String> {
    results.iter().map(|r| r.case_id.clone()).collect()
}

fn metric_delta(metric: &str, baseline: f64, candidate: f64) -> MetricDelta {
    MetricDelta {
        metric: metric.to_string(),
        baseline,
        candidate,
        delta: candidate - baseline,
    }
}

fn judge_deltas(baseline: &RunSummary, candidate: &RunSummary) -> Vec<JudgeDelta> {
    let mut judges: BTreeSet<&String> = baseline.judge_pass_rates.keys().collect();
    judges.extend(candidate.judge_pass_rates.keys());
    judges
        .into_iter()
        .map(|judge_id| {
            let b = baseline.judge_pass_rates.get(judge_id).copied().unwrap_or(0.0);
            let c = candidate.judge_pass_rates.get(judge_id).copied().unwrap_or(0.0);
            JudgeDelta {
                judge_id: judge_id.clone(),
                baseline_pass_rate: b,
                candidate_pass_rate: c,
                delta: c - b,
            }
        })
        .collect()
}

/// Cases that passed on baseline and fail on candidate, in case_id order.
fn case_regressions(baseline: &[CaseResult], candidate: &[CaseResult]) -> Vec<CaseRegression> {
    let baseline_by_id: BTreeMap<&str, &CaseResult> =
        baseline.iter().map(|r| (r.case_id.as_str(), r)).collect();
    let mut regressions: Vec<CaseRegression> = candidate
        .iter()
        .filter(|cand| !cand.passed)
        .filter_map(|cand| {
            let base = baseline_by_id.get(cand.case_id.as_str())?;
            if !base.passed {
                return None;
            }
            Some(CaseRegression {
                case_id: cand.case_id.clone(),
                baseline_passed: true,
                candidate_passed: false,
                failing_judges: failing_judge_ids(cand),
            })
        })
        .collect();
    regressions.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    regressions
}

/// The inverse flip: cases failing on baseline that pass on candidate.
fn case_improvements(baseline: &[CaseResult], candidate: &[CaseResult]) -> Vec<CaseRegression> {
    let candidate_by_id: BTreeMap<&str, &CaseResult> =
        candidate.iter().map(|r| (r.case_id.as_str(), r)).collect();
    let mut improvements: Vec<CaseRegression> = baseline
        .iter()
        .filter(|base| !base.passed)
        .filter_map(|base| {
            let cand = candidate_by_id.get(base.case_id.as_str())?;
            if !cand.passed {
                return None;
            }
            Some(CaseRegression {
                case_id: base.case_id.clone(),
                baseline_passed: false,
                candidate_passed: true,
                failing_judges: failing_judge_ids(base),
            })
        })
        .collect();
    improvements.sort_by(|a, b| a.case_id.cmp(&b.case_id));
    improvements
}

fn failing_judge_ids(result: &CaseResult) -> Vec<String> {
    let mut ids: Vec<String> = result
        .judge_results
        .iter()
        .filter(|r| !r.skipped && !r.passed)
        .map(|r| r.judge_id.clone())
        .collect();
    ids.sort();
    ids.dedup();
    ids
}

fn regression_strings(
    metric_deltas: &[MetricDelta],
    case_regressions: &[CaseRegression],
) -> Vec<String> {
    let mut out = Vec::new();
    for delta in metric_deltas {
        let worse = match delta.metric.as_str() {
            "pass_rate" => delta.delta < 0.0,
            "hard_fail_rate" => delta.delta > 0.0,
            _ => false,
        };
        if worse {
            out.push(format!(
                "{}: {:.4} -> {:.4} ({:+.4})",
                delta.metric, delta.baseline, delta.candidate, delta.delta
            ));
        }
    }
    for reg in case_regressions {
        out.push(format!(
            "case {} regressed (failing judges: {})",
            reg.case_id,
            reg.failing_judges.join(", ")
        ));
    }
    out
}

/// Judges ranked by how many regressed cases they failed on: count
/// descending, then judge_id ascending.
fn top_regressed_judges(case_regressions: &[CaseRegression]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for reg in case_regressions {
        for judge in &reg.failing_judges {
            *counts.entry(judge.as_str()).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    ranked.into_iter().map(|(judge, _)| judge.to_string()).collect()
}

/// Groups regressed cases by the first failing candidate judge and its
/// reason. Chronic failures present on both sides never cluster. Clusters
/// come back size descending, then signature ascending; member case ids
/// ascending.
fn failure_clusters(
    candidate: &[CaseResult],
    regressions: &[CaseRegression],
) -> Vec<FailureCluster> {
    let regressed: BTreeSet<&str> = regressions.iter().map(|r| r.case_id.as_str()).collect();
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for result in candidate
        .iter()
        .filter(|r| !r.passed && regressed.contains(r.case_id.as_str()))
    {
        let signature = result
            .judge_results
            .iter()
            .find(|r| !r.skipped && !r.passed)
            .map(|r| format!("{}: {}", r.judge_id, r.reason))
            .unwrap_or_else(|| "no failing judge".to_string());
        groups.entry(signature).or_default().push(result.case_id.clone());
    }
    let mut clusters: Vec<FailureCluster> = groups
        .into_iter()
        .map(|(signature, mut case_ids)| {
            case_ids.sort();
            FailureCluster {
                signature,
                size: case_ids.len(),
                case_ids,
            }
        })
        .collect();
    clusters.sort_by(|a, b| b.size.cmp(&a.size).then(a.signature.cmp(&b.signature)));
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(case_id: &str, passed: bool, failing: &[(&str, &str)]) -> CaseResult {
        let judge_results = failing
            .iter()
            .map(|(judge, reason)| {
                json!({
                    "judge_id": judge, "case_id": case_id, "score": 0.0,
                    "passed": false, "reason": reason, "hard_fail": false,
                    "evidence_refs": [], "skipped": false
                })
            })
            .collect::<Vec<_>>();
        serde_json::from_value(json!({
            "case_id": case_id,
            "passed": passed,
            "hard_failed": false,
            "judge_results": judge_results,
            "replay_issues": []
        }))
        .unwrap()
    }

    fn summary(run_id: &str, dataset: &str, pass_rate: f64) -> RunSummary {
        serde_json::from_value(json!({
            "run_id": run_id,
            "dataset_id": dataset,
            "schema_version": "1.0.0",
            "total_cases": 2,
            "passed_cases": 1,
            "failed_cases": 1,
            "hard_fail_cases": 0,
            "pass_rate": pass_rate,
            "hard_fail_rate": 0.0,
            "judge_pass_rates": {}
        }))
        .unwrap()
    }

    #[test]
    fn self_comparison_has_no_regressions() {
        let run = RunArtifacts {
            summary: summary("r1", "demo", 0.5),
            results: vec![result("a", true, &[]), result("b", false, &[("regex", "no match")])],
        };
        let report = compare_runs(&run, &run, false).unwrap();
        assert!(report.case_regressions.is_empty());
        assert!(report.regressions.is_empty());
        assert!(report.metric_deltas.iter().all(|d| d.delta == 0.0));
        // b fails on both sides: chronic, so it never clusters either
        assert!(report.failure_clusters.is_empty());
    }

    #[test]
    fn chronic_failures_stay_out_of_clusters() {
        let baseline = RunArtifacts {
            summary: summary("base", "demo", 0.5),
            results: vec![
                result("b", true, &[]),
                result("x", false, &[("regex", "chronic failure")]),
            ],
        };
        let candidate = RunArtifacts {
            summary: summary("cand", "demo", 0.0),
            results: vec![
                result("b", false, &[("regex", "fresh failure")]),
                result("x", false, &[("regex", "chronic failure")]),
            ],
        };
        let report = compare_runs(&baseline, &candidate, false).unwrap();
        assert_eq!(report.case_regressions.len(), 1);
        assert_eq!(report.case_regressions[0].case_id, "b");
        // only the regressed case clusters; x fails on both sides
        assert_eq!(report.failure_clusters.len(), 1);
        assert_eq!(report.failure_clusters[0].signature, "regex: fresh failure");
        assert_eq!(report.failure_clusters[0].case_ids, vec!["b"]);
    }

    #[test]
    fn regressed_case_is_reported_with_its_judges() {
        let baseline = RunArtifacts {
            summary: summary("base", "demo", 1.0),
            results: vec![result("a", true, &[]), result("b", true, &[])],
        };
        let candidate = RunArtifacts {
            summary: summary("cand", "demo", 0.5),
            results: vec![
                result("a", true, &[]),
                result("b", false, &[("regex", "expected 'ok'")]),
            ],
        };
        let report = compare_runs(&baseline, &candidate, false).unwrap();
        assert_eq!(report.case_regressions.len(), 1);
        assert_eq!(report.case_regressions[0].case_id, "b");
        assert_eq!(report.case_regressions[0].failing_judges, vec!["regex"]);
        assert_eq!(report.top_regressed_judges, vec!["regex"]);
        assert!(report.case_improvements.is_empty());

        // the same runs flipped report b as an improvement instead
        let flipped = compare_runs(&candidate, &baseline, false).unwrap();
        assert!(flipped.case_regressions.is_empty());
        assert_eq!(flipped.case_improvements.len(), 1);
        assert_eq!(flipped.case_improvements[0].case_id, "b");
        assert!(report
            .regressions
            .iter()
            .any(|r| r.starts_with("pass_rate")));
    }

    #[test]
    fn incompatible_datasets_are_rejected_unless_allowed() {
        let baseline = RunArtifacts {
            summary: summary("base", "demo-v1", 1.0),
            results: vec![],
        };
        let candidate = RunArtifacts {
            summary: summary("cand", "demo-v2", 1.0),
            results: vec![],
        };
        let err = compare_runs(&baseline, &candidate, false).unwrap_err();
        let diag = crate::errors::try_map_error(&err).unwrap();
        assert_eq!(diag.code, codes::E_BASE_INCOMPATIBLE);

        let report = compare_runs(&baseline, &candidate, true).unwrap();
        assert!(!report.compatible);
    }

    #[test]
    fn differing_case_sets_are_incompatible() {
        let baseline = RunArtifacts {
            summary: summary("base", "demo", 1.0),
            results: vec![result("a", true, &[])],
        };
        let candidate = RunArtifacts {
            summary: summary("cand", "demo", 1.0),
            results: vec![result("a", true, &[]), result("b", true, &[])],
        };
        assert!(compare_runs(&baseline, &candidate, false).is_err());
    }

    #[test]
    fn clusters_order_by_size_then_signature() {
        let candidate = RunArtifacts {
            summary: summary("cand", "demo", 0.0),
            results: vec![
                result("c", false, &[("policy", "forbidden tool")]),
                result("a", false, &[("regex", "no match")]),
                result("b", false, &[("regex", "no match")]),
            ],
        };
        let baseline = RunArtifacts {
            summary: summary("base", "demo", 0.0),
            results: candidate.results.clone(),
        };
        let report = compare_runs(&baseline, &candidate, false).unwrap();
        assert_eq!(report.failure_clusters.len(), 2);
        assert_eq!(report.failure_clusters[0].signature, "regex: no match");
        assert_eq!(report.failure_clusters[0].case_ids, vec!["a", "b"]);
        assert_eq!(report.failure_clusters[1].size, 1);
    }
}
