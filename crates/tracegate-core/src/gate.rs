//! CI gating: turns a summary (and optionally a baseline comparison) into
//! a single pass/fail decision with one line per violated threshold.

use crate::compare::ComparisonReport;
use crate::model::RunSummary;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateThresholds {
    /// Candidate pass rate must be at least this.
    pub min_pass_rate: Option<f64>,
    /// Candidate hard-fail rate must be at most this.
    pub max_hard_fail_rate: Option<f64>,
    /// Pass rate may drop at most this much versus the baseline.
    pub max_pass_rate_drop: Option<f64>,
    /// Hard-fail rate may rise at most this much versus the baseline.
    pub max_hard_fail_increase: Option<f64>,
    /// At most this many individually regressed cases.
    pub max_regressed_cases: Option<usize>,
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_pass_rate: Some(1.0),
            max_hard_fail_rate: Some(0.0),
            max_pass_rate_drop: None,
            max_hard_fail_increase: None,
            max_regressed_cases: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    pub violations: Vec<String>,
    pub thresholds: GateThresholds,
}

impl GateDecision {
    pub fn exit_code(&self) -> i32 {
        if self.passed {
            0
        } else {
            1
        }
    }
}

/// Evaluates the thresholds. Baseline-relative thresholds are checked only
/// when a comparison is supplied; absolute ones always apply.
pub fn evaluate_gate(
    thresholds: &GateThresholds,
    summary: &RunSummary,
    comparison: Option<&ComparisonReport>,
) -> GateDecision {
    let mut violations = Vec::new();

    if let Some(min) = thresholds.min_pass_rate {
        if summary.pass_rate < min {
            violations.push(format!(
                "pass_rate {:.4} below minimum {:.4}",
                summary.pass_rate, min
            ));
        }
    }
    if let Some(max) = thresholds.max_hard_fail_rate {
        if summary.hard_fail_rate > max {
            violations.push(format!(
                "hard_fail_rate {:.4} above maximum {:.4}",
                summary.hard_fail_rate, max
            ));
        }
    }

    if let Some(comparison) = comparison {
        let pass_delta = delta(comparison, "pass_rate");
        if let (Some(max_drop), Some(delta)) = (thresholds.max_pass_rate_drop, pass_delta) {
            if -delta > max_drop {
                violations.push(format!(
                    "pass_rate dropped {:.4}, more than allowed {:.4}",
                    -delta, max_drop
                ));
            }
        }
        let hard_delta = delta(comparison, "hard_fail_rate");
        if let (Some(max_rise), Some(delta)) = (thresholds.max_hard_fail_increase, hard_delta) {
            if delta > max_rise {
                violations.push(format!(
                    "hard_fail_rate rose {:.4}, more than allowed {:.4}",
                    delta, max_rise
                ));
            }
        }
        if let Some(max_cases) = thresholds.max_regressed_cases {
            let regressed = comparison.case_regressions.len();
            if regressed > max_cases {
                violations.push(format!(
                    "{} regressed cases, more than allowed {}",
                    regressed, max_cases
                ));
            }
        }
    }

    let passed = violations.is_empty();
    info!(passed, violations = violations.len(), "gate evaluated");
    GateDecision {
        passed,
        violations,
        thresholds: thresholds.clone(),
    }
}

fn delta(comparison: &ComparisonReport, metric: &str) -> Option<f64> {
    comparison
        .metric_deltas
        .iter()
        .find(|d| d.metric == metric)
        .map(|d| d.delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compare::{compare_runs, RunArtifacts};
    use serde_json::json;

    fn summary(pass_rate: f64, hard_fail_rate: f64) -> RunSummary {
        serde_json::from_value(json!({
            "run_id": "r1",
            "dataset_id": "demo",
            "schema_version": "1.0.0",
            "total_cases": 4,
            "passed_cases": 2,
            "failed_cases": 2,
            "hard_fail_cases": 0,
            "pass_rate": pass_rate,
            "hard_fail_rate": hard_fail_rate,
            "judge_pass_rates": {}
        }))
        .unwrap()
    }

    #[test]
    fn absolute_thresholds() {
        let thresholds = GateThresholds {
            min_pass_rate: Some(0.95),
            max_hard_fail_rate: Some(0.0),
            ..Default::default()
        };
        let pass = evaluate_gate(&thresholds, &summary(1.0, 0.0), None);
        assert!(pass.passed);
        assert_eq!(pass.exit_code(), 0);

        let fail = evaluate_gate(&thresholds, &summary(0.5, 0.25), None);
        assert!(!fail.passed);
        assert_eq!(fail.exit_code(), 1);
        assert_eq!(fail.violations.len(), 2);
    }

    #[test]
    fn thresholds_are_monotone_in_pass_rate() {
        let thresholds = GateThresholds {
            min_pass_rate: Some(0.8),
            ..Default::default()
        };
        let mut prev_passed = false;
        for pct in 0..=10 {
            let rate = pct as f64 / 10.0;
            let decision = evaluate_gate(&thresholds, &summary(rate, 0.0), None);
            // once the gate opens it stays open as pass_rate rises
            assert!(decision.passed || !prev_passed);
            prev_passed = decision.passed;
        }
        assert!(prev_passed);
    }

    #[test]
    fn baseline_relative_thresholds() {
        let baseline = RunArtifacts {
            summary: summary(1.0, 0.0),
            results: vec![],
        };
        let candidate = RunArtifacts {
            summary: summary(0.9, 0.1),
            results: vec![],
        };
        let comparison = compare_runs(&baseline, &candidate, false).unwrap();
        let thresholds = GateThresholds {
            min_pass_rate: None,
            max_hard_fail_rate: None,
            max_pass_rate_drop: Some(0.05),
            max_hard_fail_increase: Some(0.05),
            max_regressed_cases: Some(0),
        };
        let decision = evaluate_gate(&thresholds, &candidate.summary, Some(&comparison));
        assert!(!decision.passed);
        assert_eq!(decision.violations.len(), 2);

        let lenient = GateThresholds {
            min_pass_rate: None,
            max_hard_fail_rate: None,
            max_pass_rate_drop: Some(0.2),
            max_hard_fail_increase: Some(0.2),
            max_regressed_cases: None,
        };
        assert!(evaluate_gate(&lenient, &candidate.summary, Some(&comparison)).passed);
    }

    #[test]
    fn baseline_thresholds_are_inert_without_a_comparison() {
        let thresholds = GateThresholds {
            min_pass_rate: None,
            max_hard_fail_rate: None,
            max_pass_rate_drop: Some(0.0),
            max_hard_fail_increase: Some(0.0),
            max_regressed_cases: Some(0),
        };
        assert!(evaluate_gate(&thresholds, &summary(0.1, 0.9), None).passed);
    }
}
