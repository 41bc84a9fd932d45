use super::{load_config_value, print_value};
use crate::cli::args::GateArgs;
use anyhow::Result;
use tracegate_core::compare::{compare_runs, load_run_artifacts, ComparisonReport};
use tracegate_core::evidence;
use tracegate_core::gate::{evaluate_gate, GateThresholds};
use tracegate_core::registry::Registry;

fn resolve_thresholds(args: &GateArgs) -> Result<GateThresholds> {
    let mut thresholds = match &args.thresholds {
        Some(path) => serde_json::from_value(load_config_value(path)?)?,
        None => GateThresholds::default(),
    };
    // flags override the file
    if args.min_pass_rate.is_some() {
        thresholds.min_pass_rate = args.min_pass_rate;
    }
    if args.max_hard_fail_rate.is_some() {
        thresholds.max_hard_fail_rate = args.max_hard_fail_rate;
    }
    if args.max_pass_rate_drop.is_some() {
        thresholds.max_pass_rate_drop = args.max_pass_rate_drop;
    }
    if args.max_hard_fail_increase.is_some() {
        thresholds.max_hard_fail_increase = args.max_hard_fail_increase;
    }
    if args.max_regressed_cases.is_some() {
        thresholds.max_regressed_cases = args.max_regressed_cases;
    }
    Ok(thresholds)
}

pub fn cmd_gate(args: GateArgs) -> Result<i32> {
    let candidate = load_run_artifacts(&args.candidate)?;
    let comparison: Option<ComparisonReport> = match &args.baseline {
        Some(reference) => {
            let registry = Registry::load(&args.registry)?;
            let baseline_path = registry.resolve_baseline_reference(reference)?;
            let baseline = load_run_artifacts(&baseline_path)?;
            Some(compare_runs(&baseline, &candidate, args.allow_incompatible)?)
        }
        None => None,
    };

    let thresholds = resolve_thresholds(&args)?;
    let decision = evaluate_gate(&thresholds, &candidate.summary, comparison.as_ref());
    if evidence::is_evidence_pack(&args.candidate) {
        evidence::write_compare_artifact(
            &args.candidate,
            "gate_decision.json",
            &serde_json::to_value(&decision)?,
        )?;
    }

    print_value(&args.format, &serde_json::to_value(&decision)?, || {
        if decision.passed {
            println!(
                "gate PASS (pass_rate {:.4}, hard_fail_rate {:.4})",
                candidate.summary.pass_rate, candidate.summary.hard_fail_rate
            );
        } else {
            println!("gate FAIL:");
            for v in &decision.violations {
                println!("  {v}");
            }
        }
    })?;
    Ok(decision.exit_code())
}
