use super::{exit_codes, print_value};
use crate::cli::args::CompareArgs;
use anyhow::Result;
use tracegate_core::compare::{compare_runs, load_run_artifacts};
use tracegate_core::evidence;
use tracegate_core::registry::Registry;

pub fn cmd_compare(args: CompareArgs) -> Result<i32> {
    let registry = Registry::load(&args.registry)?;
    let baseline_path = registry.resolve_baseline_reference(&args.baseline)?;
    let baseline = load_run_artifacts(&baseline_path)?;
    let candidate = load_run_artifacts(&args.candidate)?;

    let report = compare_runs(&baseline, &candidate, args.allow_incompatible)?;
    if evidence::is_evidence_pack(&args.candidate) {
        evidence::write_compare_artifact(
            &args.candidate,
            "baseline_delta.json",
            &serde_json::to_value(&report)?,
        )?;
    }
    if let Some(out) = &args.out {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(&report)?;
        text.push('\n');
        std::fs::write(out, text)?;
    }

    print_value(&args.format, &serde_json::to_value(&report)?, || {
        println!(
            "compare {} -> {} (dataset {})",
            report.baseline_run_id, report.candidate_run_id, report.dataset_id
        );
        for delta in &report.metric_deltas {
            println!(
                "  {}: {:.4} -> {:.4} ({:+.4})",
                delta.metric, delta.baseline, delta.candidate, delta.delta
            );
        }
        if report.regressions.is_empty() {
            println!("  no regressions");
        } else {
            for r in &report.regressions {
                println!("  regression: {r}");
            }
        }
        for cluster in &report.failure_clusters {
            println!(
                "  cluster [{}] {} case(s): {}",
                cluster.signature,
                cluster.size,
                cluster.case_ids.join(", ")
            );
        }
    })?;
    Ok(exit_codes::OK)
}
