use super::{exit_codes, load_config_value, print_value};
use crate::cli::args::{RunArgs, RunLoopArgs};
use anyhow::Result;
use serde_json::{json, Value};
use tracegate_core::engine::loop_runner::LoopRunner;
use tracegate_core::engine::runner::EvalRunner;
use tracegate_core::engine::subprocess::split_command;
use tracegate_core::environment::{build_pinned_env, capture_environment_metadata};
use tracegate_core::evidence::write_evidence_pack;
use tracegate_core::fingerprint::sha256_hex;
use tracegate_core::model::{
    CaseResult, EvalSuite, RunConfig, RunSummary, MODE_PROPOSE_EXECUTE_REPAIR, MODE_TRACE_SCORE,
};
use tracegate_judges::registry::{build_judges, BuiltinJudges, DEFAULT_JUDGES};
use tracing::info;

fn build_run_config(args: &RunArgs, suite: &EvalSuite, mode: &str) -> Result<RunConfig> {
    let judges: Vec<String> = if args.judges.is_empty() {
        DEFAULT_JUDGES.iter().map(|s| s.to_string()).collect()
    } else {
        args.judges.clone()
    };
    let judge_configs = match &args.judge_config {
        Some(path) => load_config_value(path)?,
        None => Value::Null,
    };
    let run_id = args.run_id.clone().unwrap_or_else(|| {
        // derived, not random: the same suite and seed always name the
        // same run, which keeps replay parity checks honest
        let digest = sha256_hex(&format!("{}:{}:{}", suite.dataset_id, args.seed, mode));
        format!("run-{}", &digest[..12])
    });

    let mut config: RunConfig = serde_json::from_value(json!({
        "run_id": run_id,
        "dataset_id": suite.dataset_id,
        "agent_version": args.agent_version,
        "model": args.model,
        "started_at": tracegate_core::model::utc_now_iso(),
        "seed": args.seed,
        "judges": judges,
        "judge_configs": judge_configs,
        "execution_mode": mode,
    }))?;
    config.pinned_env = capture_environment_metadata(None);
    config.pinned_env = build_pinned_env(&config);
    Ok(config)
}

fn finish_run(
    args: &RunArgs,
    config: &RunConfig,
    suite: &EvalSuite,
    results: &[CaseResult],
    summary: &RunSummary,
) -> Result<i32> {
    let report = json!({
        "kind": "run_report",
        "run_id": config.run_id,
        "dataset_id": config.dataset_id,
        "execution_mode": config.execution_mode,
        "summary": summary,
    });
    write_evidence_pack(&args.out, config, suite, results, summary, &report)?;

    if let Some(sidecar) = &args.summary {
        if let Some(parent) = sidecar.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut text = serde_json::to_string_pretty(summary)?;
        text.push('\n');
        std::fs::write(sidecar, text)?;
    }

    print_value(&args.format, &serde_json::to_value(summary)?, || {
        println!(
            "run {}: {}/{} cases passed (pass_rate {:.4}, hard_fail_rate {:.4})",
            config.run_id,
            summary.passed_cases,
            summary.total_cases,
            summary.pass_rate,
            summary.hard_fail_rate
        );
        for warning in &summary.warnings {
            println!("  warning: {warning}");
        }
        for result in results.iter().filter(|r| !r.passed) {
            let failing: Vec<&str> = result
                .judge_results
                .iter()
                .filter(|j| !j.skipped && !j.passed)
                .map(|j| j.judge_id.as_str())
                .collect();
            println!("  FAIL {} ({})", result.case_id, failing.join(", "));
        }
        println!("evidence pack: {}", args.out.display());
    })?;
    Ok(exit_codes::OK)
}

pub async fn cmd_run(args: RunArgs) -> Result<i32> {
    let suite = EvalSuite::from_path(&args.suite)?;
    let config = build_run_config(&args, &suite, MODE_TRACE_SCORE)?;
    let judges = build_judges(&BuiltinJudges, &config.judges, &config.judge_configs)?;
    info!(
        run_id = %config.run_id,
        dataset_id = %config.dataset_id,
        cases = suite.cases.len(),
        "scoring recorded traces"
    );
    let runner = EvalRunner::new(judges, args.parallel);
    let (results, summary) = runner.run(&suite, &config).await?;
    finish_run(&args, &config, &suite, &results, &summary)
}

pub async fn cmd_run_loop(args: RunLoopArgs) -> Result<i32> {
    let suite = EvalSuite::from_path(&args.run.suite)?;
    let mut config = build_run_config(&args.run, &suite, MODE_PROPOSE_EXECUTE_REPAIR)?;
    config.execution_config = json!({
        "adapter": args.adapter,
        "max_repairs": args.max_repairs,
        "timeout_secs": args.timeout_secs,
    });

    let command = split_command(&args.adapter);
    let judges = build_judges(&BuiltinJudges, &config.judges, &config.judge_configs)?;
    let runner = LoopRunner::new(command, judges, args.max_repairs, args.timeout_secs);
    let (executed_suite, results, summary) = runner.run(&suite, &config).await?;
    finish_run(&args.run, &config, &executed_suite, &results, &summary)
}
