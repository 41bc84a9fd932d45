use super::{exit_codes, print_value};
use crate::cli::args::{ReplayArgs, ReplayExecArgs};
use anyhow::Result;
use tracegate_core::engine::subprocess::split_command;
use tracegate_core::evidence::read_run_config;
use tracegate_core::replay::engine::{replay_pack, replay_pack_exec, ReplayReport};
use tracegate_judges::registry::{build_judges, BuiltinJudges};

fn judges_for_pack(
    pack: &std::path::Path,
) -> Result<Vec<std::sync::Arc<dyn tracegate_core::judge::Judge>>> {
    let config = read_run_config(pack)?;
    build_judges(&BuiltinJudges, &config.judges, &config.judge_configs)
}

fn finish(format: &str, report: &ReplayReport) -> Result<i32> {
    print_value(format, &serde_json::to_value(report)?, || {
        if report.matched {
            println!(
                "replay ({}): {} case(s) verified, verdicts match",
                report.mode, report.cases_checked
            );
        } else {
            println!(
                "replay ({}): DIVERGED, {} mismatch(es)",
                report.mode,
                report.mismatches.len()
            );
            for m in &report.mismatches {
                println!("  {} {}: expected {} got {}", m.case_id, m.field, m.expected, m.actual);
            }
        }
    })?;
    Ok(if report.matched {
        exit_codes::OK
    } else {
        exit_codes::GATE_FAIL
    })
}

pub async fn cmd_replay(args: ReplayArgs) -> Result<i32> {
    let judges = judges_for_pack(&args.pack)?;
    let report = replay_pack(&args.pack, judges, args.parallel, args.skip_env_check).await?;
    finish(&args.format, &report)
}

/// Flag values win; otherwise the pack's recorded execution config, so a
/// plain `replay-exec` re-drives the loop exactly as it was run.
fn exec_settings(
    execution_config: &serde_json::Value,
    max_repairs: Option<u32>,
    timeout_secs: Option<u64>,
) -> (u32, u64) {
    let recorded_repairs = execution_config
        .get("max_repairs")
        .and_then(serde_json::Value::as_u64)
        .map(|v| v as u32);
    let recorded_timeout = execution_config
        .get("timeout_secs")
        .and_then(serde_json::Value::as_u64);
    (
        max_repairs.or(recorded_repairs).unwrap_or(2),
        timeout_secs.or(recorded_timeout).unwrap_or(60),
    )
}

pub async fn cmd_replay_exec(args: ReplayExecArgs) -> Result<i32> {
    let config = read_run_config(&args.pack)?;
    let judges = build_judges(&BuiltinJudges, &config.judges, &config.judge_configs)?;
    let (max_repairs, timeout_secs) =
        exec_settings(&config.execution_config, args.max_repairs, args.timeout_secs);
    let command = split_command(&args.adapter);
    let report = replay_pack_exec(
        &args.pack,
        command,
        judges,
        max_repairs,
        timeout_secs,
        args.skip_env_check,
    )
    .await?;
    finish(&args.format, &report)
}

#[cfg(test)]
mod tests {
    use super::exec_settings;
    use serde_json::json;

    #[test]
    fn recorded_execution_config_fills_missing_flags() {
        let recorded = json!({ "adapter": "sh -c x", "max_repairs": 3, "timeout_secs": 15 });
        assert_eq!(exec_settings(&recorded, None, None), (3, 15));
        // explicit flags still win
        assert_eq!(exec_settings(&recorded, Some(1), Some(5)), (1, 5));
        // packs from plain runs carry no execution config
        assert_eq!(exec_settings(&json!({}), None, None), (2, 60));
    }
}
