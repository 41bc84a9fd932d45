pub mod baseline;
pub mod compare;
pub mod conformance;
pub mod dataset;
pub mod gate;
pub mod replay;
pub mod run;
pub mod schema;

use crate::cli::args::{Cli, Command};
use anyhow::Result;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// A gate, replay or check failed on its merits.
    pub const GATE_FAIL: i32 = 1;
    /// Bad invocation, unreadable input, unreachable dependency.
    pub const CONFIG_ERROR: i32 = 2;
}

pub async fn dispatch(cli: Cli) -> Result<i32> {
    match cli.cmd {
        Command::Run(args) => run::cmd_run(args).await,
        Command::RunLoop(args) => run::cmd_run_loop(args).await,
        Command::Replay(args) => replay::cmd_replay(args).await,
        Command::ReplayExec(args) => replay::cmd_replay_exec(args).await,
        Command::Compare(args) => compare::cmd_compare(args),
        Command::Gate(args) => gate::cmd_gate(args),
        Command::Schema(args) => schema::cmd_schema(args),
        Command::Baseline(args) => baseline::cmd_baseline(args),
        Command::Dataset(args) => dataset::cmd_dataset(args),
        Command::ContractsCheck(args) => conformance::cmd_contracts_check(args),
        Command::AdapterConformance(args) => conformance::cmd_adapter_conformance(args),
        Command::Version => {
            println!("tracegate {}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}

/// Loads a JSON or YAML document into a JSON value, by extension.
pub(crate) fn load_config_value(path: &std::path::Path) -> Result<serde_json::Value> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read '{}': {}", path.display(), e))?;
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    if is_yaml {
        Ok(serde_yaml::from_str(&raw)?)
    } else {
        Ok(serde_json::from_str(&raw)?)
    }
}

pub(crate) fn print_value(format: &str, value: &serde_json::Value, text: impl FnOnce()) -> Result<()> {
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        text();
    }
    Ok(())
}
