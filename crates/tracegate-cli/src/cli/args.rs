use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tracegate",
    version,
    about = "Deterministic trace scoring, replay verification and CI gating for agent evals"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Score a suite's recorded traces and write an evidence pack
    Run(RunArgs),
    /// Drive the propose/execute/repair loop against an adapter
    RunLoop(RunLoopArgs),
    /// Re-score an evidence pack and verify verdict parity
    Replay(ReplayArgs),
    /// Re-execute an evidence pack's loop and verify trace parity
    ReplayExec(ReplayExecArgs),
    /// Compare a candidate run against a baseline
    Compare(CompareArgs),
    /// Apply gate thresholds to a run (optionally against a baseline)
    Gate(GateArgs),
    Schema(SchemaArgs),
    Baseline(BaselineArgs),
    Dataset(DatasetArgs),
    /// Schema back-compat plus adapter conformance in one pass
    ContractsCheck(ContractsCheckArgs),
    /// Provider fixture coverage check
    AdapterConformance(AdapterConformanceArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Suite file (JSON or YAML)
    #[arg(long)]
    pub suite: PathBuf,

    /// Evidence pack output directory
    #[arg(long, default_value = "tracegate-pack")]
    pub out: PathBuf,

    #[arg(long)]
    pub run_id: Option<String>,

    /// Judges to run (defaults to the built-in default set)
    #[arg(long, value_delimiter = ',')]
    pub judges: Vec<String>,

    /// Per-judge config file (JSON or YAML, keyed by judge id)
    #[arg(long)]
    pub judge_config: Option<PathBuf>,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    #[arg(long, default_value_t = 4)]
    pub parallel: usize,

    #[arg(long, default_value = "unknown")]
    pub agent_version: String,

    #[arg(long, default_value = "unknown")]
    pub model: String,

    /// Also write the summary to this standalone file
    #[arg(long = "summary-json")]
    pub summary: Option<PathBuf>,

    /// text|json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunLoopArgs {
    #[command(flatten)]
    pub run: RunArgs,

    /// Adapter command (quoted shell-style string)
    #[arg(long)]
    pub adapter: String,

    #[arg(long, default_value_t = 2)]
    pub max_repairs: u32,

    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReplayArgs {
    /// Evidence pack directory
    pub pack: PathBuf,

    #[arg(long, default_value_t = false)]
    pub skip_env_check: bool,

    #[arg(long, default_value_t = 4)]
    pub parallel: usize,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ReplayExecArgs {
    pub pack: PathBuf,

    /// Adapter command (quoted shell-style string)
    #[arg(long)]
    pub adapter: String,

    /// Repair budget (defaults to the pack's recorded execution config)
    #[arg(long)]
    pub max_repairs: Option<u32>,

    /// Adapter timeout (defaults to the pack's recorded execution config)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long, default_value_t = false)]
    pub skip_env_check: bool,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CompareArgs {
    /// Baseline: registered baseline name, pack directory or summary file
    #[arg(long)]
    pub baseline: String,

    /// Candidate: pack directory or summary file
    #[arg(long)]
    pub candidate: PathBuf,

    #[arg(long, default_value = ".tracegate/registry.json")]
    pub registry: PathBuf,

    #[arg(long, default_value_t = false)]
    pub allow_incompatible: bool,

    /// Write the comparison report here
    #[arg(long)]
    pub out: Option<PathBuf>,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct GateArgs {
    /// Candidate: pack directory or summary file
    #[arg(long)]
    pub candidate: PathBuf,

    /// Optional baseline for drop/regression thresholds
    #[arg(long)]
    pub baseline: Option<String>,

    #[arg(long, default_value = ".tracegate/registry.json")]
    pub registry: PathBuf,

    /// Thresholds file (JSON or YAML); flags below override it
    #[arg(long)]
    pub thresholds: Option<PathBuf>,

    #[arg(long)]
    pub min_pass_rate: Option<f64>,

    #[arg(long)]
    pub max_hard_fail_rate: Option<f64>,

    #[arg(long)]
    pub max_pass_rate_drop: Option<f64>,

    #[arg(long)]
    pub max_hard_fail_increase: Option<f64>,

    #[arg(long)]
    pub max_regressed_cases: Option<usize>,

    #[arg(long, default_value_t = false)]
    pub allow_incompatible: bool,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone)]
pub struct SchemaArgs {
    #[command(subcommand)]
    pub cmd: SchemaSub,
}

#[derive(Subcommand, Clone)]
pub enum SchemaSub {
    /// Validate a suite file against the schema rules
    Validate(SchemaValidateArgs),
    /// Migrate a suite file to a target schema version
    Migrate(SchemaMigrateArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct SchemaValidateArgs {
    pub input: PathBuf,

    /// Reject unknown fields
    #[arg(long, default_value_t = false)]
    pub strict: bool,

    #[arg(long)]
    pub require_version: Option<String>,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SchemaMigrateArgs {
    pub input: PathBuf,

    #[arg(long)]
    pub out: PathBuf,

    #[arg(long, default_value = tracegate_core::schema::LATEST_SCHEMA_VERSION)]
    pub to: String,
}

#[derive(Parser, Clone)]
pub struct BaselineArgs {
    #[command(subcommand)]
    pub cmd: BaselineSub,
}

#[derive(Subcommand, Clone)]
pub enum BaselineSub {
    /// Pin an evidence pack as a named baseline
    Set(BaselineSetArgs),
    /// Show a pinned baseline
    Get(BaselineGetArgs),
    /// List pinned baselines
    List(RegistryPathArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct BaselineSetArgs {
    pub name: String,

    pub pack: PathBuf,

    #[arg(long, default_value = ".tracegate/registry.json")]
    pub registry: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct BaselineGetArgs {
    pub name: String,

    #[arg(long, default_value = ".tracegate/registry.json")]
    pub registry: PathBuf,
}

#[derive(Parser, Clone)]
pub struct DatasetArgs {
    #[command(subcommand)]
    pub cmd: DatasetSub,
}

#[derive(Subcommand, Clone)]
pub enum DatasetSub {
    /// Register a suite file under its dataset_id
    Add(DatasetAddArgs),
    /// List registered datasets
    List(RegistryPathArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct DatasetAddArgs {
    pub suite: PathBuf,

    #[arg(long, default_value = ".tracegate/registry.json")]
    pub registry: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RegistryPathArgs {
    #[arg(long, default_value = ".tracegate/registry.json")]
    pub registry: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ContractsCheckArgs {
    #[arg(long, default_value = "fixtures/schema")]
    pub schema_fixtures: PathBuf,

    #[arg(long, default_value = "fixtures/adapters")]
    pub adapter_fixtures: PathBuf,

    #[arg(long, default_value_t = 1)]
    pub min_fixtures_per_provider: usize,

    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AdapterConformanceArgs {
    #[arg(long, default_value = "fixtures/adapters")]
    pub fixtures: PathBuf,

    #[arg(long, default_value_t = 1)]
    pub min_fixtures_per_provider: usize,

    #[arg(long, default_value = "text")]
    pub format: String,
}
