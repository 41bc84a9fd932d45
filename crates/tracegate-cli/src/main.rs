use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::args::Cli;
use cli::commands::{dispatch, exit_codes};
use tracegate_core::errors::structured_error;

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("TRACEGATE_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            // machine-readable on stderr so CI can pick the code apart
            eprintln!(
                "{}",
                serde_json::to_string(&structured_error(&e))
                    .unwrap_or_else(|_| format!("{{\"error\":{{\"message\":\"{e}\"}}}}"))
            );
            exit_codes::CONFIG_ERROR
        }
    };
    std::process::exit(code);
}
