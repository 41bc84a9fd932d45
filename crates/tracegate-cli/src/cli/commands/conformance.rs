use super::{exit_codes, print_value};
use crate::cli::args::{AdapterConformanceArgs, ContractsCheckArgs};
use anyhow::Result;
use tracegate_core::conformance::{check_adapter_fixtures, contracts_check, ConformanceReport};

fn finish(format: &str, label: &str, report: &ConformanceReport) -> Result<i32> {
    print_value(format, &serde_json::to_value(report)?, || {
        println!(
            "{label}: {} ({} fixture(s))",
            if report.passed { "PASS" } else { "FAIL" },
            report.fixtures.len()
        );
        for fixture in report.fixtures.iter().filter(|f| !f.passed) {
            println!("  FAIL {}", fixture.fixture);
            for issue in &fixture.issues {
                println!("    {issue}");
            }
        }
        for provider in &report.providers {
            if provider.missing_event_types.is_empty() {
                println!(
                    "  provider {}: {} fixture(s), full event coverage",
                    provider.provider, provider.fixtures
                );
            } else {
                println!(
                    "  provider {}: missing {}",
                    provider.provider,
                    provider.missing_event_types.join(", ")
                );
            }
        }
    })?;
    Ok(if report.passed {
        exit_codes::OK
    } else {
        exit_codes::GATE_FAIL
    })
}

pub fn cmd_contracts_check(args: ContractsCheckArgs) -> Result<i32> {
    let report = contracts_check(
        &args.schema_fixtures,
        &args.adapter_fixtures,
        args.min_fixtures_per_provider,
    )?;
    finish(&args.format, "contracts-check", &report)
}

pub fn cmd_adapter_conformance(args: AdapterConformanceArgs) -> Result<i32> {
    let report = check_adapter_fixtures(&args.fixtures, args.min_fixtures_per_provider)?;
    finish(&args.format, "adapter-conformance", &report)
}
