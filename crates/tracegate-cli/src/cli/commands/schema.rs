use super::{exit_codes, print_value};
use crate::cli::args::{SchemaArgs, SchemaSub, SchemaValidateArgs};
use anyhow::Result;
use tracegate_core::schema::{migrate_suite_file, validate_suite_file, ValidationReport};

fn print_report(format: &str, report: &ValidationReport, label: &str) -> Result<()> {
    print_value(format, &serde_json::to_value(report)?, || {
        if report.passed {
            println!(
                "{label}: valid (schema_version {})",
                report.schema_version.as_deref().unwrap_or("<missing>")
            );
        } else {
            println!("{label}: INVALID, {} error(s)", report.errors.len());
            for e in &report.errors {
                println!("  {}: {}", e.path, e.message);
            }
        }
        for w in &report.warnings {
            println!("  warning: {w}");
        }
    })
}

fn cmd_validate(args: SchemaValidateArgs) -> Result<i32> {
    let report = validate_suite_file(&args.input, args.strict, args.require_version.as_deref())?;
    print_report(&args.format, &report, "validate")?;
    Ok(if report.passed {
        exit_codes::OK
    } else {
        exit_codes::GATE_FAIL
    })
}

pub fn cmd_schema(args: SchemaArgs) -> Result<i32> {
    match args.cmd {
        SchemaSub::Validate(args) => cmd_validate(args),
        SchemaSub::Migrate(args) => {
            let report = migrate_suite_file(&args.input, &args.out, &args.to)?;
            println!(
                "migrated '{}' -> '{}' (schema_version {})",
                args.input.display(),
                args.out.display(),
                args.to
            );
            if !report.passed {
                println!("warning: migrated document fails strict validation");
                return Ok(exit_codes::GATE_FAIL);
            }
            Ok(exit_codes::OK)
        }
    }
}
