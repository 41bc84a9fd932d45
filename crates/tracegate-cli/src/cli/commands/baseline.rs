use super::exit_codes;
use crate::cli::args::{BaselineArgs, BaselineSub};
use anyhow::Result;
use tracegate_core::registry::Registry;

pub fn cmd_baseline(args: BaselineArgs) -> Result<i32> {
    match args.cmd {
        BaselineSub::Set(args) => {
            let mut registry = Registry::load(&args.registry)?;
            let entry = registry.set_baseline(&args.name, &args.pack)?;
            registry.save(&args.registry)?;
            println!(
                "baseline '{}' -> {} (run {}, dataset {})",
                entry.name, entry.pack_path, entry.run_id, entry.dataset_id
            );
            Ok(exit_codes::OK)
        }
        BaselineSub::Get(args) => {
            let registry = Registry::load(&args.registry)?;
            match registry.get_baseline(&args.name) {
                Some(entry) => {
                    println!("{}", serde_json::to_string_pretty(entry)?);
                    Ok(exit_codes::OK)
                }
                None => anyhow::bail!("no baseline named '{}'", args.name),
            }
        }
        BaselineSub::List(args) => {
            let registry = Registry::load(&args.registry)?;
            if registry.baselines.is_empty() {
                println!("no baselines pinned");
            }
            for entry in registry.baselines.values() {
                println!(
                    "{}\t{}\t(run {}, dataset {}, pinned {})",
                    entry.name, entry.pack_path, entry.run_id, entry.dataset_id, entry.pinned_at
                );
            }
            Ok(exit_codes::OK)
        }
    }
}
