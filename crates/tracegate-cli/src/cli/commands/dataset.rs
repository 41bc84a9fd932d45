use super::exit_codes;
use crate::cli::args::{DatasetArgs, DatasetSub};
use anyhow::Result;
use tracegate_core::registry::Registry;

pub fn cmd_dataset(args: DatasetArgs) -> Result<i32> {
    match args.cmd {
        DatasetSub::Add(args) => {
            let mut registry = Registry::load(&args.registry)?;
            let entry = registry.register_dataset(&args.suite)?;
            registry.save(&args.registry)?;
            println!(
                "dataset '{}' registered ({} case(s), checksum {})",
                entry.dataset_id,
                entry.case_count,
                &entry.checksum[..12]
            );
            Ok(exit_codes::OK)
        }
        DatasetSub::List(args) => {
            let registry = Registry::load(&args.registry)?;
            if registry.datasets.is_empty() {
                println!("no datasets registered");
            }
            for entry in registry.datasets.values() {
                println!(
                    "{}\t{}\t({} case(s), registered {})",
                    entry.dataset_id, entry.path, entry.case_count, entry.registered_at
                );
            }
            Ok(exit_codes::OK)
        }
    }
}
