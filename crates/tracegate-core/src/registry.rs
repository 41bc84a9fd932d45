//! A single JSON file tracking known datasets and the baseline pack
//! pinned for each. Saves go through a temp file and rename so a crashed
//! write never corrupts the registry.

use crate::errors::{codes, Diagnostic};
use crate::fingerprint;
use crate::model::EvalSuite;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub dataset_id: String,
    pub path: String,
    pub checksum: String,
    pub case_count: usize,
    pub registered_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineEntry {
    pub name: String,
    pub dataset_id: String,
    pub pack_path: String,
    pub run_id: String,
    pub pinned_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    pub datasets: BTreeMap<String, DatasetEntry>,
    pub baselines: BTreeMap<String, BaselineEntry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            datasets: BTreeMap::new(),
            baselines: BTreeMap::new(),
        }
    }
}

impl Registry {
    /// A missing file is an empty registry; a malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading registry '{}'", path.display()))?;
        let registry: Registry = serde_json::from_str(&raw).map_err(|e| {
            anyhow::Error::new(
                Diagnostic::new(
                    codes::E_SCHEMA,
                    format!("registry '{}' is malformed: {}", path.display(), e),
                )
                .with_details(json!({ "path": path })),
            )
        })?;
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let staging: PathBuf = path.with_extension(format!("tmp-{}", std::process::id()));
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        fs::write(&staging, text)
            .with_context(|| format!("staging registry '{}'", staging.display()))?;
        fs::rename(&staging, path)
            .with_context(|| format!("publishing registry '{}'", path.display()))?;
        Ok(())
    }

    /// Registers (or re-registers) a dataset file under its dataset_id.
    pub fn register_dataset(&mut self, suite_path: &Path) -> Result<DatasetEntry> {
        let suite = EvalSuite::from_path(suite_path)?;
        let entry = DatasetEntry {
            dataset_id: suite.dataset_id.clone(),
            path: suite_path.display().to_string(),
            checksum: fingerprint::sha256_file(suite_path)?,
            case_count: suite.cases.len(),
            registered_at: crate::model::utc_now_iso(),
        };
        info!(dataset = %entry.dataset_id, cases = entry.case_count, "dataset registered");
        self.datasets.insert(entry.dataset_id.clone(), entry.clone());
        Ok(entry)
    }

    /// Pins an evidence pack as the named baseline for its dataset.
    pub fn set_baseline(&mut self, name: &str, pack: &Path) -> Result<BaselineEntry> {
        if !crate::evidence::is_evidence_pack(pack) {
            return Err(anyhow::Error::new(
                Diagnostic::new(
                    codes::E_PATH_NOT_FOUND,
                    format!("'{}' is not an evidence pack", pack.display()),
                )
                .with_details(json!({ "path": pack })),
            ));
        }
        let config = crate::evidence::read_run_config(pack)?;
        let entry = BaselineEntry {
            name: name.to_string(),
            dataset_id: config.dataset_id,
            pack_path: pack.display().to_string(),
            run_id: config.run_id,
            pinned_at: crate::model::utc_now_iso(),
        };
        info!(baseline = name, run = %entry.run_id, "baseline pinned");
        self.baselines.insert(name.to_string(), entry.clone());
        Ok(entry)
    }

    pub fn get_baseline(&self, name: &str) -> Option<&BaselineEntry> {
        self.baselines.get(name)
    }

    /// Resolves a baseline reference: a registered baseline name first,
    /// otherwise a filesystem path to a pack or summary.
    pub fn resolve_baseline_reference(&self, reference: &str) -> Result<PathBuf> {
        if let Some(entry) = self.baselines.get(reference) {
            return Ok(PathBuf::from(&entry.pack_path));
        }
        let path = PathBuf::from(reference);
        if path.exists() {
            return Ok(path);
        }
        Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_PATH_NOT_FOUND,
                format!("'{reference}' is neither a registered baseline nor a path"),
            )
            .with_details(json!({
                "reference": reference,
                "known_baselines": self.baselines.keys().collect::<Vec<_>>(),
            })),
        ))
    }
}
