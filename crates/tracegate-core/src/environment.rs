use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Keys compared between a run's pinned environment and the current one.
const DEFAULT_PIN_KEYS: &[&str] = &[
    "tracegate_version",
    "platform",
    "machine",
    "git_commit",
    "dependency_lock_hash",
    "container_image",
    "prompt_hash",
    "policy_hash",
];

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EnvMismatch {
    pub key: String,
    pub pinned: Value,
    pub current: Value,
}

fn detect_git_commit(cwd: &Path) -> Option<String> {
    let out = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(cwd)
        .output()
        .ok()?;
    if !out.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&out.stdout).trim().to_string();
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn lock_hash(root: &Path) -> Option<String> {
    for candidate in ["Cargo.lock", "Cargo.toml"] {
        let path = root.join(candidate);
        if path.is_file() {
            if let Ok(h) = crate::fingerprint::sha256_file(&path) {
                return Some(h);
            }
        }
    }
    None
}

/// Snapshot of the local toolchain/platform, pinned into every run config
/// and checked again before replay.
pub fn capture_environment_metadata(project_root: Option<&Path>) -> Value {
    let root: PathBuf = project_root
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    json!({
        "tracegate_version": env!("CARGO_PKG_VERSION"),
        "platform": std::env::consts::OS,
        "machine": std::env::consts::ARCH,
        "cwd": root.display().to_string(),
        "git_commit": detect_git_commit(&root),
        "dependency_lock_hash": lock_hash(&root),
        "env": {
            "path_hash": crate::fingerprint::sha256_hex(&std::env::var("PATH").unwrap_or_default()),
        },
    })
}

fn is_unpinned(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Compares pinned values against the current environment. Unpinned keys
/// (null/empty) are skipped; everything else must match exactly.
pub fn compare_environment_pins(
    pinned: &Value,
    current: &Value,
    keys: Option<&[&str]>,
) -> Vec<EnvMismatch> {
    let selected = keys.unwrap_or(DEFAULT_PIN_KEYS);
    let mut mismatches = Vec::new();
    for key in selected {
        let pinned_value = pinned.get(key).cloned().unwrap_or(Value::Null);
        if is_unpinned(&pinned_value) {
            continue;
        }
        let current_value = current.get(key).cloned().unwrap_or(Value::Null);
        if pinned_value != current_value {
            mismatches.push(EnvMismatch {
                key: key.to_string(),
                pinned: pinned_value,
                current: current_value,
            });
        }
    }
    mismatches
}

/// The pinned view of a run: its captured env plus the explicit hash pins
/// recorded on the run config itself.
pub fn build_pinned_env(run_config: &crate::model::RunConfig) -> Value {
    let mut pinned = match &run_config.pinned_env {
        Value::Object(m) => m.clone(),
        _ => serde_json::Map::new(),
    };
    pinned.insert("container_image".into(), json!(run_config.container_image));
    pinned.insert("prompt_hash".into(), json!(run_config.prompt_hash));
    pinned.insert("policy_hash".into(), json!(run_config.policy_hash));
    if let Some(commit) = &run_config.git_commit {
        pinned.insert("git_commit".into(), json!(commit));
    }
    if let Some(hash) = &run_config.dependency_lock_hash {
        pinned.insert("dependency_lock_hash".into(), json!(hash));
    }
    Value::Object(pinned)
}
