use sha2::{Digest, Sha256};
use std::path::Path;

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

pub fn sha256_file<P: AsRef<Path>>(path: P) -> anyhow::Result<String> {
    let bytes = std::fs::read(path.as_ref())?;
    let mut h = Sha256::new();
    h.update(&bytes);
    Ok(hex::encode(h.finalize()))
}

/// Canonical JSON text for hashing: serde_json maps are ordered, so the
/// same value always renders the same bytes.
pub fn canonical_json(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// Deterministic 32-hex-char trace id for synthetic execution-loop traces.
/// Derived, not random, so execution replay reproduces it exactly.
pub fn derived_trace_id(seed: u64, case_id: &str, attempt: u32) -> String {
    let raw = format!("trace:{seed}:{case_id}:{attempt}");
    sha256_hex(&raw)[..32].to_string()
}

/// 16-hex-char span id from an event position (1-based).
pub fn span_id(position: u64) -> String {
    format!("{position:016x}")
}
