//! JSON-over-stdio adapter calls. The adapter contract is one request
//! object on stdin, one response object on stdout, exit code zero.

use crate::errors::{codes, Diagnostic};
use anyhow::Result;
use serde_json::{json, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_ADAPTER_TIMEOUT_SECS: u64 = 60;

/// Runs `command`, writes `payload` as JSON to its stdin, and parses its
/// stdout as a JSON object. Timeouts and protocol violations map to
/// distinct diagnostic codes so callers can tell them apart.
pub async fn call_json_adapter(
    command: &[String],
    payload: &Value,
    timeout_secs: u64,
) -> Result<Value> {
    let (program, args) = command.split_first().ok_or_else(|| {
        anyhow::Error::new(Diagnostic::new(
            codes::E_ADAPTER_PROTOCOL,
            "adapter command is empty",
        ))
    })?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            anyhow::Error::new(
                Diagnostic::new(
                    codes::E_ADAPTER_PROTOCOL,
                    format!("failed to spawn adapter '{}': {}", program, e),
                )
                .with_details(json!({ "command": command })),
            )
        })?;

    let request = serde_json::to_vec(payload)?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&request).await?;
        // drop closes the pipe so the adapter sees EOF
    }

    let output = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| {
        anyhow::Error::new(
            Diagnostic::new(
                codes::E_ADAPTER_TIMEOUT,
                format!("adapter '{}' timed out after {}s", program, timeout_secs),
            )
            .with_details(json!({ "command": command, "timeout_secs": timeout_secs })),
        )
    })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_ADAPTER_PROTOCOL,
                format!(
                    "adapter '{}' exited with {}",
                    program,
                    output.status.code().unwrap_or(-1)
                ),
            )
            .with_details(json!({
                "command": command,
                "stderr": stderr.trim(),
            })),
        ));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let response: Value = serde_json::from_str(stdout.trim()).map_err(|e| {
        anyhow::Error::new(
            Diagnostic::new(
                codes::E_ADAPTER_PROTOCOL,
                format!("adapter '{}' produced invalid JSON: {}", program, e),
            )
            .with_details(json!({
                "command": command,
                "stdout": stdout.chars().take(400).collect::<String>(),
            })),
        )
    })?;
    if !response.is_object() {
        return Err(anyhow::Error::new(
            Diagnostic::new(
                codes::E_ADAPTER_PROTOCOL,
                format!("adapter '{}' must return a JSON object", program),
            )
            .with_details(json!({ "command": command })),
        ));
    }
    Ok(response)
}

/// Splits a command string on whitespace, honoring single and double
/// quotes. Enough shell-ishness for config files; not a shell.
pub fn split_command(raw: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in raw.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => quote = Some(ch),
            (None, c) if c.is_whitespace() => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            (None, c) => current.push(c),
        }
    }
    if !current.is_empty() {
        parts.push(current);
    }
    parts
}
