//! Writes a real evidence pack and verifies it replays cleanly, that
//! tampering is caught, and that environment pins block replay first.

use serde_json::json;
use std::path::Path;
use tracegate_core::engine::loop_runner::LoopRunner;
use tracegate_core::engine::runner::EvalRunner;
use tracegate_core::errors::{codes, try_map_error};
use tracegate_core::evidence::write_evidence_pack;
use tracegate_core::model::{EvalSuite, RunConfig};
use tracegate_core::replay::engine::{replay_pack, replay_pack_exec};
use tracegate_judges::registry::{build_judges, BuiltinJudges};

fn suite() -> EvalSuite {
    serde_json::from_value(json!({
        "dataset_id": "replay-demo",
        "cases": [
            {
                "case_id": "a",
                "input": "say ok",
                "regex_patterns": ["ok"],
                "trace": [
                    { "idx": 0, "ts": "", "actor": "user", "type": "message", "input": "say ok" },
                    { "idx": 1, "ts": "", "actor": "assistant", "type": "message", "output": "ok" }
                ]
            },
            {
                "case_id": "b",
                "input": "say ok",
                "regex_patterns": ["ok"],
                "trace": [
                    { "idx": 0, "ts": "", "actor": "user", "type": "message", "input": "say ok" },
                    { "idx": 1, "ts": "", "actor": "assistant", "type": "message", "output": "nope" }
                ]
            }
        ]
    }))
    .unwrap()
}

fn config(pinned_env: serde_json::Value) -> RunConfig {
    serde_json::from_value(json!({
        "run_id": "replay-r1",
        "dataset_id": "replay-demo",
        "agent_version": "0.0.1",
        "model": "test",
        "started_at": "2026-01-01T00:00:00Z",
        "seed": 11,
        "judges": ["regex"],
        "pinned_env": pinned_env
    }))
    .unwrap()
}

fn judges() -> Vec<std::sync::Arc<dyn tracegate_core::judge::Judge>> {
    build_judges(
        &BuiltinJudges,
        &["regex".to_string()],
        &serde_json::Value::Null,
    )
    .unwrap()
}

async fn write_pack(dest: &Path, pinned_env: serde_json::Value) {
    let suite = suite();
    let config = config(pinned_env);
    let (results, summary) = EvalRunner::new(judges(), 2)
        .run(&suite, &config)
        .await
        .unwrap();
    write_evidence_pack(dest, &config, &suite, &results, &summary, &json!({})).unwrap();
}

#[tokio::test]
async fn fresh_pack_replays_cleanly() {
    let dir = tempfile::tempdir().unwrap();
    let pack = dir.path().join("pack");
    write_pack(&pack, json!({})).await;

    let report = replay_pack(&pack, judges(), 2, false).await.unwrap();
    assert!(report.matched, "mismatches: {:?}", report.mismatches);
    assert_eq!(report.cases_checked, 2);
    assert_eq!(report.mode, "pure");
}

#[tokio::test]
async fn tampered_trajectory_is_caught() {
    let dir = tempfile::tempdir().unwrap();
    let pack = dir.path().join("pack");
    write_pack(&pack, json!({})).await;

    // flip the recorded output of case b from "nope" to "ok"
    let trajectory = pack.join("cases/b/trajectory.json");
    let mut case: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&trajectory).unwrap()).unwrap();
    case["trace"][1]["output"] = json!("ok");
    std::fs::write(&trajectory, serde_json::to_string_pretty(&case).unwrap()).unwrap();

    let report = replay_pack(&pack, judges(), 2, false).await.unwrap();
    assert!(!report.matched);
    assert!(report
        .mismatches
        .iter()
        .any(|m| m.case_id == "b" && m.field == "passed"));
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

fn loop_suite() -> EvalSuite {
    serde_json::from_value(json!({
        "dataset_id": "replay-demo",
        "cases": [{
            "case_id": "c1",
            "input": "say ok",
            "regex_patterns": ["ok"]
        }]
    }))
    .unwrap()
}

async fn write_loop_pack(dest: &Path, adapter: Vec<String>) {
    let suite = loop_suite();
    let config = config(json!({}));
    let runner = LoopRunner::new(adapter, judges(), 1, 30);
    let (executed, results, summary) = runner.run(&suite, &config).await.unwrap();
    write_evidence_pack(dest, &config, &executed, &results, &summary, &json!({})).unwrap();
}

// answers wrong in propose mode, right in repair mode, so the recorded
// pack carries a two-attempt history
const REPAIRING_ADAPTER: &str =
    r#"req=$(cat); case "$req" in *'"mode":"repair"'*) echo '{"output": "ok"}';; *) echo '{"output": "bad"}';; esac"#;

#[tokio::test]
async fn execution_replay_reproduces_a_deterministic_loop() {
    let dir = tempfile::tempdir().unwrap();
    let pack = dir.path().join("pack");
    write_loop_pack(&pack, sh(REPAIRING_ADAPTER)).await;

    let report = replay_pack_exec(&pack, sh(REPAIRING_ADAPTER), judges(), 1, 30, false)
        .await
        .unwrap();
    assert!(report.matched, "mismatches: {:?}", report.mismatches);
    assert_eq!(report.mode, "execution");
    assert_eq!(report.cases_checked, 1);
}

#[tokio::test]
async fn adapter_that_diverges_at_an_intermediate_attempt_is_caught() {
    let dir = tempfile::tempdir().unwrap();
    let pack = dir.path().join("pack");
    write_loop_pack(&pack, sh(REPAIRING_ADAPTER)).await;

    // this adapter passes on the first attempt, so attempt 0 of the fresh
    // history never matches the recorded failing attempt
    let always_right = sh(r#"cat >/dev/null; echo '{"output": "ok"}'"#);
    let report = replay_pack_exec(&pack, always_right, judges(), 1, 30, false)
        .await
        .unwrap();
    assert!(!report.matched);
    assert!(report
        .mismatches
        .iter()
        .any(|m| m.field.starts_with("attempt_history")));
    assert!(report
        .mismatches
        .iter()
        .any(|m| m.field == "metadata.selected_attempt"));
}

#[tokio::test]
async fn adapter_with_different_output_fails_trace_parity() {
    let dir = tempfile::tempdir().unwrap();
    let pack = dir.path().join("pack");
    write_loop_pack(&pack, sh(r#"cat >/dev/null; echo '{"output": "ok"}'"#)).await;

    let reworded = sh(r#"cat >/dev/null; echo '{"output": "ok, done"}'"#);
    let report = replay_pack_exec(&pack, reworded, judges(), 1, 30, false)
        .await
        .unwrap();
    assert!(!report.matched);
    assert!(report.mismatches.iter().any(|m| m.field == "trace"));
}

#[tokio::test]
async fn stale_environment_pin_blocks_replay() {
    let dir = tempfile::tempdir().unwrap();
    let pack = dir.path().join("pack");
    write_pack(&pack, json!({ "tracegate_version": "0.0.0-other" })).await;

    let err = replay_pack(&pack, judges(), 2, false).await.unwrap_err();
    let diag = try_map_error(&err).unwrap();
    assert_eq!(diag.code, codes::E_ENV_PIN);

    // the escape hatch skips the pin check and replays anyway
    let report = replay_pack(&pack, judges(), 2, true).await.unwrap();
    assert!(report.matched);
    assert!(report.env_check_skipped);
}
