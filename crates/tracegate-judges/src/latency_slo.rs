//! Latency SLO over the recorded per-event latencies. Configured with a
//! total budget, a per-event ceiling and optional p95/p99 ceilings;
//! unconfigured, it never applies.

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracegate_core::judge::Judge;
use tracegate_core::model::{EvalCase, JudgeResult};

pub const JUDGE_ID: &str = "latency_slo";

#[derive(Debug, Default, Deserialize)]
pub struct LatencySloConfig {
    pub max_total_ms: Option<u64>,
    pub max_event_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

impl LatencySloConfig {
    fn is_empty(&self) -> bool {
        self.max_total_ms.is_none()
            && self.max_event_ms.is_none()
            && self.p95_ms.is_none()
            && self.p99_ms.is_none()
    }
}

pub struct LatencySloJudge {
    config: LatencySloConfig,
}

impl LatencySloJudge {
    pub fn from_config(config: &Value) -> Result<Self> {
        let config: LatencySloConfig = crate::parse_config(JUDGE_ID, config)?;
        Ok(Self { config })
    }
}

/// Nearest-rank percentile over a sorted sample.
fn percentile(sorted: &[i64], p: f64) -> i64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

#[async_trait]
impl Judge for LatencySloJudge {
    fn judge_id(&self) -> &str {
        JUDGE_ID
    }

    async fn evaluate(&self, case: &EvalCase) -> Result<JudgeResult> {
        if self.config.is_empty() {
            return Ok(crate::not_applicable(JUDGE_ID, &case.case_id, "no SLO configured"));
        }

        let mut samples: Vec<i64> = case.trace.iter().filter_map(|e| e.latency_ms).collect();
        if samples.is_empty() {
            // an SLO was asked for but the trace carries no latencies:
            // that is a soft failure, not inapplicability
            return Ok(crate::verdict(
                JUDGE_ID,
                &case.case_id,
                false,
                0.0,
                "SLO configured but no latency data recorded".to_string(),
                false,
                vec![],
            ));
        }
        samples.sort_unstable();
        let total: i64 = samples.iter().sum();

        let mut breaches: Vec<Value> = Vec::new();
        if let Some(max_total) = self.config.max_total_ms {
            if total > max_total as i64 {
                breaches.push(json!({
                    "kind": "total_latency",
                    "total_ms": total,
                    "max_ms": max_total,
                }));
            }
        }
        if let Some(max_event) = self.config.max_event_ms {
            for event in &case.trace {
                if let Some(ms) = event.latency_ms {
                    if ms > max_event as i64 {
                        breaches.push(json!({
                            "kind": "event_latency",
                            "idx": event.idx,
                            "latency_ms": ms,
                            "max_ms": max_event,
                        }));
                    }
                }
            }
        }
        for (kind, ceiling, p) in [
            ("p95_latency", self.config.p95_ms, 95.0),
            ("p99_latency", self.config.p99_ms, 99.0),
        ] {
            if let Some(max) = ceiling {
                let observed = percentile(&samples, p);
                if observed > max as i64 {
                    breaches.push(json!({
                        "kind": kind,
                        "observed_ms": observed,
                        "max_ms": max,
                    }));
                }
            }
        }

        let passed = breaches.is_empty();
        Ok(crate::verdict(
            JUDGE_ID,
            &case.case_id,
            passed,
            if passed { 1.0 } else { 0.0 },
            if passed {
                format!("within SLO (total {total}ms)")
            } else {
                format!("{} SLO breach(es), total {total}ms", breaches.len())
            },
            false,
            breaches,
        ))
    }
}
