//! Heuristics plugin - flags likely performance problems in a payload.
//!
//! Reads only the built-in payload sections (`_meta`, `queries`, `logs`),
//! so it works whether or not any collector is enabled.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::plugins::types::Plugin;
use crate::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Med,
    Low,
}

impl Severity {
    fn penalty(self) -> u32 {
        match self {
            Severity::High => 25,
            Severity::Med => 15,
            Severity::Low => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub code: String,
    pub msg: String,
}

/// Trigger points for each issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeuristicsThresholds {
    pub slow_request_ms: f64,
    pub many_queries: usize,
    pub high_query_time_ms: f64,
    /// Same SQL executed at least this many times
    pub duplicate_query_count: usize,
}

impl Default for HeuristicsThresholds {
    fn default() -> Self {
        Self {
            slow_request_ms: 500.0,
            many_queries: 30,
            high_query_time_ms: 200.0,
            duplicate_query_count: 3,
        }
    }
}

#[derive(Default)]
pub struct HeuristicsPlugin {
    thresholds: HeuristicsThresholds,
}

impl HeuristicsPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: HeuristicsThresholds) -> Self {
        Self { thresholds }
    }

    pub fn analyze(&self, payload: &Payload) -> Vec<Issue> {
        let t = &self.thresholds;
        let mut issues = Vec::new();

        let elapsed = payload
            .get("_meta")
            .and_then(|m| m.get("elapsed_ms"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        if elapsed > t.slow_request_ms {
            issues.push(issue(
                Severity::High,
                "SLOW_REQUEST",
                format!("Slow request: {} ms > {} ms", elapsed, t.slow_request_ms),
            ));
        }

        let queries = payload
            .get("queries")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        if queries.len() > t.many_queries {
            issues.push(issue(
                Severity::Med,
                "MANY_QUERIES",
                format!("Too many queries: {} > {}", queries.len(), t.many_queries),
            ));
        }

        let query_time: f64 = queries
            .iter()
            .filter_map(|q| q.get("duration_ms").and_then(Value::as_f64))
            .sum();
        if query_time > t.high_query_time_ms {
            issues.push(issue(
                Severity::Med,
                "QUERY_TIME_HIGH",
                format!(
                    "Total query time high: {} ms > {} ms",
                    crate::clock::round2(query_time),
                    t.high_query_time_ms
                ),
            ));
        }

        let mut repeats: HashMap<&str, usize> = HashMap::new();
        for sql in queries.iter().filter_map(|q| q.get("sql").and_then(Value::as_str)) {
            *repeats.entry(sql).or_default() += 1;
        }
        let mut repeated: Vec<(&str, usize)> = repeats
            .into_iter()
            .filter(|(_, n)| *n >= t.duplicate_query_count)
            .collect();
        repeated.sort();
        for (sql, n) in repeated {
            issues.push(issue(
                Severity::Low,
                "DUPLICATE_QUERIES",
                format!("Query executed {} times: {}", n, sql),
            ));
        }

        let error_logs = payload
            .get("logs")
            .and_then(Value::as_array)
            .map(|logs| {
                logs.iter()
                    .filter(|l| {
                        matches!(
                            l.get("level").and_then(Value::as_str),
                            Some("ERROR" | "CRITICAL" | "ALERT" | "EMERGENCY")
                        )
                    })
                    .count()
            })
            .unwrap_or(0);
        if error_logs > 0 {
            issues.push(issue(
                Severity::High,
                "ERRORS_LOGGED",
                format!("{} error-level log entries", error_logs),
            ));
        }

        issues
    }
}

fn issue(severity: Severity, code: &str, msg: String) -> Issue {
    Issue {
        severity,
        code: code.to_string(),
        msg,
    }
}

/// 100 minus a penalty per issue, floored at 0.
pub fn score(issues: &[Issue]) -> u32 {
    let penalty: u32 = issues.iter().map(|i| i.severity.penalty()).sum();
    100u32.saturating_sub(penalty)
}

impl Plugin for HeuristicsPlugin {
    fn name(&self) -> &str {
        "heuristics"
    }

    fn extend_payload(&self, payload: &Payload) -> Payload {
        let issues = self.analyze(payload);
        let mut out = Payload::new();
        out.insert(
            "heuristics".to_string(),
            json!({
                "score": score(&issues),
                "issues": issues,
                "duration_ms": payload.get("_meta").and_then(|m| m.get("elapsed_ms")).cloned(),
            }),
        );
        out
    }
}
