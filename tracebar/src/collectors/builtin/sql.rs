//! Query statistics: totals, slowest statement, repeated SQL.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

use crate::clock;
use crate::collectors::types::{BoxError, Collector};
use crate::state::DebugState;

#[derive(Debug, Serialize)]
struct DuplicateGroup {
    sql: String,
    count: usize,
    total_ms: f64,
}

#[derive(Debug, Serialize)]
struct SqlStats {
    count: usize,
    total_ms: f64,
    slowest: Option<Value>,
    duplicates: Vec<DuplicateGroup>,
    connections: Vec<String>,
}

pub struct SqlCollector;

impl Collector for SqlCollector {
    fn key() -> &'static str {
        "sql"
    }

    fn label() -> &'static str {
        "SQL"
    }

    fn icon() -> &'static str {
        "🗄️"
    }

    fn order() -> i32 {
        140
    }

    fn create() -> Self {
        SqlCollector
    }

    fn collect(&mut self, state: &DebugState<'_>) -> Result<Value, BoxError> {
        let queries = state.queries;

        let slowest = queries
            .iter()
            .max_by(|a, b| a.duration_ms.total_cmp(&b.duration_ms))
            .map(serde_json::to_value)
            .transpose()?;

        // Group in first-seen order so output is deterministic.
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, (usize, f64)> = HashMap::new();
        for q in queries {
            let entry = groups.entry(q.sql.as_str()).or_insert_with(|| {
                order.push(q.sql.as_str());
                (0, 0.0)
            });
            entry.0 += 1;
            entry.1 += q.duration_ms;
        }
        let duplicates = order
            .into_iter()
            .filter_map(|sql| {
                let (count, total) = groups[sql];
                (count > 1).then(|| DuplicateGroup {
                    sql: sql.to_string(),
                    count,
                    total_ms: clock::round2(total),
                })
            })
            .collect();

        let mut connections: Vec<String> = queries
            .iter()
            .filter_map(|q| q.connection.clone())
            .collect();
        connections.sort();
        connections.dedup();

        let stats = SqlStats {
            count: queries.len(),
            total_ms: clock::round2(queries.iter().map(|q| q.duration_ms).sum()),
            slowest,
            duplicates,
            connections,
        };
        Ok(serde_json::to_value(stats)?)
    }

    fn render(&self, data: &Value) -> Result<String, BoxError> {
        let count = data["count"].as_u64().unwrap_or(0);
        if count == 0 {
            return Ok("No queries.".to_string());
        }
        let mut out = format!("{} queries in {} ms", count, data["total_ms"]);
        if let Some(slowest) = data.get("slowest").filter(|v| !v.is_null()) {
            out.push_str(&format!(
                "\nSlowest: {} ({} ms)",
                slowest["sql"].as_str().unwrap_or(""),
                slowest["duration_ms"]
            ));
        }
        if let Some(dups) = data["duplicates"].as_array() {
            for dup in dups {
                out.push_str(&format!(
                    "\nRepeated x{}: {}",
                    dup["count"],
                    dup["sql"].as_str().unwrap_or("")
                ));
            }
        }
        Ok(out)
    }
}
