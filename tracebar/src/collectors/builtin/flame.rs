//! Flame-graph view of closed spans.

use serde::Serialize;
use serde_json::Value;

use crate::clock;
use crate::collectors::types::{BoxError, Collector};
use crate::profiling::SpanStatus;
use crate::state::DebugState;

#[derive(Debug, Serialize)]
struct FlameRow {
    id: u64,
    label: String,
    depth: usize,
    /// Milliseconds from request start to span start
    offset_ms: f64,
    duration_ms: f64,
    orphaned: bool,
}

#[derive(Debug, Serialize)]
struct Flame {
    total_ms: f64,
    max_depth: usize,
    rows: Vec<FlameRow>,
}

pub struct FlameCollector;

impl Collector for FlameCollector {
    fn key() -> &'static str {
        "flame"
    }

    fn label() -> &'static str {
        "Flame"
    }

    fn icon() -> &'static str {
        "🔥"
    }

    fn order() -> i32 {
        120
    }

    fn create() -> Self {
        FlameCollector
    }

    fn collect(&mut self, state: &DebugState<'_>) -> Result<Value, BoxError> {
        let mut rows: Vec<FlameRow> = state
            .spans
            .iter()
            .map(|span| FlameRow {
                id: span.id.get(),
                label: span.label.clone(),
                depth: span.depth,
                offset_ms: clock::elapsed_ms(state.request_start, span.start),
                duration_ms: span.duration_ms.unwrap_or(0.0),
                orphaned: span.status == SpanStatus::Orphaned,
            })
            .collect();
        rows.sort_by(|a, b| a.offset_ms.total_cmp(&b.offset_ms).then(a.id.cmp(&b.id)));

        let flame = Flame {
            total_ms: state.elapsed_ms(),
            max_depth: rows.iter().map(|r| r.depth).max().unwrap_or(0),
            rows,
        };
        Ok(serde_json::to_value(flame)?)
    }

    fn render(&self, data: &Value) -> Result<String, BoxError> {
        let Some(rows) = data.get("rows").and_then(Value::as_array) else {
            return Ok("No spans recorded.".to_string());
        };
        if rows.is_empty() {
            return Ok("No spans recorded.".to_string());
        }

        let mut out = String::new();
        for row in rows {
            let depth = row["depth"].as_u64().unwrap_or(0) as usize;
            out.push_str(&"  ".repeat(depth));
            out.push_str(row["label"].as_str().unwrap_or(""));
            out.push_str(&format!(
                " +{}ms ({}ms){}\n",
                row["offset_ms"],
                row["duration_ms"],
                if row["orphaned"].as_bool().unwrap_or(false) { " [orphaned]" } else { "" }
            ));
        }
        Ok(out)
    }
}
