//! Quick-glance request KPIs.

use serde::Serialize;
use serde_json::Value;

use crate::clock;
use crate::collectors::types::{BoxError, Collector};
use crate::state::DebugState;

#[derive(Debug, Serialize)]
struct Kpis {
    duration_ms: f64,
    sql_count: usize,
    sql_time_ms: f64,
    logs_count: usize,
    error_logs_count: usize,
    dumps_count: usize,
    exceptions_count: usize,
    spans_count: usize,
}

pub struct KpiCollector;

impl Collector for KpiCollector {
    fn key() -> &'static str {
        "kpi"
    }

    fn label() -> &'static str {
        "KPIs"
    }

    fn icon() -> &'static str {
        "📊"
    }

    fn order() -> i32 {
        100
    }

    fn create() -> Self {
        KpiCollector
    }

    fn collect(&mut self, state: &DebugState<'_>) -> Result<Value, BoxError> {
        // Duration runs to the latest mark, or to now when nothing was marked.
        let end = state
            .marks
            .iter()
            .map(|m| m.timestamp)
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))))
            .unwrap_or(state.now);

        let sql_time: f64 = state.queries.iter().map(|q| q.duration_ms).sum();

        let kpis = Kpis {
            duration_ms: clock::elapsed_ms(state.request_start, end),
            sql_count: state.queries.len(),
            sql_time_ms: clock::round2(sql_time),
            logs_count: state.logs.len(),
            error_logs_count: state.logs.iter().filter(|l| l.level.is_error()).count(),
            dumps_count: state.dumps.len(),
            exceptions_count: state.exceptions.len(),
            spans_count: state.spans.len(),
        };
        Ok(serde_json::to_value(kpis)?)
    }

    fn render(&self, data: &Value) -> Result<String, BoxError> {
        let num = |key: &str| data.get(key).cloned().unwrap_or(Value::Null);
        Ok(format!(
            "Duration: {} ms | SQL: {} in {} ms | Logs: {} ({} errors) | Dumps: {} | Exceptions: {} | Spans: {}",
            num("duration_ms"),
            num("sql_count"),
            num("sql_time_ms"),
            num("logs_count"),
            num("error_logs_count"),
            num("dumps_count"),
            num("exceptions_count"),
            num("spans_count"),
        ))
    }
}
