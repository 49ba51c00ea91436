//! Append-only capture buffers for one unit of work.
//!
//! The event log holds no policy beyond bounded dump growth; gating on the
//! enabled flag happens in the debug bar.

pub mod dumps;
pub mod exception;
pub mod types;

pub use dumps::{DumpBuffer, DEFAULT_MAX_DUMPS};
pub use exception::ErrorInfo;
pub use types::{
    DumpEntry, ExceptionLink, ExceptionRecord, LogEntry, LogLevel, Mark, QueryRecord,
    SourceLocation,
};

use serde_json::{Map, Value};

use crate::clock;

#[derive(Debug, Clone)]
pub struct EventLog {
    request_start: f64,
    marks: Vec<Mark>,
    logs: Vec<LogEntry>,
    queries: Vec<QueryRecord>,
    dumps: DumpBuffer,
    exceptions: Vec<ExceptionRecord>,
}

impl EventLog {
    pub fn new(request_start: f64, max_dumps: usize) -> Self {
        Self {
            request_start,
            marks: Vec::new(),
            logs: Vec::new(),
            queries: Vec::new(),
            dumps: DumpBuffer::new(max_dumps),
            exceptions: Vec::new(),
        }
    }

    pub fn request_start(&self) -> f64 {
        self.request_start
    }

    /// Milliseconds from request start to `at`.
    pub fn offset_ms(&self, at: f64) -> f64 {
        clock::elapsed_ms(self.request_start, at)
    }

    pub fn push_mark(&mut self, label: impl Into<String>, timestamp: f64) {
        self.marks.push(Mark {
            timestamp,
            label: label.into(),
        });
    }

    pub fn push_log(&mut self, level: LogLevel, message: impl Into<String>, context: Map<String, Value>, at: f64) {
        self.logs.push(LogEntry {
            offset_ms: self.offset_ms(at),
            level,
            message: message.into(),
            context,
        });
    }

    pub fn push_query(&mut self, query: QueryRecord) {
        self.queries.push(query);
    }

    pub fn push_dump(&mut self, dump: DumpEntry) -> Option<DumpEntry> {
        self.dumps.push(dump)
    }

    pub fn set_max_dumps(&mut self, max: usize) {
        self.dumps.set_capacity(max);
    }

    pub fn push_exception(&mut self, record: ExceptionRecord) {
        self.exceptions.push(record);
    }

    /// Marks in append order.
    pub fn marks(&self) -> &[Mark] {
        &self.marks
    }

    /// Marks ordered by timestamp; ties keep append order.
    pub fn marks_sorted(&self) -> Vec<Mark> {
        let mut marks = self.marks.clone();
        marks.sort_by(|a, b| a.timestamp.total_cmp(&b.timestamp));
        marks
    }

    pub fn logs(&self) -> &[LogEntry] {
        &self.logs
    }

    pub fn queries(&self) -> &[QueryRecord] {
        &self.queries
    }

    pub fn dumps(&self) -> &DumpBuffer {
        &self.dumps
    }

    pub fn exceptions(&self) -> &[ExceptionRecord] {
        &self.exceptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marks_keep_append_order_but_sort_by_time() {
        let mut log = EventLog::new(100.0, 10);
        log.push_mark("late", 100.3);
        log.push_mark("early", 100.1);
        log.push_mark("middle", 100.2);

        let appended: Vec<_> = log.marks().iter().map(|m| m.label.as_str()).collect();
        assert_eq!(appended, vec!["late", "early", "middle"]);

        let sorted: Vec<_> = log.marks_sorted().into_iter().map(|m| m.label).collect();
        assert_eq!(sorted, vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_log_offset_relative_to_start() {
        let mut log = EventLog::new(100.0, 10);
        log.push_log(LogLevel::Info, "hello", Map::new(), 100.25);
        assert_eq!(log.logs()[0].offset_ms, 250.0);
        assert_eq!(log.logs()[0].level, LogLevel::Info);
    }

    #[test]
    fn test_dump_capacity_applies() {
        let mut log = EventLog::new(0.0, 2);
        for n in 0..3 {
            log.push_dump(DumpEntry {
                name: None,
                location: None,
                rendered: n.to_string(),
                offset_ms: 0.0,
            });
        }
        assert_eq!(log.dumps().len(), 2);
        assert_eq!(log.dumps().iter().next().unwrap().rendered, "1");
    }
}
