//! Read-only view of a request's captured state, handed to collectors.
//!
//! Collectors never read ambient process state; everything they may use
//! is on this struct.

use crate::events::{DumpEntry, EventLog, ExceptionRecord, LogEntry, Mark, QueryRecord};
use crate::profiling::Span;

#[derive(Debug, Clone, Copy)]
pub struct DebugState<'a> {
    /// Epoch seconds when the unit of work started
    pub request_start: f64,
    /// Epoch seconds when this view was taken
    pub now: f64,
    pub marks: &'a [Mark],
    pub logs: &'a [LogEntry],
    pub queries: &'a [QueryRecord],
    pub dumps: &'a [DumpEntry],
    pub exceptions: &'a [ExceptionRecord],
    /// Closed spans (orphans already force-closed)
    pub spans: &'a [Span],
}

impl<'a> DebugState<'a> {
    pub fn new(events: &'a EventLog, dumps: &'a [DumpEntry], spans: &'a [Span], now: f64) -> Self {
        Self {
            request_start: events.request_start(),
            now,
            marks: events.marks(),
            logs: events.logs(),
            queries: events.queries(),
            dumps,
            exceptions: events.exceptions(),
            spans,
        }
    }

    /// An empty view, mostly for tests and metadata-only callers.
    pub fn empty(request_start: f64, now: f64) -> Self {
        Self {
            request_start,
            now,
            marks: &[],
            logs: &[],
            queries: &[],
            dumps: &[],
            exceptions: &[],
            spans: &[],
        }
    }

    pub fn elapsed_ms(&self) -> f64 {
        crate::clock::elapsed_ms(self.request_start, self.now)
    }
}
