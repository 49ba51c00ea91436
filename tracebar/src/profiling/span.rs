//! Span model and the per-request span tracker.
//!
//! Every span gets a monotonically increasing id and records the depth of
//! the open-span stack at the moment it began.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};

use crate::clock;

/// Free-form span attributes.
pub type Meta = Map<String, Value>;

/// Identifier of a span within one tracker.
///
/// Ids start at 1; [`SpanId::INVALID`] is handed out while tracking is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpanId(u64);

impl SpanId {
    pub const INVALID: SpanId = SpanId(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::fmt::Display for SpanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    /// Begun, not yet ended
    Open,
    /// Ended by an explicit `end` call
    Closed,
    /// Still open at finalize time and closed there
    Orphaned,
}

impl SpanStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SpanStatus::Open)
    }
}

/// A timed interval on the request timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Span {
    pub id: SpanId,
    pub label: String,
    /// Epoch seconds
    pub start: f64,
    /// Epoch seconds, `None` while open
    pub end: Option<f64>,
    pub duration_ms: Option<f64>,
    /// Open-stack length when the span began
    pub depth: usize,
    pub meta: Meta,
    pub status: SpanStatus,
}

impl Span {
    fn open(id: SpanId, label: String, start: f64, depth: usize, meta: Meta) -> Self {
        Self {
            id,
            label,
            start,
            end: None,
            duration_ms: None,
            depth,
            meta,
            status: SpanStatus::Open,
        }
    }

    /// Stamp the end time. A clock that stepped backwards is clamped to `start`.
    fn close(&mut self, end: f64, status: SpanStatus) {
        let end = end.max(self.start);
        self.end = Some(end);
        self.duration_ms = Some(clock::elapsed_ms(self.start, end));
        self.status = status;
    }
}

/// Anything that can end a span by id. Lets [`SpanGuard`] wrap both the
/// bare tracker and the owning debug bar.
pub trait SpanSink {
    fn end_span(&mut self, id: SpanId);
}

/// Per-request span state: an open stack plus the closed list.
#[derive(Debug)]
pub struct SpanTracker {
    enabled: bool,
    sequence: u64,
    open: HashMap<SpanId, Span>,
    open_stack: Vec<SpanId>,
    closed: Vec<Span>,
}

impl SpanTracker {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            sequence: 0,
            open: HashMap::new(),
            open_stack: Vec::new(),
            closed: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Open a span now. Returns [`SpanId::INVALID`] when disabled.
    pub fn begin(&mut self, label: impl Into<String>, meta: Meta) -> SpanId {
        self.begin_at(label, meta, clock::now_secs())
    }

    pub fn begin_at(&mut self, label: impl Into<String>, meta: Meta, start: f64) -> SpanId {
        if !self.enabled {
            return SpanId::INVALID;
        }
        self.sequence += 1;
        let id = SpanId(self.sequence);
        let depth = self.open_stack.len();
        self.open_stack.push(id);
        self.open.insert(id, Span::open(id, label.into(), start, depth, meta));
        id
    }

    /// Close a span now. Unknown or already-closed ids are ignored.
    ///
    /// Returns `true` only for the call that actually closed the span.
    pub fn end(&mut self, id: SpanId) -> bool {
        self.end_at(id, clock::now_secs())
    }

    pub fn end_at(&mut self, id: SpanId, end: f64) -> bool {
        let Some(mut span) = self.open.remove(&id) else {
            if id.is_valid() && id.get() <= self.sequence {
                log::debug!("[SPANS] Span {} already closed, ignoring", id);
            } else if id.is_valid() {
                log::warn!("[SPANS] Ignoring end for unknown span {}", id);
            }
            return false;
        };
        span.close(end, SpanStatus::Closed);
        // Closes may arrive out of push order, so search rather than pop.
        if let Some(pos) = self.open_stack.iter().rposition(|open| *open == id) {
            self.open_stack.remove(pos);
        }
        self.closed.push(span);
        true
    }

    /// Run `f` inside a span that is ended exactly once, even if `f`
    /// returns an error or unwinds.
    pub fn measure<R>(
        &mut self,
        label: impl Into<String>,
        meta: Meta,
        f: impl FnOnce(&mut SpanTracker) -> R,
    ) -> R {
        let mut guard = self.guard(label, meta);
        f(&mut *guard)
    }

    /// Open a span that ends when the returned guard drops.
    pub fn guard(&mut self, label: impl Into<String>, meta: Meta) -> SpanGuard<'_, SpanTracker> {
        let id = self.begin(label, meta);
        SpanGuard::new(self, id)
    }

    /// Force-close every orphaned span at the current time.
    pub fn finalize(&mut self) -> &[Span] {
        self.finalize_at(clock::now_secs())
    }

    /// Force-close every orphaned span at `now`, in open-stack order.
    ///
    /// Idempotent: a second call finds nothing open.
    pub fn finalize_at(&mut self, now: f64) -> &[Span] {
        if !self.open_stack.is_empty() {
            log::warn!(
                "[SPANS] Closing {} orphaned span(s) at finalize",
                self.open_stack.len()
            );
        }
        for id in std::mem::take(&mut self.open_stack) {
            if let Some(mut span) = self.open.remove(&id) {
                span.close(now, SpanStatus::Orphaned);
                self.closed.push(span);
            }
        }
        &self.closed
    }

    /// Spans closed so far, in closing order.
    pub fn closed(&self) -> &[Span] {
        &self.closed
    }

    pub fn open_count(&self) -> usize {
        self.open_stack.len()
    }

    /// Ids currently open, bottom of the stack first.
    pub fn open_ids(&self) -> &[SpanId] {
        &self.open_stack
    }
}

impl Default for SpanTracker {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SpanSink for SpanTracker {
    fn end_span(&mut self, id: SpanId) {
        self.end(id);
    }
}

/// Scoped span: ends its span on drop, including during unwinding.
///
/// Derefs to the wrapped sink so nested work can keep using it.
pub struct SpanGuard<'a, S: SpanSink> {
    sink: &'a mut S,
    id: SpanId,
}

impl<'a, S: SpanSink> SpanGuard<'a, S> {
    pub fn new(sink: &'a mut S, id: SpanId) -> Self {
        Self { sink, id }
    }

    pub fn id(&self) -> SpanId {
        self.id
    }
}

impl<S: SpanSink> Deref for SpanGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.sink
    }
}

impl<S: SpanSink> DerefMut for SpanGuard<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.sink
    }
}

impl<S: SpanSink> Drop for SpanGuard<'_, S> {
    fn drop(&mut self) {
        if self.id.is_valid() {
            self.sink.end_span(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn test_begin_assigns_sequential_ids_and_depth() {
        let mut tracker = SpanTracker::new(true);
        let outer = tracker.begin_at("outer", Meta::new(), 1.0);
        let inner = tracker.begin_at("inner", Meta::new(), 1.1);
        assert_eq!(outer.get(), 1);
        assert_eq!(inner.get(), 2);
        assert!(tracker.end_at(inner, 1.2));
        assert!(tracker.end_at(outer, 1.5));

        let closed = tracker.closed();
        assert_eq!(closed[0].label, "inner");
        assert_eq!(closed[0].depth, 1);
        assert_eq!(closed[0].duration_ms, Some(100.0));
        assert_eq!(closed[1].label, "outer");
        assert_eq!(closed[1].depth, 0);
        assert_eq!(closed[1].duration_ms, Some(500.0));
    }

    #[test]
    fn test_disabled_returns_invalid_id() {
        let mut tracker = SpanTracker::new(false);
        let id = tracker.begin("ignored", Meta::new());
        assert_eq!(id, SpanId::INVALID);
        assert!(!tracker.end(id));
        assert!(tracker.finalize().is_empty());
    }

    #[test]
    fn test_double_end_and_unknown_end_are_noops() {
        let mut tracker = SpanTracker::new(true);
        let id = tracker.begin_at("work", Meta::new(), 1.0);
        assert!(tracker.end_at(id, 2.0));
        assert!(!tracker.end_at(id, 3.0));
        assert!(!tracker.end_at(SpanId(999), 3.0));

        assert_eq!(tracker.closed().len(), 1);
        assert_eq!(tracker.closed()[0].end, Some(2.0));
    }

    #[test]
    fn test_out_of_order_close_keeps_stack_consistent() {
        let mut tracker = SpanTracker::new(true);
        let a = tracker.begin_at("a", Meta::new(), 1.0);
        let b = tracker.begin_at("b", Meta::new(), 1.0);
        let c = tracker.begin_at("c", Meta::new(), 1.0);

        tracker.end_at(a, 2.0);
        assert_eq!(tracker.open_ids(), &[b, c]);

        // Depth reflects nesting at creation time, not after the early close.
        let d = tracker.begin_at("d", Meta::new(), 2.0);
        tracker.finalize_at(3.0);
        let depth_of = |id: SpanId| tracker.closed().iter().find(|s| s.id == id).unwrap().depth;
        assert_eq!(depth_of(c), 2);
        assert_eq!(depth_of(d), 2);
    }

    #[test]
    fn test_identical_labels_are_distinct_spans() {
        let mut tracker = SpanTracker::new(true);
        let a = tracker.begin("render", Meta::new());
        let b = tracker.begin("render", Meta::new());
        assert_ne!(a, b);
        tracker.end(b);
        tracker.end(a);
        assert_eq!(tracker.closed().len(), 2);
    }

    #[test]
    fn test_finalize_closes_orphans_at_timestamp() {
        let mut tracker = SpanTracker::new(true);
        let a = tracker.begin_at("request", Meta::new(), 1.0);
        let b = tracker.begin_at("handler", Meta::new(), 1.5);
        let c = tracker.begin_at("done", Meta::new(), 1.6);
        tracker.end_at(c, 1.7);

        let spans = tracker.finalize_at(5.0).to_vec();
        assert_eq!(spans.len(), 3);
        // Orphans flushed in open-stack order after the explicitly closed span.
        assert_eq!(spans[1].id, a);
        assert_eq!(spans[2].id, b);
        for orphan in &spans[1..] {
            assert_eq!(orphan.end, Some(5.0));
            assert_eq!(orphan.status, SpanStatus::Orphaned);
        }
        assert_eq!(tracker.open_count(), 0);

        // Second finalize changes nothing.
        assert_eq!(tracker.finalize_at(9.0).len(), 3);
        assert_eq!(tracker.closed()[1].end, Some(5.0));
    }

    #[test]
    fn test_end_before_start_clamps_duration() {
        let mut tracker = SpanTracker::new(true);
        let id = tracker.begin_at("skewed", Meta::new(), 10.0);
        tracker.end_at(id, 9.0);
        let span = &tracker.closed()[0];
        assert_eq!(span.end, Some(10.0));
        assert_eq!(span.duration_ms, Some(0.0));
    }

    #[test]
    fn test_measure_closes_span_on_error() {
        let mut tracker = SpanTracker::new(true);
        let result: Result<(), String> =
            tracker.measure("failing", Meta::new(), |_| Err("boom".to_string()));
        assert_eq!(result, Err("boom".to_string()));
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(tracker.closed().len(), 1);
        assert_eq!(tracker.closed()[0].status, SpanStatus::Closed);
    }

    #[test]
    fn test_measure_closes_span_on_panic() {
        let mut tracker = SpanTracker::new(true);
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            tracker.measure("panicking", Meta::new(), |_| -> () { panic!("kaboom") })
        }));
        assert!(outcome.is_err());
        assert_eq!(tracker.open_count(), 0);
        assert_eq!(tracker.closed()[0].label, "panicking");
    }

    #[test]
    fn test_measure_nests() {
        let mut tracker = SpanTracker::new(true);
        let value = tracker.measure("outer", Meta::new(), |t| {
            t.measure("inner", Meta::new(), |_| 42)
        });
        assert_eq!(value, 42);
        let closed = tracker.closed();
        assert_eq!(closed[0].label, "inner");
        assert_eq!(closed[0].depth, 1);
        assert_eq!(closed[1].label, "outer");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Begin,
        End(usize),
        EndUnknown(u64),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            3 => Just(Op::Begin),
            3 => (0usize..64).prop_map(Op::End),
            1 => (1000u64..2000).prop_map(Op::EndUnknown),
        ]
    }

    proptest! {
        #[test]
        fn prop_finalize_yields_one_closed_span_per_begin(ops in prop::collection::vec(op_strategy(), 0..80)) {
            let mut tracker = SpanTracker::new(true);
            let mut issued = Vec::new();
            let mut t = 1.0;

            for op in ops {
                t += 0.001;
                match op {
                    Op::Begin => issued.push(tracker.begin_at("span", Meta::new(), t)),
                    Op::End(i) => {
                        if let Some(id) = issued.get(i % issued.len().max(1)) {
                            let before: Vec<_> = tracker.closed().iter().map(|s| (s.id, s.end)).collect();
                            let was_open = tracker.open_ids().contains(id);
                            let closed_now = tracker.end_at(*id, t);
                            prop_assert_eq!(closed_now, was_open);
                            if !was_open {
                                let after: Vec<_> = tracker.closed().iter().map(|s| (s.id, s.end)).collect();
                                prop_assert_eq!(before, after);
                            }
                        }
                    }
                    Op::EndUnknown(raw) => {
                        prop_assert!(!tracker.end_at(SpanId(raw), t));
                    }
                }
            }

            let spans = tracker.finalize_at(t + 1.0);
            prop_assert_eq!(spans.len(), issued.len());
            let ids: HashSet<_> = spans.iter().map(|s| s.id).collect();
            prop_assert_eq!(ids.len(), spans.len());
            for span in spans {
                let end = span.end.unwrap();
                prop_assert!(end >= span.start);
                prop_assert!(span.status.is_terminal());
            }
        }
    }
}
