//! Nested span tracking for flame-style request timelines.
//!
//! Spans are opened and closed by id rather than by call stack, so closes
//! may arrive out of push order. Anything still open when the payload is
//! built gets force-closed by [`SpanTracker::finalize`].

pub mod span;

pub use span::{Meta, Span, SpanGuard, SpanId, SpanSink, SpanStatus, SpanTracker};
