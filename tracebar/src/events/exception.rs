//! Boundary type for errors captured for display.
//!
//! Internally errors propagate with `?` as usual; at the point where one is
//! handed to the debug bar it is flattened into an [`ErrorInfo`] so the
//! "caused by" chain can be stored and serialized.

use serde::{Deserialize, Serialize};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;

use super::types::{ExceptionLink, ExceptionRecord, SourceLocation};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
    pub code: Option<i64>,
    pub location: Option<SourceLocation>,
    pub trace: String,
    pub source: Option<Box<ErrorInfo>>,
}

impl ErrorInfo {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            code: None,
            location: None,
            trace: String::new(),
            source: None,
        }
    }

    /// Flatten a concrete error and its `source()` chain.
    ///
    /// The outer kind is the Rust type name; causes are only reachable as
    /// trait objects, so their kind is read from the leading identifier of
    /// their `Debug` output (usually the variant or struct name).
    pub fn from_error<E: Error + 'static>(err: &E) -> Self {
        let mut info = Self::new(short_type_name::<E>(), err.to_string());
        info.source = err.source().map(|cause| Box::new(Self::from_dyn(cause)));
        info
    }

    fn from_dyn(err: &(dyn Error + 'static)) -> Self {
        let mut info = Self::new(debug_kind(err), err.to_string());
        info.source = err.source().map(|cause| Box::new(Self::from_dyn(cause)));
        info
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = trace.into();
        self
    }

    pub fn with_source(mut self, source: ErrorInfo) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Attach a backtrace of the current thread when `RUST_BACKTRACE` enables one.
    pub fn with_captured_trace(mut self) -> Self {
        let bt = Backtrace::capture();
        if bt.status() == BacktraceStatus::Captured {
            self.trace = bt.to_string();
        }
        self
    }

    /// Causes, outermost first.
    pub fn chain(&self) -> impl Iterator<Item = &ErrorInfo> {
        std::iter::successors(self.source.as_deref(), |info| info.source.as_deref())
    }

    pub fn to_record(&self, offset_ms: f64) -> ExceptionRecord {
        ExceptionRecord {
            kind: self.kind.clone(),
            message: self.message.clone(),
            code: self.code,
            file: self.location.as_ref().map(|l| l.file.clone()),
            line: self.location.as_ref().map(|l| l.line),
            offset_ms,
            trace: self.trace.clone(),
            chain: self
                .chain()
                .map(|cause| ExceptionLink {
                    kind: cause.kind.clone(),
                    message: cause.message.clone(),
                    code: cause.code,
                    file: cause.location.as_ref().map(|l| l.file.clone()),
                    line: cause.location.as_ref().map(|l| l.line),
                })
                .collect(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Type name without its module path, generics kept.
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    let prefix_len = base.rfind("::").map(|i| i + 2).unwrap_or(0);
    full[prefix_len..].to_string()
}

fn debug_kind(err: &dyn Error) -> String {
    let debug = format!("{:?}", err);
    let kind: String = debug
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();
    if kind.is_empty() {
        "Error".to_string()
    } else {
        kind
    }
}
