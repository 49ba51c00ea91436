//! Record types captured by the event log.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{AsRefStr, Display, EnumString};

/// A point-in-time label on the request timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mark {
    /// Epoch seconds
    pub timestamp: f64,
    pub label: String,
}

/// Severity of a captured log line (PSR-3 levels).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum LogLevel {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogLevel {
    /// Level used when forwarding to the `log` facade.
    pub fn to_log_level(self) -> log::Level {
        match self {
            LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error => {
                log::Level::Error
            }
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Notice | LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
        }
    }

    /// Error and above.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            LogLevel::Emergency | LogLevel::Alert | LogLevel::Critical | LogLevel::Error
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Milliseconds since request start
    pub offset_ms: f64,
    pub level: LogLevel,
    pub message: String,
    pub context: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub sql: String,
    pub params: Vec<Value>,
    pub duration_ms: f64,
    pub connection: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u32,
}

impl SourceLocation {
    pub fn new(file: impl Into<String>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// Expands to the [`SourceLocation`] of the call site.
#[macro_export]
macro_rules! here {
    () => {
        $crate::events::SourceLocation::new(file!(), line!())
    };
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DumpEntry {
    pub name: Option<String>,
    pub location: Option<SourceLocation>,
    pub rendered: String,
    pub offset_ms: f64,
}

/// One link of a "caused by" chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionLink {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub code: Option<i64>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub code: Option<i64>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub offset_ms: f64,
    pub trace: String,
    /// Causes, outermost first
    pub chain: Vec<ExceptionLink>,
}
