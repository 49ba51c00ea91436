//! tracebar - per-request diagnostics aggregation.
//!
//! A [`DebugBar`] collects marks, nested spans, log lines, queries, dumps and
//! exceptions for one unit of work, turns them into a JSON payload through
//! pluggable collectors and plugins, and can persist payloads as snapshots.

pub mod clock;
pub mod collectors;
pub mod config;
pub mod debugbar;
pub mod events;
pub mod history;
pub mod plugins;
pub mod profiling;
pub mod state;

/// The assembled diagnostics payload.
pub type Payload = serde_json::Map<String, serde_json::Value>;

pub use collectors::{Collector, CollectorError, CollectorRegistry};
pub use config::{ConfigError, DebugBarConfig, DumperConfig, HistoryConfig};
pub use debugbar::{DebugBar, DebugBarError};
pub use events::{ErrorInfo, LogLevel, SourceLocation};
pub use history::{FileStorage, HistoryError, HistoryManager, SnapshotMeta, SnapshotStorage};
pub use plugins::{Plugin, PluginError, PluginManager};
pub use profiling::{Meta, SpanId, SpanTracker};
pub use state::DebugState;
