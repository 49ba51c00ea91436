//! DebugBar - the per-request coordinator.
//!
//! Owns the event log, span tracker, collector registry and plugin manager
//! for one unit of work, and optionally hands finished payloads to history.
//! Every producer call checks a single enabled flag first.

use serde::Serialize;
use serde_json::{json, Map, Value};
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

use crate::clock;
use crate::collectors::{builtin, CollectorError, CollectorRegistry};
use crate::config::{DebugBarConfig, DumperConfig};
use crate::events::{
    DumpEntry, ErrorInfo, EventLog, LogLevel, QueryRecord, SourceLocation, DEFAULT_MAX_DUMPS,
};
use crate::history::{FileStorage, HistoryError, HistoryManager};
use crate::plugins::builtin::HeuristicsPlugin;
use crate::plugins::{PluginError, PluginManager};
use crate::profiling::{Meta, Span, SpanGuard, SpanId, SpanSink, SpanTracker};
use crate::state::DebugState;
use crate::Payload;

/// `log` target used when forwarding application log calls.
pub const APP_LOG_TARGET: &str = "tracebar::app";

#[derive(Debug, Error)]
pub enum DebugBarError {
    #[error(transparent)]
    Collector(#[from] CollectorError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    History(#[from] HistoryError),

    #[error("failed to serialize payload section: {0}")]
    Encode(#[from] serde_json::Error),
}

pub struct DebugBar {
    enabled: bool,
    events: EventLog,
    spans: SpanTracker,
    collectors: CollectorRegistry,
    plugins: PluginManager,
    history: Option<HistoryManager>,
    dumper: DumperConfig,
}

impl DebugBar {
    /// A bare debug bar: no collectors, plugins or history.
    pub fn new(enabled: bool) -> Self {
        Self::with_dumper(enabled, DumperConfig::default())
    }

    fn with_dumper(enabled: bool, dumper: DumperConfig) -> Self {
        let request_start = clock::now_secs();
        let mut bar = Self {
            enabled,
            events: EventLog::new(request_start, DEFAULT_MAX_DUMPS),
            spans: SpanTracker::new(enabled),
            collectors: CollectorRegistry::new(),
            plugins: PluginManager::new(),
            history: None,
            dumper: DumperConfig::default(),
        };
        bar.set_dumper(dumper);
        bar.mark("request_start");
        bar
    }

    /// A fully wired debug bar: built-in collectors, the heuristics plugin,
    /// and file history when `history_dir` is set.
    pub fn from_config(config: &DebugBarConfig) -> Result<Self, DebugBarError> {
        let mut bar = Self::with_dumper(config.enabled, config.dumper.clone());
        builtin::register_defaults(&mut bar.collectors)?;
        bar.plugins.register(Box::new(HeuristicsPlugin::new()), true)?;

        if let Some(dir) = config.history_dir.as_ref().filter(|_| config.history.enabled()) {
            let storage = FileStorage::open(dir)?;
            bar.history = Some(HistoryManager::new(Arc::new(storage), config.history.clone()));
        }

        log::debug!(
            "[DEBUGBAR] Configured (enabled: {}, collectors: {}, history: {})",
            bar.enabled,
            bar.collectors.len(),
            bar.history.is_some()
        );
        Ok(bar)
    }

    // =====================================================
    // Enable gate
    // =====================================================

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        self.spans.set_enabled(true);
    }

    pub fn disable(&mut self) {
        self.enabled = false;
        self.spans.set_enabled(false);
    }

    // =====================================================
    // Producer API
    // =====================================================

    pub fn mark(&mut self, label: impl Into<String>) {
        if !self.enabled {
            return;
        }
        self.events.push_mark(label, clock::now_secs());
    }

    /// Forward to the `log` facade, then record the entry if enabled.
    pub fn log(&mut self, level: LogLevel, message: impl Into<String>, context: Map<String, Value>) {
        let message = message.into();
        log::log!(target: APP_LOG_TARGET, level.to_log_level(), "{}", message);
        if !self.enabled {
            return;
        }
        self.events.push_log(level, message, context, clock::now_secs());
    }

    pub fn add_query(
        &mut self,
        sql: impl Into<String>,
        params: Vec<Value>,
        duration_ms: f64,
        connection: Option<&str>,
    ) {
        if !self.enabled {
            return;
        }
        self.events.push_query(QueryRecord {
            sql: sql.into(),
            params,
            duration_ms,
            connection: connection.map(str::to_string),
        });
    }

    /// Record a value rendered as pretty JSON.
    pub fn add_dump<T: Serialize + ?Sized>(
        &mut self,
        value: &T,
        name: Option<&str>,
        location: Option<SourceLocation>,
    ) {
        if !self.enabled {
            return;
        }
        let rendered = serde_json::to_string_pretty(value)
            .unwrap_or_else(|e| format!("<unserializable: {}>", e));
        self.add_dump_rendered(rendered, name, location);
    }

    /// Record already-rendered dump text, cut to the configured length.
    pub fn add_dump_rendered(
        &mut self,
        rendered: String,
        name: Option<&str>,
        location: Option<SourceLocation>,
    ) {
        if !self.enabled {
            return;
        }
        let entry = DumpEntry {
            name: name.map(str::to_string),
            location,
            rendered: self.dumper.truncate(rendered),
            offset_ms: self.events.offset_ms(clock::now_secs()),
        };
        if let Some(evicted) = self.events.push_dump(entry) {
            log::debug!(
                "[DEBUGBAR] Dump buffer full, evicted dump from +{}ms",
                evicted.offset_ms
            );
        }
    }

    /// Record an exception card and mirror it into the log as ERROR.
    pub fn add_exception(&mut self, info: &ErrorInfo) {
        if !self.enabled {
            return;
        }
        let now = clock::now_secs();
        self.events.push_exception(info.to_record(self.events.offset_ms(now)));

        let mut context = Map::new();
        context.insert("type".to_string(), json!(info.kind));
        if let Some(location) = &info.location {
            context.insert("file".to_string(), json!(location.file));
            context.insert("line".to_string(), json!(location.line));
        }
        self.events.push_log(
            LogLevel::Error,
            format!("{}: {}", info.kind, info.message),
            context,
            now,
        );
    }

    pub fn add_error<E: StdError + 'static>(&mut self, err: &E) {
        if !self.enabled {
            return;
        }
        self.add_exception(&ErrorInfo::from_error(err));
    }

    /// Record the error of `result`, if any, and hand it back untouched.
    pub fn capture<T, E: StdError + 'static>(&mut self, result: Result<T, E>) -> Result<T, E> {
        if let Err(e) = &result {
            self.add_error(e);
        }
        result
    }

    pub fn span_begin(&mut self, label: impl Into<String>, meta: Meta) -> SpanId {
        if !self.enabled {
            return SpanId::INVALID;
        }
        self.spans.begin(label, meta)
    }

    pub fn span_end(&mut self, id: SpanId) {
        if !self.enabled {
            return;
        }
        self.spans.end(id);
    }

    /// Open a span that ends when the guard drops, whether or not the bar
    /// is still enabled by then.
    pub fn guard(&mut self, label: impl Into<String>, meta: Meta) -> SpanGuard<'_, DebugBar> {
        let id = self.span_begin(label, meta);
        SpanGuard::new(self, id)
    }

    /// Run `f` inside a span; the span ends even if `f` fails or unwinds,
    /// or disables the bar.
    pub fn measure<R>(
        &mut self,
        label: impl Into<String>,
        meta: Meta,
        f: impl FnOnce(&mut DebugBar) -> R,
    ) -> R {
        let mut guard = self.guard(label, meta);
        f(&mut *guard)
    }

    // =====================================================
    // Accessors
    // =====================================================

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn spans(&self) -> &SpanTracker {
        &self.spans
    }

    pub fn collectors(&self) -> &CollectorRegistry {
        &self.collectors
    }

    pub fn collectors_mut(&mut self) -> &mut CollectorRegistry {
        &mut self.collectors
    }

    pub fn plugins(&self) -> &PluginManager {
        &self.plugins
    }

    pub fn plugins_mut(&mut self) -> &mut PluginManager {
        &mut self.plugins
    }

    pub fn history(&self) -> Option<&HistoryManager> {
        self.history.as_ref()
    }

    pub fn set_history(&mut self, history: Option<HistoryManager>) {
        self.history = history;
    }

    pub fn dumper(&self) -> &DumperConfig {
        &self.dumper
    }

    pub fn set_dumper(&mut self, dumper: DumperConfig) {
        self.events.set_max_dumps(dumper.max_dumps());
        self.dumper = dumper;
    }

    // =====================================================
    // Payload
    // =====================================================

    /// Assemble the payload for the current state. Empty when disabled.
    pub fn build_payload(&mut self) -> Result<Payload, DebugBarError> {
        if !self.enabled {
            return Ok(Payload::new());
        }
        self.build_payload_at(clock::now_secs())
    }

    /// [`build_payload`](Self::build_payload) with an explicit "now".
    pub fn build_payload_at(&mut self, now: f64) -> Result<Payload, DebugBarError> {
        if !self.enabled {
            return Ok(Payload::new());
        }

        self.spans.finalize_at(now);
        let dumps = self.events.dumps().to_vec();
        let state = DebugState::new(&self.events, &dumps, self.spans.closed(), now);
        let panels = self.collectors.render_all(&state)?;

        let request_start = self.events.request_start();
        let mut payload = Payload::new();
        payload.insert(
            "_meta".to_string(),
            json!({
                "generated_at": clock::rfc3339(now),
                "elapsed_ms": state.elapsed_ms(),
                "request_start": request_start,
            }),
        );

        let timeline: Vec<Value> = self
            .events
            .marks_sorted()
            .into_iter()
            .map(|mark| {
                json!({
                    "label": mark.label,
                    "timestamp": mark.timestamp,
                    "offset_ms": clock::elapsed_ms(request_start, mark.timestamp),
                })
            })
            .collect();
        payload.insert("timeline".to_string(), Value::Array(timeline));

        let mut spans: Vec<&Span> = state.spans.iter().collect();
        spans.sort_by(|a, b| a.start.total_cmp(&b.start).then(a.id.cmp(&b.id)));
        payload.insert("timeline_spans".to_string(), serde_json::to_value(spans)?);

        payload.insert("logs".to_string(), serde_json::to_value(state.logs)?);
        payload.insert("queries".to_string(), serde_json::to_value(state.queries)?);
        payload.insert("dumps".to_string(), serde_json::to_value(state.dumps)?);
        payload.insert("exceptions".to_string(), serde_json::to_value(state.exceptions)?);

        let mut nav = Vec::with_capacity(panels.len());
        for panel in panels {
            nav.push(json!({
                "key": panel.key,
                "label": panel.label,
                "icon": panel.icon,
                "order": panel.order,
                "html": panel.html,
            }));
            payload.insert(panel.key, panel.data);
        }
        payload.insert("_panels".to_string(), Value::Array(nav));

        let mut payload = self.plugins.extend_payload(payload);
        self.attach_history_meta(&mut payload);
        Ok(payload)
    }

    /// Persist `payload` to history and mark it as the current snapshot.
    ///
    /// `Ok(None)` when the bar is disabled or no history is configured.
    pub fn persist(&self, payload: &mut Payload) -> Result<Option<String>, DebugBarError> {
        if !self.enabled {
            return Ok(None);
        }
        let Some(history) = self.history.as_ref() else {
            return Ok(None);
        };

        let value = Value::Object(std::mem::take(payload));
        let saved = history.persist(&value);
        if let Value::Object(map) = value {
            *payload = map;
        }

        let Some(id) = saved? else {
            return Ok(None);
        };
        payload.insert("_history_current".to_string(), json!(id));
        self.attach_history_meta(payload);
        Ok(Some(id))
    }

    pub fn build_and_persist(&mut self) -> Result<Payload, DebugBarError> {
        let mut payload = self.build_payload()?;
        self.persist(&mut payload)?;
        Ok(payload)
    }

    /// Best-effort: a listing failure is logged and the key left out.
    fn attach_history_meta(&self, payload: &mut Payload) {
        let Some(history) = self.history.as_ref().filter(|h| h.is_enabled()) else {
            return;
        };
        match history.recent_meta().map(serde_json::to_value) {
            Ok(Ok(meta)) => {
                payload.insert("_history_meta".to_string(), meta);
            }
            Ok(Err(e)) => log::warn!("[DEBUGBAR] Failed to encode history metadata: {}", e),
            Err(e) => log::warn!("[DEBUGBAR] Failed to list recent snapshots: {}", e),
        }
    }
}

impl SpanSink for DebugBar {
    fn end_span(&mut self, id: SpanId) {
        self.spans.end(id);
    }
}
