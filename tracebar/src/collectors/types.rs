//! Collector contract and the type-erased descriptor the registry stores.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state::DebugState;

/// Error type returned by collector bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Payload section names owned by the debug bar itself.
pub const RESERVED_KEYS: &[&str] = &[
    "timeline",
    "timeline_spans",
    "logs",
    "queries",
    "dumps",
    "exceptions",
];

/// Default ordering slot for collectors that don't pick one.
pub const DEFAULT_ORDER: i32 = 500;

/// A pluggable unit turning request state into data plus a display fragment.
///
/// The associated functions are static metadata, readable without creating
/// an instance. `create` is only called when the collector actually runs.
pub trait Collector: Send + 'static {
    fn key() -> &'static str
    where
        Self: Sized;

    fn label() -> &'static str
    where
        Self: Sized;

    fn icon() -> &'static str
    where
        Self: Sized,
    {
        ""
    }

    fn order() -> i32
    where
        Self: Sized,
    {
        DEFAULT_ORDER
    }

    fn create() -> Self
    where
        Self: Sized;

    /// Turn the current state into structured data.
    fn collect(&mut self, state: &DebugState<'_>) -> Result<Value, BoxError>;

    /// Turn collected data into a display fragment.
    fn render(&self, data: &Value) -> Result<String, BoxError>;
}

fn instantiate<C: Collector>() -> Box<dyn Collector> {
    Box::new(C::create())
}

/// Static identity of a collector: metadata plus a factory.
#[derive(Clone, Copy)]
pub struct CollectorDescriptor {
    pub key: &'static str,
    pub label: &'static str,
    pub icon: &'static str,
    pub order: i32,
    pub factory: fn() -> Box<dyn Collector>,
}

impl CollectorDescriptor {
    /// Descriptor for a compile-time collector type.
    pub fn of<C: Collector>() -> Self {
        Self {
            key: C::key(),
            label: C::label(),
            icon: C::icon(),
            order: C::order(),
            factory: instantiate::<C>,
        }
    }

    pub fn meta(&self) -> CollectorMeta {
        CollectorMeta {
            key: self.key.to_string(),
            label: self.label.to_string(),
            icon: self.icon.to_string(),
            order: self.order,
        }
    }

    /// Check the static half of the contract.
    pub fn validate(&self) -> Result<(), CollectorError> {
        let violation = |reason: &str| {
            Err(CollectorError::ContractViolation {
                key: self.key.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.key.is_empty() {
            return violation("key must not be empty");
        }
        if self.key.starts_with('_') {
            return violation("keys starting with '_' are reserved for payload metadata");
        }
        if !self
            .key
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
        {
            return violation("key may only contain [a-z0-9_-]");
        }
        if RESERVED_KEYS.contains(&self.key) {
            return violation("key collides with a built-in payload section");
        }
        if self.label.trim().is_empty() {
            return violation("label must not be empty");
        }
        Ok(())
    }
}

impl std::fmt::Debug for CollectorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorDescriptor")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("icon", &self.icon)
            .field("order", &self.order)
            .finish()
    }
}

/// Navigation metadata, available without running the collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorMeta {
    pub key: String,
    pub label: String,
    pub icon: String,
    pub order: i32,
}

/// Output of one enabled collector after collect + render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedCollector {
    pub key: String,
    pub label: String,
    pub icon: String,
    pub order: i32,
    pub html: String,
    pub data: Value,
}

impl RenderedCollector {
    pub fn meta(&self) -> CollectorMeta {
        CollectorMeta {
            key: self.key.clone(),
            label: self.label.clone(),
            icon: self.icon.clone(),
            order: self.order,
        }
    }
}

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("collector key '{key}' already registered")]
    DuplicateKey { key: String },

    #[error("collector '{key}' violates the collector contract: {reason}")]
    ContractViolation { key: String, reason: String },

    #[error("collector '{key}' not found")]
    NotFound { key: String },

    #[error("collector '{key}' failed to collect: {source}")]
    Collect {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("collector '{key}' failed to render: {source}")]
    Render {
        key: String,
        #[source]
        source: BoxError,
    },
}
