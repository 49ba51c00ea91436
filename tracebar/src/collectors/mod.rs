//! Pluggable collectors and their registry.
//!
//! Collectors are registered by type. The registry can list their static
//! metadata cheaply and only instantiates them when asked to render.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut registry = CollectorRegistry::new();
//! registry.register::<KpiCollector>(true)?;
//! let nav = registry.metadata();            // no instances created
//! let panels = registry.render_all(&state)?; // instantiate -> collect -> render
//! ```

pub mod builtin;
mod registry;
mod types;

pub use registry::CollectorRegistry;
pub use types::{
    BoxError, Collector, CollectorDescriptor, CollectorError, CollectorMeta, RenderedCollector,
    DEFAULT_ORDER, RESERVED_KEYS,
};
