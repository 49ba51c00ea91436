//! Plugin system - instance-registered payload extenders.
//!
//! Unlike collectors, plugins are registered as live instances and see the
//! fully assembled payload, so they can derive cross-cutting views from it.

pub mod builtin;
pub mod manager;
pub mod types;

pub use manager::PluginManager;
pub use types::{BoxedPlugin, Plugin, PluginError};
