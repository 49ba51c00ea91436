//! Plugin trait and errors.

use thiserror::Error;

use crate::Payload;

/// A payload extender registered by instance.
///
/// `extend_payload` returns only the keys the plugin contributes; the
/// manager merges them over the payload.
pub trait Plugin: Send {
    /// Unique, stable machine name (e.g. "heuristics").
    fn name(&self) -> &str;

    /// Called once right after registration.
    fn boot(&mut self) {}

    fn extend_payload(&self, payload: &Payload) -> Payload;
}

pub type BoxedPlugin = Box<dyn Plugin>;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin '{name}' already registered")]
    DuplicateName { name: String },

    #[error("plugin '{name}' not found")]
    NotFound { name: String },
}
