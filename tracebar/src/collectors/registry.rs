//! Registry of collectors by identity.
//!
//! Registration stores a descriptor only. Instances are created inside
//! [`CollectorRegistry::render_all`], once per call, for enabled entries.

use std::collections::HashMap;

use super::types::{Collector, CollectorDescriptor, CollectorError, CollectorMeta, RenderedCollector};
use crate::state::DebugState;

struct Entry {
    descriptor: CollectorDescriptor,
    enabled: bool,
}

/// Collectors in registration order, addressable by key.
#[derive(Default)]
pub struct CollectorRegistry {
    entries: Vec<Entry>,
    index: HashMap<&'static str, usize>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector type.
    pub fn register<C: Collector>(&mut self, enabled: bool) -> Result<(), CollectorError> {
        self.register_descriptor(CollectorDescriptor::of::<C>(), enabled)
    }

    /// Register a descriptor built at runtime, e.g. by an external loader.
    ///
    /// A duplicate key fails and leaves the existing registration untouched.
    pub fn register_descriptor(
        &mut self,
        descriptor: CollectorDescriptor,
        enabled: bool,
    ) -> Result<(), CollectorError> {
        descriptor.validate()?;
        if self.index.contains_key(descriptor.key) {
            return Err(CollectorError::DuplicateKey {
                key: descriptor.key.to_string(),
            });
        }

        self.index.insert(descriptor.key, self.entries.len());
        self.entries.push(Entry { descriptor, enabled });

        log::debug!(
            "[COLLECTORS] Registered collector '{}' (order {}, enabled: {})",
            descriptor.key,
            descriptor.order,
            enabled
        );
        Ok(())
    }

    pub fn set_enabled(&mut self, key: &str, enabled: bool) -> Result<(), CollectorError> {
        let idx = *self.index.get(key).ok_or_else(|| CollectorError::NotFound {
            key: key.to_string(),
        })?;
        self.entries[idx].enabled = enabled;
        Ok(())
    }

    /// `None` if the key was never registered.
    pub fn is_enabled(&self, key: &str) -> Option<bool> {
        self.index.get(key).map(|&idx| self.entries[idx].enabled)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in registration order.
    pub fn keys(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.descriptor.key).collect()
    }

    fn enabled_sorted(&self) -> Vec<&CollectorDescriptor> {
        let mut enabled: Vec<_> = self
            .entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| &e.descriptor)
            .collect();
        // Stable: equal orders keep registration order.
        enabled.sort_by_key(|d| d.order);
        enabled
    }

    /// Metadata of enabled collectors, ascending by order. Never instantiates.
    pub fn metadata(&self) -> Vec<CollectorMeta> {
        self.enabled_sorted().into_iter().map(|d| d.meta()).collect()
    }

    /// Instantiate, collect and render every enabled collector.
    ///
    /// The first failing collector aborts the whole batch.
    pub fn render_all(&self, state: &DebugState<'_>) -> Result<Vec<RenderedCollector>, CollectorError> {
        let mut rows = Vec::with_capacity(self.entries.len());

        for descriptor in self.enabled_sorted() {
            let mut instance = (descriptor.factory)();

            let data = instance
                .collect(state)
                .map_err(|source| CollectorError::Collect {
                    key: descriptor.key.to_string(),
                    source,
                })?;
            let html = instance
                .render(&data)
                .map_err(|source| CollectorError::Render {
                    key: descriptor.key.to_string(),
                    source,
                })?;

            rows.push(RenderedCollector {
                key: descriptor.key.to_string(),
                label: descriptor.label.to_string(),
                icon: descriptor.icon.to_string(),
                order: descriptor.order,
                html,
                data,
            });
        }

        log::debug!("[COLLECTORS] Rendered {} collector(s)", rows.len());
        Ok(rows)
    }
}
