//! PluginManager - registration, enable flags and payload extension.

use super::types::{BoxedPlugin, Plugin, PluginError};
use crate::collectors::RESERVED_KEYS;
use crate::Payload;

fn is_protected_key(key: &str) -> bool {
    key.starts_with('_') || RESERVED_KEYS.contains(&key)
}

struct Registered {
    plugin: BoxedPlugin,
    enabled: bool,
}

/// Plugins in registration order.
#[derive(Default)]
pub struct PluginManager {
    plugins: Vec<Registered>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and boot a plugin. Names must be unique.
    pub fn register(&mut self, mut plugin: BoxedPlugin, enabled: bool) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        if self.position(&name).is_some() {
            return Err(PluginError::DuplicateName { name });
        }
        plugin.boot();
        self.plugins.push(Registered { plugin, enabled });
        log::debug!("[PLUGINS] Registered plugin: {} (enabled: {})", name, enabled);
        Ok(())
    }

    pub fn enable(&mut self, name: &str) -> Result<(), PluginError> {
        self.set_enabled(name, true)
    }

    pub fn disable(&mut self, name: &str) -> Result<(), PluginError> {
        self.set_enabled(name, false)
    }

    fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), PluginError> {
        let idx = self.require(name)?;
        self.plugins[idx].enabled = enabled;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&dyn Plugin, PluginError> {
        let idx = self.require(name)?;
        Ok(self.plugins[idx].plugin.as_ref())
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool, PluginError> {
        let idx = self.require(name)?;
        Ok(self.plugins[idx].enabled)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|r| r.plugin.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Let every enabled plugin contribute keys, in registration order.
    /// Later plugins see earlier contributions. Built-in sections and
    /// `_`-prefixed keys are never replaced; other existing keys are
    /// overwritten with a warning.
    pub fn extend_payload(&self, mut payload: Payload) -> Payload {
        for registered in self.plugins.iter().filter(|r| r.enabled) {
            let name = registered.plugin.name();
            for (key, value) in registered.plugin.extend_payload(&payload) {
                if is_protected_key(&key) {
                    log::warn!("[PLUGINS] Plugin '{}' tried to set reserved key '{}'; ignored", name, key);
                    continue;
                }
                if payload.contains_key(&key) {
                    log::warn!("[PLUGINS] Plugin '{}' overwrote payload key '{}'", name, key);
                }
                payload.insert(key, value);
            }
        }
        payload
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.plugins.iter().position(|r| r.plugin.name() == name)
    }

    fn require(&self, name: &str) -> Result<usize, PluginError> {
        self.position(name).ok_or_else(|| PluginError::NotFound {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct TestPlugin {
        name: String,
        key: String,
        boots: Arc<AtomicUsize>,
    }

    impl TestPlugin {
        fn new(name: &str, key: &str) -> (Box<Self>, Arc<AtomicUsize>) {
            let boots = Arc::new(AtomicUsize::new(0));
            let plugin = Box::new(Self {
                name: name.to_string(),
                key: key.to_string(),
                boots: Arc::clone(&boots),
            });
            (plugin, boots)
        }
    }

    impl Plugin for TestPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn boot(&mut self) {
            self.boots.fetch_add(1, Ordering::SeqCst);
        }

        fn extend_payload(&self, payload: &Payload) -> Payload {
            let mut out = Payload::new();
            out.insert(self.key.clone(), json!({ "seen_keys": payload.len() }));
            out
        }
    }

    #[test]
    fn test_plugin_registration() {
        let mut manager = PluginManager::new();
        let (plugin, boots) = TestPlugin::new("session", "session");
        manager.register(plugin, true).unwrap();
        assert_eq!(boots.load(Ordering::SeqCst), 1);
        assert_eq!(manager.len(), 1);

        let (dup, dup_boots) = TestPlugin::new("session", "other");
        let err = manager.register(dup, true).unwrap_err();
        assert!(matches!(err, PluginError::DuplicateName { .. }));
        assert_eq!(dup_boots.load(Ordering::SeqCst), 0);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_unknown_plugin_lookups() {
        let mut manager = PluginManager::new();
        assert!(matches!(manager.enable("nope"), Err(PluginError::NotFound { .. })));
        assert!(matches!(manager.get("nope"), Err(PluginError::NotFound { .. })));
    }

    #[test]
    fn test_extend_payload_respects_enabled() {
        let mut manager = PluginManager::new();
        let (a, _) = TestPlugin::new("a", "from_a");
        let (b, _) = TestPlugin::new("b", "from_b");
        manager.register(a, true).unwrap();
        manager.register(b, false).unwrap();

        let mut payload = Payload::new();
        payload.insert("logs".to_string(), Value::Array(vec![]));

        let out = manager.extend_payload(payload.clone());
        assert_eq!(out["from_a"], json!({ "seen_keys": 1 }));
        assert!(!out.contains_key("from_b"));

        manager.enable("b").unwrap();
        let out = manager.extend_payload(payload);
        // b runs after a and sees its contribution.
        assert_eq!(out["from_b"], json!({ "seen_keys": 2 }));
        assert!(manager.is_enabled("b").unwrap());
    }

    #[test]
    fn test_extend_payload_keeps_reserved_sections() {
        let mut manager = PluginManager::new();
        let (logs, _) = TestPlugin::new("logs-writer", "logs");
        let (meta, _) = TestPlugin::new("meta-writer", "_meta");
        let (session, _) = TestPlugin::new("session", "session");
        manager.register(logs, true).unwrap();
        manager.register(meta, true).unwrap();
        manager.register(session, true).unwrap();

        let mut payload = Payload::new();
        payload.insert("logs".to_string(), json!([{ "message": "kept" }]));
        payload.insert("_meta".to_string(), json!({ "elapsed_ms": 3.0 }));
        payload.insert("session".to_string(), json!("stale"));

        let out = manager.extend_payload(payload);
        assert_eq!(out["logs"], json!([{ "message": "kept" }]));
        assert_eq!(out["_meta"], json!({ "elapsed_ms": 3.0 }));
        assert_eq!(out["session"], json!({ "seen_keys": 3 }));
    }
}
