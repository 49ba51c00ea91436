//! HistoryManager - couples a storage backend with the history settings.

use std::sync::Arc;

use history_types::SnapshotMeta;
use serde_json::Value;

use super::store::SnapshotStorage;
use super::HistoryError;
use crate::config::HistoryConfig;

/// Every call is a no-op while history is disabled.
#[derive(Clone)]
pub struct HistoryManager {
    storage: Arc<dyn SnapshotStorage>,
    config: HistoryConfig,
}

impl HistoryManager {
    pub fn new(storage: Arc<dyn SnapshotStorage>, config: HistoryConfig) -> Self {
        Self { storage, config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled()
    }

    pub fn config(&self) -> &HistoryConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn SnapshotStorage> {
        &self.storage
    }

    /// Save the payload, then trim history to `max_snapshots`.
    ///
    /// A failed retention sweep is logged; the snapshot itself is committed.
    pub fn persist(&self, payload: &Value) -> Result<Option<String>, HistoryError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        let id = self.storage.save_snapshot(payload)?;
        if let Err(e) = self.storage.enforce_retention(self.config.max_snapshots()) {
            log::error!("[HISTORY] Retention after saving {} failed: {}", id, e);
        }
        Ok(Some(id))
    }

    /// The newest `ui_list_limit` snapshots, most recent first.
    pub fn recent_meta(&self) -> Result<Vec<SnapshotMeta>, HistoryError> {
        if !self.is_enabled() {
            return Ok(Vec::new());
        }
        self.storage.list_snapshots(self.config.ui_list_limit())
    }

    pub fn load(&self, id: &str) -> Result<Option<Value>, HistoryError> {
        if !self.is_enabled() {
            return Ok(None);
        }
        self.storage.load_snapshot(id)
    }
}
