//! Snapshot history: durable payload copies plus retention.

pub mod manager;
pub mod store;

pub use history_types::SnapshotMeta;
pub use manager::HistoryManager;
pub use store::{FileStorage, SnapshotStorage};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("snapshot {path:?} is not valid JSON: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("limit must be greater than zero (got {limit})")]
    InvalidLimit { limit: usize },

    #[error("failed to lock history index {path:?}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no free snapshot id after {attempts} attempts")]
    IdExhausted { attempts: usize },
}
