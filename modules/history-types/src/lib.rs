//! Shared on-disk contract for tracebar snapshot history.
//!
//! Layout under a history directory:
//! - `snapshots/<id>.json` - one JSON object per committed snapshot
//! - `index.jsonl` - one [`SnapshotMeta`] line per snapshot, in append order
//!
//! This is the only layout an external inspection tool may rely on.

use serde::{Deserialize, Serialize};

/// Directory (relative to the history root) holding snapshot files.
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Append-only JSON-lines index file (relative to the history root).
pub const INDEX_FILE: &str = "index.jsonl";

/// Extension of committed snapshot files.
pub const SNAPSHOT_EXT: &str = "json";

// =====================================================
// Domain Types
// =====================================================

/// One line of the history index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub id: String,
    /// Generation timestamp of the payload (RFC 3339)
    pub ts: String,
    pub elapsed_ms: Option<f64>,
    /// Size of the committed snapshot file in bytes
    pub size: Option<u64>,
}

impl SnapshotMeta {
    /// Encode as a single index line, newline included.
    pub fn to_index_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    /// Decode one index line. Blank or malformed lines yield `None`.
    pub fn parse_index_line(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        serde_json::from_str::<SnapshotMeta>(line)
            .ok()
            .filter(|meta| is_valid_snapshot_id(&meta.id))
    }
}

// =====================================================
// Identity helpers
// =====================================================

/// Build a snapshot id from an RFC 3339 timestamp and a random hex suffix.
///
/// Separators that are awkward in file names (`:`, `.`, `+`) become `-`, so
/// ids sort lexicographically in generation order for fixed-width timestamps.
pub fn snapshot_id(ts: &str, suffix: &str) -> String {
    let stem: String = ts
        .chars()
        .map(|c| match c {
            ':' | '.' | '+' => '-',
            other => other,
        })
        .collect();
    format!("{}_{}", stem, suffix)
}

/// Ids are restricted to `[A-Za-z0-9_-]` so they can never escape the
/// snapshot directory.
pub fn is_valid_snapshot_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// File name of a snapshot inside [`SNAPSHOT_DIR`].
pub fn snapshot_file_name(id: &str) -> String {
    format!("{}.{}", id, SNAPSHOT_EXT)
}
