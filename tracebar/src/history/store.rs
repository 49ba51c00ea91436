//! File-backed snapshot storage with an append-only index.
//!
//! Snapshot files are written to a temp path and hard-linked into place, so
//! a reader never sees a partial file and an existing id is never replaced.
//! Index appends and retention rewrites run under an exclusive lock
//! (in-process mutex plus an advisory lock on `index.lock`), so concurrent
//! writers never interleave lines. A failed append is truncated away and a
//! torn last line is terminated before the next one. Reads of the index take
//! no lock; a line being appended is skipped as malformed.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use history_types::{
    is_valid_snapshot_id, snapshot_file_name, snapshot_id, SnapshotMeta, INDEX_FILE, SNAPSHOT_DIR,
};
use parking_lot::{Mutex, MutexGuard};
use serde_json::Value;

use super::HistoryError;
use crate::clock;

const LOCK_FILE: &str = "index.lock";

/// Fresh ids are tried this many times before giving up.
const MAX_ID_ATTEMPTS: usize = 8;

/// Durable snapshot history.
pub trait SnapshotStorage: Send + Sync {
    /// Persist a payload and return its new id.
    fn save_snapshot(&self, payload: &Value) -> Result<String, HistoryError>;

    /// `Ok(None)` when no snapshot has this id.
    fn load_snapshot(&self, id: &str) -> Result<Option<Value>, HistoryError>;

    /// Up to `limit` entries, most recent first.
    fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotMeta>, HistoryError>;

    /// Keep only the newest `max` snapshots. Returns how many were evicted.
    fn enforce_retention(&self, max: usize) -> Result<usize, HistoryError>;
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> HistoryError + '_ {
    move |source| HistoryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Held while the index is being appended to or rewritten.
struct IndexLock<'a> {
    file: File,
    _guard: MutexGuard<'a, ()>,
}

impl Drop for IndexLock<'_> {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            log::warn!("[HISTORY] Failed to release index lock: {}", e);
        }
    }
}

pub struct FileStorage {
    root: PathBuf,
    snapshot_dir: PathBuf,
    index_path: PathBuf,
    lock_path: PathBuf,
    index_lock: Mutex<()>,
}

impl FileStorage {
    /// Open (creating if needed) a history directory.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let root = root.into();
        let snapshot_dir = root.join(SNAPSHOT_DIR);
        fs::create_dir_all(&snapshot_dir).map_err(io_error(&snapshot_dir))?;

        let index_path = root.join(INDEX_FILE);
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&index_path)
            .map_err(io_error(&index_path))?;

        log::debug!("[HISTORY] Opened snapshot history at {}", root.display());

        Ok(Self {
            lock_path: root.join(LOCK_FILE),
            root,
            snapshot_dir,
            index_path,
            index_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn snapshot_path(&self, id: &str) -> PathBuf {
        self.snapshot_dir.join(snapshot_file_name(id))
    }

    fn lock_index(&self) -> Result<IndexLock<'_>, HistoryError> {
        let guard = self.index_lock.lock();
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(io_error(&self.lock_path))?;
        FileExt::lock_exclusive(&file).map_err(|source| HistoryError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;
        Ok(IndexLock { file, _guard: guard })
    }

    /// Parse every well-formed index line, in append order.
    fn read_index(&self) -> Result<Vec<SnapshotMeta>, HistoryError> {
        let content = match fs::read_to_string(&self.index_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&self.index_path)(e)),
        };

        let mut entries = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match SnapshotMeta::parse_index_line(line) {
                Some(meta) => entries.push(meta),
                None => log::warn!(
                    "[HISTORY] Skipping malformed index line {} in {}",
                    lineno + 1,
                    self.index_path.display()
                ),
            }
        }
        Ok(entries)
    }

    fn append_index(&self, line: &str) -> Result<(), HistoryError> {
        self.append_index_with(|file| file.write_all(line.as_bytes()))
    }

    /// Run `write` against the index opened for append. A torn last line
    /// is terminated first; on failure the index is cut back to its
    /// previous length. Caller holds the index lock.
    fn append_index_with<F>(&self, write: F) -> Result<(), HistoryError>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.index_path)
            .map_err(io_error(&self.index_path))?;
        let prev_len = file
            .metadata()
            .map_err(io_error(&self.index_path))?
            .len();

        let written = self
            .terminate_torn_line(&mut file, prev_len)
            .and_then(|_| write(&mut file))
            .and_then(|_| file.sync_data());
        if let Err(e) = written {
            if let Err(trunc) = file.set_len(prev_len) {
                log::error!(
                    "[HISTORY] Failed to roll back {} to {} bytes: {}",
                    self.index_path.display(),
                    prev_len,
                    trunc
                );
            }
            return Err(io_error(&self.index_path)(e));
        }
        Ok(())
    }

    fn terminate_torn_line(&self, file: &mut File, len: u64) -> io::Result<()> {
        if len == 0 {
            return Ok(());
        }
        let mut last = [0u8; 1];
        file.seek(SeekFrom::Start(len - 1))?;
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            log::warn!(
                "[HISTORY] Terminating torn last line in {}",
                self.index_path.display()
            );
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    /// Replace the index with `entries` via temp file + rename.
    fn rewrite_index(&self, entries: &[SnapshotMeta]) -> Result<(), HistoryError> {
        let mut buf = String::new();
        for meta in entries {
            buf.push_str(&meta.to_index_line()?);
        }
        let tmp = self.index_path.with_extension("jsonl.tmp");
        write_synced(&tmp, buf.as_bytes(), false).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &self.index_path).map_err(io_error(&self.index_path))
    }

    /// Write `bytes` under a fresh id. Returns the id and committed path.
    fn commit_file(&self, ts: &str, bytes: &[u8]) -> Result<(String, PathBuf), HistoryError> {
        self.commit_file_with(ts, bytes, || hex::encode(rand::random::<[u8; 4]>()))
    }

    /// The file is linked into place, so an id taken by another writer is
    /// retried with the next suffix instead of being overwritten.
    fn commit_file_with<F>(
        &self,
        ts: &str,
        bytes: &[u8],
        mut next_suffix: F,
    ) -> Result<(String, PathBuf), HistoryError>
    where
        F: FnMut() -> String,
    {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = snapshot_id(ts, &next_suffix());
            let path = self.snapshot_path(&id);
            let tmp = path.with_extension("json.tmp");
            match write_synced(&tmp, bytes, true) {
                Ok(()) => {}
                // Another writer holds the same temp name.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    let _ = fs::remove_file(&tmp);
                    return Err(io_error(&tmp)(e));
                }
            }

            let linked = fs::hard_link(&tmp, &path);
            if let Err(e) = fs::remove_file(&tmp) {
                log::warn!("[HISTORY] Failed to remove {}: {}", tmp.display(), e);
            }
            match linked {
                Ok(()) => return Ok((id, path)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_error(&path)(e)),
            }
        }
        Err(HistoryError::IdExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }
}

fn write_synced(path: &Path, bytes: &[u8], create_new: bool) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true);
    if create_new {
        options.create_new(true);
    } else {
        options.create(true).truncate(true);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl SnapshotStorage for FileStorage {
    fn save_snapshot(&self, payload: &Value) -> Result<String, HistoryError> {
        let meta = payload.get("_meta");
        let ts = meta
            .and_then(|m| m.get("generated_at"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| clock::rfc3339(clock::now_secs()));
        let elapsed_ms = meta.and_then(|m| m.get("elapsed_ms")).and_then(Value::as_f64);

        let bytes = serde_json::to_vec_pretty(payload)?;
        let (id, path) = self.commit_file(&ts, &bytes)?;

        let line = SnapshotMeta {
            id: id.clone(),
            ts,
            elapsed_ms,
            size: Some(bytes.len() as u64),
        }
        .to_index_line()?;

        // An unindexed file would be invisible to listing and retention.
        let indexed = self.lock_index().and_then(|_lock| self.append_index(&line));
        if let Err(e) = indexed {
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        log::debug!("[HISTORY] Saved snapshot {} ({} bytes)", id, bytes.len());
        Ok(id)
    }

    fn load_snapshot(&self, id: &str) -> Result<Option<Value>, HistoryError> {
        if !is_valid_snapshot_id(id) {
            return Ok(None);
        }
        let path = self.snapshot_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_error(&path)(e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| HistoryError::Decode { path, source })
    }

    fn list_snapshots(&self, limit: usize) -> Result<Vec<SnapshotMeta>, HistoryError> {
        if limit == 0 {
            return Err(HistoryError::InvalidLimit { limit });
        }
        Ok(self.read_index()?.into_iter().rev().take(limit).collect())
    }

    fn enforce_retention(&self, max: usize) -> Result<usize, HistoryError> {
        if max == 0 {
            return Err(HistoryError::InvalidLimit { limit: max });
        }

        let evicted = {
            let _lock = self.lock_index()?;
            let mut entries = self.read_index()?;
            if entries.len() <= max {
                return Ok(0);
            }
            let kept = entries.split_off(entries.len() - max);
            self.rewrite_index(&kept)?;
            entries
        };

        // Index no longer references these, so deleting outside the lock is safe.
        for meta in &evicted {
            let path = self.snapshot_path(&meta.id);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => log::warn!("[HISTORY] Failed to delete {}: {}", path.display(), e),
            }
        }

        log::info!(
            "[HISTORY] Retention removed {} snapshot(s), keeping {}",
            evicted.len(),
            max
        );
        Ok(evicted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn storage() -> (TempDir, FileStorage) {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        (dir, storage)
    }

    fn payload(n: u64) -> Value {
        json!({
            "_meta": { "generated_at": "2026-10-16T12:00:00.000000Z", "elapsed_ms": 12.5 },
            "n": n,
        })
    }

    #[test]
    fn test_open_creates_layout() {
        let (dir, _storage) = storage();
        assert!(dir.path().join(SNAPSHOT_DIR).is_dir());
        assert!(dir.path().join(INDEX_FILE).is_file());
    }

    #[test]
    fn test_save_then_load() {
        let (dir, storage) = storage();
        let id = storage.save_snapshot(&payload(1)).unwrap();

        assert!(id.starts_with("2026-10-16T12-00-00-000000Z_"));
        assert_eq!(storage.load_snapshot(&id).unwrap(), Some(payload(1)));

        let leftovers: Vec<_> = fs::read_dir(dir.path().join(SNAPSHOT_DIR))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());

        let listed = storage.list_snapshots(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].elapsed_ms, Some(12.5));
        let on_disk = fs::metadata(storage.snapshot_path(&id)).unwrap().len();
        assert_eq!(listed[0].size, Some(on_disk));
    }

    #[test]
    fn test_id_falls_back_to_now_without_meta() {
        let (_dir, storage) = storage();
        let id = storage.save_snapshot(&json!({ "x": 1 })).unwrap();
        assert!(is_valid_snapshot_id(&id));
        assert_eq!(storage.load_snapshot(&id).unwrap(), Some(json!({ "x": 1 })));
    }

    #[test]
    fn test_load_missing_is_none() {
        let (_dir, storage) = storage();
        assert_eq!(storage.load_snapshot("2026-01-01T00-00-00Z_deadbeef").unwrap(), None);
        assert_eq!(storage.load_snapshot("../index").unwrap(), None);
        assert_eq!(storage.load_snapshot("").unwrap(), None);
    }

    #[test]
    fn test_load_corrupt_file_is_decode_error() {
        let (_dir, storage) = storage();
        fs::write(storage.snapshot_path("broken"), b"{not json").unwrap();
        let err = storage.load_snapshot("broken").unwrap_err();
        assert!(matches!(err, HistoryError::Decode { .. }));
    }

    #[test]
    fn test_list_most_recent_first() {
        let (_dir, storage) = storage();
        let ids: Vec<_> = (0..5).map(|n| storage.save_snapshot(&payload(n)).unwrap()).collect();

        let listed: Vec<_> = storage
            .list_snapshots(3)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, vec![ids[4].clone(), ids[3].clone(), ids[2].clone()]);
        assert!(matches!(
            storage.list_snapshots(0),
            Err(HistoryError::InvalidLimit { limit: 0 })
        ));
    }

    #[test]
    fn test_malformed_index_lines_skipped() {
        let (dir, storage) = storage();
        let id = storage.save_snapshot(&payload(1)).unwrap();
        let mut index = OpenOptions::new()
            .append(true)
            .open(dir.path().join(INDEX_FILE))
            .unwrap();
        index.write_all(b"garbage\n{\"id\":\"../etc\",\"ts\":\"x\"}\n{\"id\":").unwrap();

        let listed = storage.list_snapshots(10).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
    }

    #[test]
    fn test_retention_evicts_oldest() {
        let (dir, storage) = storage();
        let ids: Vec<_> = (0..6).map(|n| storage.save_snapshot(&payload(n)).unwrap()).collect();

        assert_eq!(storage.enforce_retention(2).unwrap(), 4);

        let listed: Vec<_> = storage
            .list_snapshots(10)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, vec![ids[5].clone(), ids[4].clone()]);
        for evicted in &ids[..4] {
            assert_eq!(storage.load_snapshot(evicted).unwrap(), None);
        }
        assert_eq!(storage.load_snapshot(&ids[5]).unwrap(), Some(payload(5)));
        assert!(!dir.path().join("index.jsonl.tmp").exists());
    }

    #[test]
    fn test_retention_under_limit_is_noop() {
        let (_dir, storage) = storage();
        storage.save_snapshot(&payload(1)).unwrap();
        assert_eq!(storage.enforce_retention(5).unwrap(), 0);
        assert_eq!(storage.list_snapshots(5).unwrap().len(), 1);
        assert!(matches!(
            storage.enforce_retention(0),
            Err(HistoryError::InvalidLimit { .. })
        ));
    }

    #[test]
    fn test_reopen_sees_existing_history() {
        let (dir, storage) = storage();
        let id = storage.save_snapshot(&payload(7)).unwrap();
        drop(storage);

        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(reopened.list_snapshots(1).unwrap()[0].id, id);
        assert_eq!(reopened.load_snapshot(&id).unwrap(), Some(payload(7)));
    }

    fn listed_ids(storage: &FileStorage) -> Vec<String> {
        storage
            .list_snapshots(100)
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect()
    }

    #[test]
    fn test_torn_index_line_does_not_swallow_next_save() {
        let (dir, storage) = storage();
        let first = storage.save_snapshot(&payload(1)).unwrap();
        let mut index = OpenOptions::new()
            .append(true)
            .open(dir.path().join(INDEX_FILE))
            .unwrap();
        index.write_all(b"{\"id\":\"2026").unwrap();

        let second = storage.save_snapshot(&payload(2)).unwrap();
        assert_eq!(listed_ids(&storage), vec![second.clone(), first.clone()]);

        assert_eq!(storage.enforce_retention(1).unwrap(), 1);
        assert_eq!(listed_ids(&storage), vec![second.clone()]);
        assert!(!storage.snapshot_path(&first).exists());
        assert_eq!(storage.load_snapshot(&second).unwrap(), Some(payload(2)));
    }

    #[test]
    fn test_failed_append_is_rolled_back() {
        let (dir, storage) = storage();
        let first = storage.save_snapshot(&payload(1)).unwrap();
        let before = fs::read(dir.path().join(INDEX_FILE)).unwrap();

        let err = storage
            .append_index_with(|file| {
                file.write_all(b"{\"id\":\"half")?;
                Err(io::Error::other("disk full"))
            })
            .unwrap_err();
        assert!(matches!(err, HistoryError::Io { .. }));
        assert_eq!(fs::read(dir.path().join(INDEX_FILE)).unwrap(), before);

        let second = storage.save_snapshot(&payload(2)).unwrap();
        assert_eq!(listed_ids(&storage), vec![second, first]);
    }

    #[test]
    fn test_commit_never_replaces_existing_id() {
        let (_dir, storage) = storage();
        let ts = "2026-10-16T12:00:00.000000Z";
        let taken = storage.snapshot_path(&snapshot_id(ts, "00000000"));
        fs::write(&taken, b"{\"original\":true}").unwrap();

        let mut suffixes = vec!["00000001", "00000000"];
        let (id, path) = storage
            .commit_file_with(ts, b"{}", || suffixes.pop().unwrap().to_string())
            .unwrap();
        assert_eq!(id, snapshot_id(ts, "00000001"));
        assert_eq!(fs::read(&path).unwrap(), b"{}");
        assert_eq!(fs::read(&taken).unwrap(), b"{\"original\":true}");
        assert!(!path.with_extension("json.tmp").exists());
        assert!(!taken.with_extension("json.tmp").exists());

        let err = storage
            .commit_file_with(ts, b"{}", || "00000000".to_string())
            .unwrap_err();
        assert!(matches!(err, HistoryError::IdExhausted { attempts: MAX_ID_ATTEMPTS }));
        assert_eq!(fs::read(&taken).unwrap(), b"{\"original\":true}");
    }
}
