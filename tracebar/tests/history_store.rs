use serde_json::{json, Value};
use std::collections::HashSet;
use std::thread;

use tempfile::TempDir;
use tracebar::{FileStorage, SnapshotStorage};

fn snapshot_files(dir: &TempDir) -> usize {
    std::fs::read_dir(dir.path().join(history_types::SNAPSHOT_DIR))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == history_types::SNAPSHOT_EXT))
        .count()
}

fn payload(n: usize) -> Value {
    json!({
        "_meta": { "generated_at": "2026-10-16T09:30:00.000000Z", "elapsed_ms": n as f64 },
        "queries": [{ "sql": "SELECT ?", "params": [n], "duration_ms": 1.0, "connection": null }],
    })
}

#[test]
fn test_retention_keeps_most_recent() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();

    let ids: Vec<_> = (0..10).map(|n| storage.save_snapshot(&payload(n)).unwrap()).collect();
    assert_eq!(storage.enforce_retention(4).unwrap(), 6);

    let listed: Vec<_> = storage
        .list_snapshots(4)
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    let expected: Vec<_> = ids[6..].iter().rev().cloned().collect();
    assert_eq!(listed, expected);

    for id in &ids[..6] {
        assert_eq!(storage.load_snapshot(id).unwrap(), None);
    }
    for (n, id) in ids.iter().enumerate().skip(6) {
        assert_eq!(storage.load_snapshot(id).unwrap(), Some(payload(n)));
    }
}

#[test]
fn test_concurrent_writers() {
    const WRITERS: usize = 8;
    const PER_WRITER: usize = 10;

    let dir = TempDir::new().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();

    let ids: Vec<String> = thread::scope(|scope| {
        let handles: Vec<_> = (0..WRITERS)
            .map(|w| {
                let storage = &storage;
                scope.spawn(move || {
                    (0..PER_WRITER)
                        .map(|i| storage.save_snapshot(&payload(w * PER_WRITER + i)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
    });

    let unique: HashSet<_> = ids.iter().collect();
    assert_eq!(unique.len(), WRITERS * PER_WRITER);

    let listed = storage.list_snapshots(1000).unwrap();
    assert_eq!(listed.len(), WRITERS * PER_WRITER);
    let listed_ids: HashSet<_> = listed.iter().map(|m| &m.id).collect();
    assert_eq!(listed_ids, unique);

    for id in &ids {
        assert!(storage.load_snapshot(id).unwrap().is_some());
    }
}

#[test]
fn test_separate_handles_share_one_index() {
    let dir = TempDir::new().unwrap();

    thread::scope(|scope| {
        for w in 0..4 {
            let root = dir.path().to_path_buf();
            scope.spawn(move || {
                let storage = FileStorage::open(root).unwrap();
                for i in 0..5 {
                    storage.save_snapshot(&payload(w * 5 + i)).unwrap();
                }
            });
        }
    });

    let storage = FileStorage::open(dir.path()).unwrap();
    assert_eq!(storage.list_snapshots(100).unwrap().len(), 20);
    assert_eq!(storage.enforce_retention(5).unwrap(), 15);
    assert_eq!(storage.list_snapshots(100).unwrap().len(), 5);
}

#[test]
fn test_retention_concurrent_with_saves() {
    const WRITERS: usize = 4;
    const PER_WRITER: usize = 25;
    const KEEP: usize = 5;

    let dir = TempDir::new().unwrap();
    let storage = FileStorage::open(dir.path()).unwrap();

    thread::scope(|scope| {
        for w in 0..WRITERS {
            let storage = &storage;
            scope.spawn(move || {
                for i in 0..PER_WRITER {
                    storage.save_snapshot(&payload(w * PER_WRITER + i)).unwrap();
                }
            });
        }
        let storage = &storage;
        scope.spawn(move || {
            for _ in 0..50 {
                storage.enforce_retention(KEEP).unwrap();
                thread::yield_now();
            }
        });
    });

    let listed = storage.list_snapshots(1000).unwrap();
    assert_eq!(snapshot_files(&dir), listed.len());
    for meta in &listed {
        assert!(storage.load_snapshot(&meta.id).unwrap().is_some(), "{} not loadable", meta.id);
    }

    storage.enforce_retention(KEEP).unwrap();
    let listed = storage.list_snapshots(1000).unwrap();
    assert_eq!(listed.len(), KEEP);
    assert_eq!(snapshot_files(&dir), KEEP);
    for meta in &listed {
        assert!(storage.load_snapshot(&meta.id).unwrap().is_some());
    }
}
