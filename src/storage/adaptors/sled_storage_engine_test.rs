use tempfile::tempdir;

use crate::SledStorageEngine;
use crate::StorageEngine;
use crate::WriteOp;

fn open(path: &std::path::Path) -> SledStorageEngine {
    SledStorageEngine::open(path, 16 * 1024 * 1024, None).unwrap()
}

#[test]
fn test_commit_and_scan() {
    let dir = tempdir().unwrap();
    let engine = open(dir.path());

    engine
        .commit(vec![
            WriteOp::put("machine/b", "2"),
            WriteOp::put("machine/a", "1"),
            WriteOp::put("node/a", "3"),
        ])
        .unwrap();

    let scanned = engine.scan_prefix(b"machine/").unwrap();
    assert_eq!(
        scanned,
        vec![
            (b"machine/a".to_vec(), b"1".to_vec()),
            (b"machine/b".to_vec(), b"2".to_vec())
        ]
    );
    assert_eq!(engine.len(), 3);
    assert!(!engine.is_empty());
}

#[test]
fn test_data_survives_reopen() {
    let dir = tempdir().unwrap();
    {
        let engine = open(dir.path());
        engine.commit(vec![WriteOp::put("machine/a", "1")]).unwrap();
        engine.commit(vec![WriteOp::delete("machine/a"), WriteOp::put("machine/b", "2")]).unwrap();
        engine.flush().unwrap();
    }
    let engine = open(dir.path());
    assert_eq!(engine.get(b"machine/a").unwrap(), None);
    assert_eq!(engine.get(b"machine/b").unwrap(), Some(b"2".to_vec()));
}
