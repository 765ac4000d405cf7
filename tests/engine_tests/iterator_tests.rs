//! Tests for DbIterator
//!
//! These tests verify:
//! - Forward / reverse / seek over memtable and tables together
//! - Direction changes
//! - Hidden tombstones and overwritten versions
//! - Snapshot-bounded iteration
//! - Iterators pin their state across flushes and compactions

use stratakv::{Config, DbIterator, Engine, ReadOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_engine(memtable_size_limit: usize) -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(memtable_size_limit)
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

fn key(i: usize) -> Vec<u8> {
    format!("key{:03}", i).into_bytes()
}

fn collect_forward(iter: &mut DbIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    iter.seek_to_first();
    while iter.valid() {
        out.push((iter.key().to_vec(), iter.value().to_vec()));
        iter.next();
    }
    iter.status().unwrap();
    out
}

fn collect_reverse(iter: &mut DbIterator) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    iter.seek_to_last();
    while iter.valid() {
        out.push(iter.key().to_vec());
        iter.prev();
    }
    iter.status().unwrap();
    out
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_empty_database() {
    let (_temp, engine) = setup_engine(1024 * 1024);
    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();

    iter.seek_to_first();
    assert!(!iter.valid());
    iter.seek_to_last();
    assert!(!iter.valid());
    iter.seek(b"anything");
    assert!(!iter.valid());
    iter.status().unwrap();
}

#[test]
fn test_hundred_keys_across_memtable_and_tables() {
    let (_temp, engine) = setup_engine(2 * 1024);

    // Insert out of order so entries land in several tables
    for i in (0..100).rev() {
        engine.put(&key(i), format!("v{}", i).as_bytes()).unwrap();
    }
    assert!(engine.sstable_count() > 0);

    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
    let forward = collect_forward(&mut iter);
    assert_eq!(forward.len(), 100);
    for (i, (k, v)) in forward.iter().enumerate() {
        assert_eq!(k, &key(i));
        assert_eq!(v, format!("v{}", i).as_bytes());
    }

    let reverse = collect_reverse(&mut iter);
    let expected: Vec<Vec<u8>> = (0..100).rev().map(key).collect();
    assert_eq!(reverse, expected);
}

#[test]
fn test_seek() {
    let (_temp, engine) = setup_engine(1024 * 1024);
    for i in (0..100).step_by(10) {
        engine.put(&key(i), b"v").unwrap();
    }
    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();

    iter.seek(&key(35));
    assert!(iter.valid());
    assert_eq!(iter.key(), key(40).as_slice());

    iter.seek(&key(40));
    assert_eq!(iter.key(), key(40).as_slice());

    iter.seek(b"key999");
    assert!(!iter.valid());

    iter.seek(b"");
    assert_eq!(iter.key(), key(0).as_slice());
}

#[test]
fn test_direction_changes() {
    let (_temp, engine) = setup_engine(1024 * 1024);
    for i in 0..5 {
        engine.put(&key(i), b"v").unwrap();
    }
    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();

    iter.seek(&key(2));
    iter.next();
    assert_eq!(iter.key(), key(3).as_slice());
    iter.prev();
    assert_eq!(iter.key(), key(2).as_slice());
    iter.prev();
    assert_eq!(iter.key(), key(1).as_slice());
    iter.next();
    assert_eq!(iter.key(), key(2).as_slice());

    iter.seek_to_last();
    iter.prev();
    iter.next();
    assert_eq!(iter.key(), key(4).as_slice());
    iter.next();
    assert!(!iter.valid());
}

// =============================================================================
// Visibility Tests
// =============================================================================

#[test]
fn test_tombstones_and_overwrites_hidden() {
    let (_temp, engine) = setup_engine(1024 * 1024);
    for i in 0..10 {
        engine.put(&key(i), b"first").unwrap();
    }
    engine.flush().unwrap();
    for i in (0..10).step_by(2) {
        engine.delete(&key(i)).unwrap();
    }
    engine.put(&key(3), b"second").unwrap();

    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
    let forward = collect_forward(&mut iter);
    let keys: Vec<Vec<u8>> = forward.iter().map(|(k, _)| k.clone()).collect();
    assert_eq!(keys, vec![key(1), key(3), key(5), key(7), key(9)]);
    assert_eq!(forward[1].1, b"second".to_vec());

    let reverse = collect_reverse(&mut iter);
    assert_eq!(reverse, vec![key(9), key(7), key(5), key(3), key(1)]);

    // Seeking onto a deleted key lands on the next live one
    iter.seek(&key(4));
    assert_eq!(iter.key(), key(5).as_slice());
}

#[test]
fn test_iteration_at_snapshot() {
    let (_temp, engine) = setup_engine(1024 * 1024);
    engine.put(b"a", b"1").unwrap();
    engine.put(b"b", b"1").unwrap();
    let snapshot = engine.get_snapshot();
    engine.put(b"a", b"2").unwrap();
    engine.delete(b"b").unwrap();
    engine.put(b"c", b"2").unwrap();

    let mut old = engine.new_iterator(&ReadOptions::with_snapshot(&snapshot)).unwrap();
    assert_eq!(
        collect_forward(&mut old),
        vec![(b"a".to_vec(), b"1".to_vec()), (b"b".to_vec(), b"1".to_vec())]
    );

    let mut now = engine.new_iterator(&ReadOptions::default()).unwrap();
    assert_eq!(
        collect_forward(&mut now),
        vec![(b"a".to_vec(), b"2".to_vec()), (b"c".to_vec(), b"2".to_vec())]
    );
}

#[test]
fn test_iterator_is_a_stable_view() {
    let (_temp, engine) = setup_engine(4 * 1024);
    for i in 0..50 {
        engine.put(&key(i), b"before").unwrap();
    }
    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();

    // Rewrite and compact everything underneath the open iterator
    for i in 0..50 {
        engine.put(&key(i), b"after").unwrap();
    }
    engine.put(b"zzz", b"after").unwrap();
    engine.compact_range(None, None).unwrap();

    let forward = collect_forward(&mut iter);
    assert_eq!(forward.len(), 50);
    assert!(forward.iter().all(|(_, v)| v == b"before"));
}

#[test]
fn test_verify_checksums_option() {
    let (_temp, engine) = setup_engine(1024 * 1024);
    for i in 0..20 {
        engine.put(&key(i), b"v").unwrap();
    }
    engine.flush().unwrap();

    let options = ReadOptions {
        verify_checksums: true,
        ..ReadOptions::default()
    };
    let mut iter = engine.new_iterator(&options).unwrap();
    assert_eq!(collect_forward(&mut iter).len(), 20);
    assert_eq!(engine.get_with(&options, &key(7)).unwrap(), Some(b"v".to_vec()));
}
