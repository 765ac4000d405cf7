//! Tests for Engine
//!
//! These tests verify:
//! - Basic get/put/delete operations and write batches
//! - Snapshots
//! - Custom comparators and filter policies (and their persisted identity)
//! - Approximate sizes
//! - Directory lock and open options
//! - Concurrent access patterns

use std::cmp::Ordering;
use std::sync::Arc;
use std::thread;

use stratakv::{
    BloomFilterPolicy, Comparator, Config, Engine, FilterPolicy, Range, ReadOptions, WalSyncStrategy, WriteBatch,
    WriteOptions,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_engine() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(Config::builder().data_dir(temp_dir.path()).build()).unwrap();
    (temp_dir, engine)
}

fn setup_temp_engine_with_small_memtable() -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .memtable_size_limit(8 * 1024) // Small to trigger flushes
        .build();
    let engine = Engine::open(config).unwrap();
    (temp_dir, engine)
}

/// Orders keys in reverse byte order
struct ReverseComparator;

impl Comparator for ReverseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }

    fn name(&self) -> &str {
        "test.ReverseComparator"
    }
}

/// Filter over keys with trailing spaces removed, delegating to a bloom filter
struct TrimSpacesPolicy {
    inner: BloomFilterPolicy,
}

fn trim_spaces(key: &[u8]) -> &[u8] {
    let end = key.iter().rposition(|&b| b != b' ').map_or(0, |i| i + 1);
    &key[..end]
}

impl FilterPolicy for TrimSpacesPolicy {
    fn name(&self) -> &str {
        "test.TrimSpacesFilter"
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let trimmed: Vec<&[u8]> = keys.iter().map(|k| trim_spaces(k)).collect();
        self.inner.create_filter(&trimmed, dst);
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.inner.key_may_match(trim_spaces(key), filter)
    }
}

/// Orders "major:minor" keys numerically by both parts
struct TwoPartComparator;

fn two_part(key: &[u8]) -> Option<(u64, u64)> {
    let text = std::str::from_utf8(key).ok()?;
    let (major, minor) = text.split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

impl Comparator for TwoPartComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (two_part(a), two_part(b)) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a.cmp(b),
        }
    }

    fn name(&self) -> &str {
        "test.TwoPartComparator"
    }
}

fn forward_keys(engine: &Engine) -> Vec<String> {
    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
    let mut keys = Vec::new();
    iter.seek_to_first();
    while iter.valid() {
        keys.push(String::from_utf8(iter.key().to_vec()).unwrap());
        iter.next();
    }
    iter.status().unwrap();
    keys
}

fn backward_keys(engine: &Engine) -> Vec<String> {
    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
    let mut keys = Vec::new();
    iter.seek_to_last();
    while iter.valid() {
        keys.push(String::from_utf8(iter.key().to_vec()).unwrap());
        iter.prev();
    }
    iter.status().unwrap();
    keys
}

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_engine_open_creates_files() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");

    let _engine = Engine::open(Config::builder().data_dir(&data_dir).build()).unwrap();

    assert!(data_dir.join("LOCK").exists());
    assert!(data_dir.join("CURRENT").exists());
    let names: Vec<String> = std::fs::read_dir(&data_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(names.iter().any(|n| n.starts_with("MANIFEST-")));
    assert!(names.iter().any(|n| n.starts_with("wal_") && n.ends_with(".log")));
}

#[test]
fn test_engine_put_get() {
    let (_temp, engine) = setup_temp_engine();
    assert_eq!(engine.memtable_size(), 0);

    engine.put(b"hello", b"world").unwrap();

    assert!(engine.memtable_size() > 0);
    assert_eq!(engine.get(b"hello").unwrap(), Some(b"world".to_vec()));
    assert_eq!(engine.get(b"nonexistent").unwrap(), None);
}

#[test]
fn test_engine_overwrite_and_delete() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"key", b"v1").unwrap();
    engine.put(b"key", b"v2").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), Some(b"v2".to_vec()));

    engine.delete(b"key").unwrap();
    assert_eq!(engine.get(b"key").unwrap(), None);

    // Deleting a missing key is fine
    engine.delete(b"never-written").unwrap();
}

#[test]
fn test_engine_empty_key_and_value() {
    let (_temp, engine) = setup_temp_engine();

    engine.put(b"", b"empty key").unwrap();
    engine.put(b"empty value", b"").unwrap();

    assert_eq!(engine.get(b"").unwrap(), Some(b"empty key".to_vec()));
    assert_eq!(engine.get(b"empty value").unwrap(), Some(Vec::new()));
}

#[test]
fn test_engine_sync_writes() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 3 })
        .build();
    let engine = Engine::open(config).unwrap();

    engine.put_with(&WriteOptions::sync(), b"a", b"1").unwrap();
    engine.delete_with(&WriteOptions::sync(), b"a").unwrap();
    engine.put_with(&WriteOptions::default(), b"b", b"2").unwrap();

    assert_eq!(engine.get(b"a").unwrap(), None);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));
}

#[test]
fn test_engine_values_survive_flush() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();

    for i in 0..500 {
        let key = format!("key{:04}", i);
        let value = format!("value{}", i).repeat(10);
        engine.put(key.as_bytes(), value.as_bytes()).unwrap();
    }
    engine.flush().unwrap();
    assert!(engine.sstable_count() > 0);

    for i in (0..500).step_by(37) {
        let key = format!("key{:04}", i);
        let value = format!("value{}", i).repeat(10);
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(value.into_bytes()));
    }
}

#[test]
fn test_engine_large_value() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();
    let big = vec![0xabu8; 100 * 1024];

    engine.put(b"big", &big).unwrap();
    engine.put(b"small", b"x").unwrap();
    engine.flush().unwrap();

    assert_eq!(engine.get(b"big").unwrap(), Some(big));
    assert_eq!(engine.get(b"small").unwrap(), Some(b"x".to_vec()));
}

// =============================================================================
// Write Batch Tests
// =============================================================================

#[test]
fn test_write_batch_applies_in_order() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"doomed", b"here").unwrap();

    let mut batch = WriteBatch::new();
    batch
        .put(b"a", b"1")
        .put(b"b", b"2")
        .delete(b"doomed")
        .put(b"a", b"3") // later op in the batch wins
        .delete(b"b");
    engine.write(batch).unwrap();

    assert_eq!(engine.get(b"a").unwrap(), Some(b"3".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), None);
    assert_eq!(engine.get(b"doomed").unwrap(), None);
}

#[test]
fn test_write_batch_uses_one_sequence_per_operation() {
    let (_temp, engine) = setup_temp_engine();
    let before = engine.last_sequence();

    let mut batch = WriteBatch::new();
    batch.put(b"x", b"1").put(b"y", b"2").delete(b"z");
    engine.write(batch).unwrap();
    assert_eq!(engine.last_sequence(), before + 3);

    // Empty batches are accepted and consume nothing
    engine.write(WriteBatch::new()).unwrap();
    assert_eq!(engine.last_sequence(), before + 3);
}

// =============================================================================
// Snapshot Tests
// =============================================================================

#[test]
fn test_snapshot_isolation() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"k", b"v1").unwrap();
    engine.put(b"gone", b"still here").unwrap();

    let snapshot = engine.get_snapshot();
    engine.put(b"k", b"v2").unwrap();
    engine.delete(b"gone").unwrap();
    engine.put(b"new", b"later").unwrap();

    let at_snapshot = ReadOptions::with_snapshot(&snapshot);
    assert_eq!(engine.get_with(&at_snapshot, b"k").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get_with(&at_snapshot, b"gone").unwrap(), Some(b"still here".to_vec()));
    assert_eq!(engine.get_with(&at_snapshot, b"new").unwrap(), None);

    assert_eq!(engine.get(b"k").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(engine.get(b"gone").unwrap(), None);

    assert_eq!(engine.snapshot_count(), 1);
    engine.release_snapshot(snapshot);
    assert_eq!(engine.snapshot_count(), 0);
}

#[test]
fn test_snapshot_survives_flush_and_compaction() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();
    for i in 0..200 {
        engine.put(format!("key{:03}", i).as_bytes(), b"old").unwrap();
    }
    let snapshot = engine.get_snapshot();
    for i in 0..200 {
        engine.put(format!("key{:03}", i).as_bytes(), b"new").unwrap();
    }
    engine.delete(b"key007").unwrap();
    engine.compact_range(None, None).unwrap();

    let at_snapshot = ReadOptions::with_snapshot(&snapshot);
    assert_eq!(engine.get_with(&at_snapshot, b"key007").unwrap(), Some(b"old".to_vec()));
    assert_eq!(engine.get_with(&at_snapshot, b"key150").unwrap(), Some(b"old".to_vec()));
    assert_eq!(engine.get(b"key150").unwrap(), Some(b"new".to_vec()));
    assert_eq!(engine.get(b"key007").unwrap(), None);
}

// =============================================================================
// Comparator and Filter Tests
// =============================================================================

#[test]
fn test_custom_comparator_orders_iteration() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .comparator(Arc::new(ReverseComparator))
        .build();
    let engine = Engine::open(config).unwrap();

    for key in ["b", "a", "c"] {
        engine.put(key.as_bytes(), key.as_bytes()).unwrap();
    }
    engine.flush().unwrap();
    engine.put(b"d", b"d").unwrap();

    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
    iter.seek_to_first();
    let mut keys = Vec::new();
    while iter.valid() {
        keys.push(String::from_utf8(iter.key().to_vec()).unwrap());
        iter.next();
    }
    assert_eq!(keys, vec!["d", "c", "b", "a"]);
    assert_eq!(engine.get(b"b").unwrap(), Some(b"b".to_vec()));
}

#[test]
fn test_two_part_comparator_order_survives_flush_compaction_and_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = || {
        Config::builder()
            .data_dir(temp_dir.path())
            .comparator(Arc::new(TwoPartComparator))
            .filter_policy(Arc::new(BloomFilterPolicy::new(10)))
            .build()
    };
    let expected = vec!["1:3", "2:1", "2:3", "2:100"];
    let reversed: Vec<&str> = expected.iter().rev().copied().collect();

    let check = |engine: &Engine| {
        assert_eq!(forward_keys(engine), expected);
        assert_eq!(backward_keys(engine), reversed);
        for key in &expected {
            assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(key.as_bytes().to_vec()));
        }
        assert_eq!(engine.get(b"2:2").unwrap(), None);
    };

    {
        let engine = Engine::open(config()).unwrap();
        for key in ["1:3", "2:3", "2:1", "2:100"] {
            engine.put(key.as_bytes(), key.as_bytes()).unwrap();
        }
        check(&engine);

        engine.flush().unwrap();
        check(&engine);

        engine.compact_range(None, None).unwrap();
        assert_eq!(engine.num_files_at_level(0), 0);
        check(&engine);
        engine.close().unwrap();
    }

    let engine = Engine::open(config()).unwrap();
    check(&engine);
}

#[test]
fn test_reopen_with_different_comparator_fails() {
    let temp_dir = TempDir::new().unwrap();
    {
        let config = Config::builder()
            .data_dir(temp_dir.path())
            .comparator(Arc::new(ReverseComparator))
            .build();
        let engine = Engine::open(config).unwrap();
        engine.put(b"k", b"v").unwrap();
    }

    let err = Engine::open(Config::builder().data_dir(temp_dir.path()).build()).unwrap_err();
    assert!(err.is_invalid_argument(), "unexpected error: {err}");
}

#[test]
fn test_wrapping_filter_policy() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .filter_policy(Arc::new(TrimSpacesPolicy {
            inner: BloomFilterPolicy::new(10),
        }))
        .build();
    let engine = Engine::open(config).unwrap();

    for i in 0..300 {
        engine.put(format!("key{}  ", i).as_bytes(), format!("v{}", i).as_bytes()).unwrap();
    }
    engine.flush().unwrap();

    for i in 0..300 {
        let key = format!("key{}  ", i);
        assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(format!("v{}", i).into_bytes()));
    }
    // Same trimmed key, different user key: the filter may pass, the table must not
    assert_eq!(engine.get(b"key5").unwrap(), None);
    assert_eq!(engine.get(b"missing").unwrap(), None);
}

#[test]
fn test_reopen_with_different_filter_policy() {
    let temp_dir = TempDir::new().unwrap();
    {
        let config = Config::builder()
            .data_dir(temp_dir.path())
            .filter_policy(Arc::new(BloomFilterPolicy::new(10)))
            .build();
        let engine = Engine::open(config).unwrap();
        engine.put(b"k", b"v").unwrap();
        engine.flush().unwrap();
    }

    let mismatched = Config::builder()
        .data_dir(temp_dir.path())
        .filter_policy(Arc::new(TrimSpacesPolicy {
            inner: BloomFilterPolicy::new(10),
        }))
        .build();
    assert!(Engine::open(mismatched).unwrap_err().is_invalid_argument());

    // No policy at all is allowed; filters are simply ignored
    let engine = Engine::open(Config::builder().data_dir(temp_dir.path()).build()).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
}

// =============================================================================
// Approximate Size Tests
// =============================================================================

#[test]
fn test_approximate_sizes() {
    let (_temp, engine) = setup_temp_engine();
    let value = vec![b'x'; 1000];
    for i in 0..1000 {
        engine.put(format!("key{:06}", i).as_bytes(), &value).unwrap();
    }

    // Memtable data is not counted
    let sizes = engine.get_approximate_sizes(&[Range::new("", "zzz")]).unwrap();
    assert_eq!(sizes, vec![0]);

    engine.compact_range(None, None).unwrap();

    let sizes = engine
        .get_approximate_sizes(&[
            Range::new("key000100", "key000200"),
            Range::new("key000000", "key001000"),
            Range::new("a", "b"),
            Range::new("key000500", "key000500"),
        ])
        .unwrap();
    assert!((80_000..=130_000).contains(&sizes[0]), "range of 100 values: {}", sizes[0]);
    assert!((900_000..=1_200_000).contains(&sizes[1]), "all values: {}", sizes[1]);
    assert_eq!(sizes[2], 0);
    assert_eq!(sizes[3], 0);
}

#[test]
fn test_approximate_sizes_reversed_range() {
    let (_temp, engine) = setup_temp_engine();
    let err = engine.get_approximate_sizes(&[Range::new("b", "a")]).unwrap_err();
    assert!(err.is_invalid_argument());
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_lock_prevents_second_open() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    let engine = Engine::open(config.clone()).unwrap();
    let err = Engine::open(config.clone()).unwrap_err();
    assert!(err.is_io(), "unexpected error: {err}");

    engine.close().unwrap();
    let reopened = Engine::open(config).unwrap();
    drop(reopened);
}

#[test]
fn test_error_if_exists() {
    let temp_dir = TempDir::new().unwrap();
    Engine::open(Config::builder().data_dir(temp_dir.path()).build())
        .unwrap()
        .close()
        .unwrap();

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .error_if_exists(true)
        .build();
    assert!(Engine::open(config).unwrap_err().is_invalid_argument());
}

#[test]
fn test_create_if_missing_false() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path().join("absent"))
        .create_if_missing(false)
        .build();
    assert!(Engine::open(config).unwrap_err().is_invalid_argument());

    // An existing but empty directory is not a database either
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .create_if_missing(false)
        .build();
    assert!(Engine::open(config).unwrap_err().is_invalid_argument());
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .block_size(0)
        .build();
    assert!(Engine::open(config).unwrap_err().is_invalid_argument());
}

#[test]
fn test_open_path_convenience() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open_path(temp_dir.path()).unwrap();
        engine.put(b"k", b"v").unwrap();
    }
    let engine = Engine::open_path(temp_dir.path()).unwrap();
    assert_eq!(engine.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert_eq!(engine.data_dir(), temp_dir.path());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers_and_readers() {
    let (_temp, engine) = setup_temp_engine_with_small_memtable();
    let engine = Arc::new(engine);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..250 {
                    let key = format!("t{}-key{:04}", t, i);
                    engine.put(key.as_bytes(), format!("value-{}-{}", t, i).as_bytes()).unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..50 {
                    // Whatever is visible must be well-formed and ordered
                    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
                    iter.seek_to_first();
                    let mut last: Option<Vec<u8>> = None;
                    while iter.valid() {
                        if let Some(prev) = &last {
                            assert!(prev.as_slice() < iter.key());
                        }
                        assert!(iter.value().starts_with(b"value-"));
                        last = Some(iter.key().to_vec());
                        iter.next();
                    }
                    iter.status().unwrap();
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }

    for t in 0..4 {
        for i in (0..250).step_by(17) {
            let key = format!("t{}-key{:04}", t, i);
            assert_eq!(
                engine.get(key.as_bytes()).unwrap(),
                Some(format!("value-{}-{}", t, i).into_bytes())
            );
        }
    }
}

#[test]
fn test_batch_delete_and_put_applied_together() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"k1", b"v1").unwrap();
    engine.put(b"k2", b"v2").unwrap();
    let before = engine.get_snapshot();

    let mut batch = WriteBatch::new();
    batch.delete(b"k1").put(b"k2", b"new-v2");
    engine.write(batch).unwrap();

    assert_eq!(engine.get(b"k1").unwrap(), None);
    assert_eq!(engine.get(b"k2").unwrap(), Some(b"new-v2".to_vec()));
    assert_eq!(forward_keys(&engine), vec!["k2"]);

    let old = ReadOptions::with_snapshot(&before);
    assert_eq!(engine.get_with(&old, b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(engine.get_with(&old, b"k2").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_batch_is_atomic_to_readers() {
    let (_temp, engine) = setup_temp_engine();
    engine.put(b"k1", b"v1-0").unwrap();
    engine.put(b"k2", b"v2-0").unwrap();
    let engine = Arc::new(engine);

    // Even rounds delete k1 and rewrite k2, odd rounds restore both
    let writer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            for round in 0..1000u32 {
                let mut batch = WriteBatch::new();
                if round % 2 == 0 {
                    batch.delete(b"k1").put(b"k2", format!("new-v2-{}", round));
                } else {
                    batch
                        .put(b"k1", format!("v1-{}", round))
                        .put(b"k2", format!("v2-{}", round));
                }
                engine.write(batch).unwrap();
            }
        })
    };

    for _ in 0..500 {
        let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
        let mut k1 = None;
        let mut k2 = None;
        iter.seek_to_first();
        while iter.valid() {
            let value = String::from_utf8(iter.value().to_vec()).unwrap();
            match iter.key() {
                b"k1" => k1 = Some(value),
                b"k2" => k2 = Some(value),
                other => panic!("unexpected key {:?}", other),
            }
            iter.next();
        }
        iter.status().unwrap();

        let k2 = k2.expect("k2 is always present");
        match k1 {
            None => assert!(k2.starts_with("new-v2-"), "k1 deleted but k2 = {}", k2),
            Some(k1) => assert_eq!(k1.trim_start_matches("v1-"), k2.trim_start_matches("v2-")),
        }
    }
    writer.join().unwrap();
}
