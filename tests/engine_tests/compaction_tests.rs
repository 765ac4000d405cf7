//! Tests for flushes and compactions
//!
//! These tests verify:
//! - Overwritten values and tombstones are dropped by compaction
//! - Background compaction keeps level 0 small
//! - Single files move down a level without being rewritten
//! - Files at levels > 0 never overlap
//! - Data survives compaction and reopen

use std::cmp::Ordering;
use std::thread;
use std::time::{Duration, Instant};

use stratakv::keys::extract_user_key;
use stratakv::{Config, Engine, Range, ReadOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn small_config(dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(dir.path())
        .memtable_size_limit(16 * 1024)
        .max_file_size(32 * 1024)
        .max_bytes_for_level_base(64 * 1024)
        .level0_compaction_trigger(2)
        .build()
}

/// Poll `condition` for up to five seconds
fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn key(i: u32) -> Vec<u8> {
    format!("key{:06}", i).into_bytes()
}

fn assert_levels_disjoint(engine: &Engine) {
    for level in 1..engine.config().max_levels {
        let files = engine.level_files(level);
        for pair in files.windows(2) {
            let prev_largest = extract_user_key(&pair[0].largest);
            let next_smallest = extract_user_key(&pair[1].smallest);
            assert_eq!(
                prev_largest.cmp(next_smallest),
                Ordering::Less,
                "level {} files {} and {} overlap",
                level,
                pair[0].number,
                pair[1].number
            );
        }
    }
}

// =============================================================================
// Garbage Collection Tests
// =============================================================================

#[test]
fn test_overwrites_are_compacted_away() {
    let dir = TempDir::new().unwrap();
    // Keep all ten flushes in level 0 until the manual compaction
    let config = Config::builder()
        .data_dir(dir.path())
        .level0_compaction_trigger(20)
        .level0_slowdown_writes_trigger(20)
        .level0_stop_writes_trigger(24)
        .build();
    let engine = Engine::open(config).unwrap();
    let value = vec![b'v'; 1000];

    for _round in 0..10 {
        for i in 0..100 {
            engine.put(&key(i), &value).unwrap();
        }
        engine.flush().unwrap();
    }
    let all = [Range::new("key", "kez")];
    let before = engine.get_approximate_sizes(&all).unwrap()[0];
    assert!(before > 900_000, "ten copies on disk: {}", before);

    engine.compact_range(None, None).unwrap();
    let after = engine.get_approximate_sizes(&all).unwrap()[0];
    assert!(after < 150_000, "one copy on disk: {}", after);
    assert_eq!(engine.get(&key(42)).unwrap(), Some(value));
}

#[test]
fn test_deleted_keys_leave_no_tables() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(Config::builder().data_dir(dir.path()).build()).unwrap();

    for i in 0..100 {
        engine.put(&key(i), b"value").unwrap();
    }
    engine.flush().unwrap();
    for i in 0..100 {
        engine.delete(&key(i)).unwrap();
    }
    engine.compact_range(None, None).unwrap();

    assert_eq!(engine.sstable_count(), 0, "{}", engine.level_summary());
    assert_eq!(engine.get(&key(5)).unwrap(), None);
}

#[test]
fn test_tombstone_never_resurrects_deeper_value() {
    let dir = TempDir::new().unwrap();
    // Every level is over budget as soon as it holds a table, so tables
    // sink until a level is big enough for them
    let config = Config::builder()
        .data_dir(dir.path())
        .level0_compaction_trigger(1)
        .max_bytes_for_level_base(1)
        .build();
    let engine = Engine::open(config).unwrap();
    let settled = |engine: &Engine| (0..3).all(|level| engine.num_files_at_level(level) == 0);

    engine.put(b"k", b"old").unwrap();
    engine.put(b"m", b"kept").unwrap();
    engine.flush().unwrap();
    assert!(eventually(|| settled(&engine)), "{}", engine.level_summary());

    engine.delete(b"k").unwrap();
    engine.put(b"j", b"new").unwrap();
    engine.flush().unwrap();
    assert!(
        eventually(|| {
            assert_eq!(engine.get(b"k").unwrap(), None);
            settled(&engine)
        }),
        "{}",
        engine.level_summary()
    );

    assert_eq!(engine.get(b"k").unwrap(), None);
    assert_eq!(engine.get(b"m").unwrap(), Some(b"kept".to_vec()));
    assert_eq!(engine.get(b"j").unwrap(), Some(b"new".to_vec()));
}

// =============================================================================
// Background Compaction Tests
// =============================================================================

#[test]
fn test_single_file_moves_down() {
    let dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(dir.path())
        .level0_compaction_trigger(1)
        .build();
    let engine = Engine::open(config).unwrap();

    engine.put(b"a", b"1").unwrap();
    engine.flush().unwrap();

    assert!(eventually(|| engine.num_files_at_level(0) == 0), "{}", engine.level_summary());
    assert_eq!(engine.num_files_at_level(1), 1);
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
}

#[test]
fn test_background_compaction_bounds_level0() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(small_config(&dir)).unwrap();
    let value = vec![b'x'; 200];

    // Interleaved key order so every flush overlaps the previous ones
    for round in 0..20u32 {
        for i in 0..100u32 {
            engine.put(&key(i * 20 + round), &value).unwrap();
        }
    }
    engine.flush().unwrap();

    assert!(eventually(|| engine.num_files_at_level(0) < 2), "{}", engine.level_summary());
    assert!((1..7).any(|level| engine.num_files_at_level(level) > 0));
    assert_levels_disjoint(&engine);

    for i in (0..2000).step_by(97) {
        assert_eq!(engine.get(&key(i)).unwrap(), Some(value.clone()), "key {}", i);
    }
}

#[test]
fn test_manual_compaction_splits_outputs() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(small_config(&dir)).unwrap();
    let value = vec![b'y'; 500];

    for i in 0..1000 {
        engine.put(&key(i), &value).unwrap();
    }
    engine.compact_range(None, None).unwrap();

    // ~500 KB of data in 32 KB tables
    let deeper: usize = (1..7).map(|level| engine.num_files_at_level(level)).sum();
    assert!(deeper > 1, "{}", engine.level_summary());
    assert_levels_disjoint(&engine);

    let mut iter = engine.new_iterator(&ReadOptions::default()).unwrap();
    iter.seek_to_first();
    let mut count = 0;
    while iter.valid() {
        assert_eq!(iter.key(), key(count).as_slice());
        count += 1;
        iter.next();
    }
    iter.status().unwrap();
    assert_eq!(count, 1000);
}

#[test]
fn test_compacted_data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(small_config(&dir)).unwrap();
        for i in 0..500 {
            engine.put(&key(i), format!("value{}", i).as_bytes()).unwrap();
        }
        for i in (0..500).step_by(3) {
            engine.delete(&key(i)).unwrap();
        }
        engine.compact_range(None, None).unwrap();
        engine.close().unwrap();
    }

    let engine = Engine::open(small_config(&dir)).unwrap();
    for i in 0..500 {
        let expected = if i % 3 == 0 {
            None
        } else {
            Some(format!("value{}", i).into_bytes())
        };
        assert_eq!(engine.get(&key(i)).unwrap(), expected, "key {}", i);
    }
    assert_levels_disjoint(&engine);
}

#[test]
fn test_obsolete_tables_are_deleted() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::open(small_config(&dir)).unwrap();
    for round in 0..5 {
        for i in 0..200 {
            engine.put(&key(i), format!("r{}", round).as_bytes()).unwrap();
        }
        engine.flush().unwrap();
    }
    engine.compact_range(None, None).unwrap();

    let on_disk = std::fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            e.as_ref()
                .unwrap()
                .file_name()
                .to_string_lossy()
                .ends_with(".sst")
        })
        .count();
    assert_eq!(on_disk, engine.sstable_count());
}
