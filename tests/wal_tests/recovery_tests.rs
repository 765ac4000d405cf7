//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Recovery from a clean WAL and from an empty WAL
//! - Recovery with partial writes (torn tail is truncated)
//! - Paranoid recovery refuses a damaged WAL
//! - Verify mode (stats only, file untouched)
//! - Engine reopen replays unflushed writes

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use stratakv::wal::{Operation, WalEntry, WalRecovery, WalWriter};
use stratakv::{Config, Engine, WalSyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let wal_path = temp_dir.path().join("test.wal");
    (temp_dir, wal_path)
}

fn put(i: usize) -> Operation {
    Operation::Put {
        key: format!("key{}", i).into_bytes(),
        value: format!("value{}", i).into_bytes(),
    }
}

/// Write `count` single-operation entries with sequences 1..=count
fn write_entries_via_writer(path: &Path, count: usize) {
    let mut writer = WalWriter::create(path, WalSyncStrategy::EveryWrite).unwrap();
    for i in 0..count {
        writer
            .append(&WalEntry::new(i as u64 + 1, vec![put(i)]), false)
            .unwrap();
    }
}

fn append_garbage(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

/// Newest write-ahead log in an engine directory
fn newest_log(dir: &Path) -> PathBuf {
    let mut logs: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().map_or(false, |ext| ext == "log"))
        .collect();
    logs.sort();
    logs.pop().expect("engine directory has a log")
}

fn engine_config(dir: &TempDir) -> Config {
    Config::builder().data_dir(dir.path()).build()
}

// =============================================================================
// Recover: Clean WAL Tests
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, wal_path) = setup_temp_wal();
    File::create(&wal_path).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert!(entries.is_empty());
    assert_eq!(result.entries_recovered, 0);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_sequence, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_clean_wal() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 25);

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 25);
    assert_eq!(result.entries_recovered, 25);
    assert_eq!(result.last_sequence, 25);
    assert!(!result.was_truncated);
    assert_eq!(result.valid_bytes, fs::metadata(&wal_path).unwrap().len());
    assert_eq!(entries[3].operations, vec![put(3)]);
}

#[test]
fn test_recover_multi_operation_entry() {
    let (_temp, wal_path) = setup_temp_wal();
    {
        let mut writer = WalWriter::create(&wal_path, WalSyncStrategy::OnRequest).unwrap();
        let entry = WalEntry::new(
            10,
            vec![put(0), Operation::Delete { key: b"key1".to_vec() }, put(2)],
        );
        writer.append(&entry, true).unwrap();
    }

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].sequence, 10);
    assert_eq!(entries[0].operations.len(), 3);
    assert_eq!(result.last_sequence, 12);
}

// =============================================================================
// Recover: Damaged WAL Tests
// =============================================================================

#[test]
fn test_recover_truncates_torn_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 5);
    let good_len = fs::metadata(&wal_path).unwrap().len();
    append_garbage(&wal_path, &[0xde, 0xad, 0xbe]);

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 5);
    assert_eq!(result.entries_corrupted, 1);
    assert!(result.was_truncated);
    assert_eq!(result.valid_bytes, good_len);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), good_len);

    // A second pass sees a clean file
    let (_, again) = WalRecovery::recover(&wal_path, false).unwrap();
    assert!(!again.was_truncated);
    assert_eq!(again.entries_recovered, 5);
}

#[test]
fn test_recover_stops_at_checksum_mismatch() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 3);

    // Flip the last payload byte of the last record
    let mut bytes = fs::read(&wal_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&wal_path, &bytes).unwrap();

    let (entries, result) = WalRecovery::recover(&wal_path, false).unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(result.last_sequence, 2);
    assert!(result.was_truncated);
}

#[test]
fn test_paranoid_recover_fails_on_torn_tail() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 2);
    append_garbage(&wal_path, &[1, 2, 3, 4, 5]);
    let len_before = fs::metadata(&wal_path).unwrap().len();

    let err = WalRecovery::recover(&wal_path, true).unwrap_err();

    assert!(err.is_corruption());
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), len_before);
}

#[test]
fn test_verify_does_not_modify_file() {
    let (_temp, wal_path) = setup_temp_wal();
    write_entries_via_writer(&wal_path, 4);
    append_garbage(&wal_path, &[9; 6]);
    let len_before = fs::metadata(&wal_path).unwrap().len();

    let result = WalRecovery::verify(&wal_path).unwrap();

    assert_eq!(result.entries_recovered, 4);
    assert!(result.was_truncated);
    assert!(result.valid_bytes < len_before);
    assert_eq!(fs::metadata(&wal_path).unwrap().len(), len_before);
}

// =============================================================================
// Engine Reopen Tests
// =============================================================================

#[test]
fn test_reopen_replays_unflushed_writes() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(&temp)).unwrap();
        for i in 0..100 {
            engine.put(format!("key{}", i).as_bytes(), b"value").unwrap();
        }
        assert_eq!(engine.sstable_count(), 0);
    }

    let engine = Engine::open(engine_config(&temp)).unwrap();
    for i in 0..100 {
        assert_eq!(
            engine.get(format!("key{}", i).as_bytes()).unwrap(),
            Some(b"value".to_vec())
        );
    }
    assert_eq!(engine.last_sequence(), 100);
}

#[test]
fn test_reopen_after_torn_log_tail() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(&temp)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.put(b"b", b"2").unwrap();
        engine.close().unwrap();
    }
    append_garbage(&newest_log(temp.path()), &[0xab, 0xcd]);

    let engine = Engine::open(engine_config(&temp)).unwrap();
    assert_eq!(engine.get(b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(b"b").unwrap(), Some(b"2".to_vec()));

    // New writes continue after the recovered sequence
    engine.put(b"c", b"3").unwrap();
    assert_eq!(engine.last_sequence(), 3);
}

#[test]
fn test_paranoid_open_rejects_torn_log() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(&temp)).unwrap();
        engine.put(b"a", b"1").unwrap();
        engine.close().unwrap();
    }
    append_garbage(&newest_log(temp.path()), &[0xab, 0xcd]);

    let config = Config::builder()
        .data_dir(temp.path())
        .paranoid_checks(true)
        .build();
    let err = Engine::open(config).unwrap_err();
    assert!(err.is_corruption(), "{}", err);
}

#[test]
fn test_overwrite_and_delete_survive_reopen() {
    let temp = TempDir::new().unwrap();
    {
        let engine = Engine::open(engine_config(&temp)).unwrap();
        engine.put(b"k", b"old").unwrap();
        engine.flush().unwrap();
        engine.put(b"k", b"new").unwrap();
        engine.put(b"gone", b"x").unwrap();
        engine.flush().unwrap();
        engine.delete(b"gone").unwrap();
    }

    for _ in 0..2 {
        let engine = Engine::open(engine_config(&temp)).unwrap();
        assert_eq!(engine.get(b"k").unwrap(), Some(b"new".to_vec()));
        assert_eq!(engine.get(b"gone").unwrap(), None);
    }
}
