//! Engine Module
//!
//! The database handle that coordinates all components.
//!
//! ## Responsibilities
//! - Own the directory lock, the active log, and the memtables
//! - Assign sequence numbers and apply write batches atomically
//! - Serve point reads, iterators and snapshots over memtables + Version
//! - Freeze full memtables and hand them to the compaction worker
//! - Replay write-ahead logs on open
//! - Delete files no live Version references

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use fs2::FileExt;
use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::batch::WriteBatch;
use crate::compaction::{build_table, run_compaction, spawn_worker, BackgroundWork, CompactionHost, Task};
use crate::config::{Config, ReadOptions, WriteOptions};
use crate::error::{Result, StrataError};
use crate::iterator::{DbIterator, InternalIterator, MergingIterator};
use crate::keys::{seek_key, InternalKeyComparator, SequenceNumber, MAX_SEQUENCE_NUMBER};
use crate::memtable::{MemTable, MemTableEntry};
use crate::snapshot::{Snapshot, SnapshotList};
use crate::storage::filename::{current_file_path, lock_file_path, log_file_path, parse_file_name, FileType};
use crate::storage::TableCache;
use crate::version::{FileMetaData, VersionEdit, VersionSet};
use crate::wal::{Operation, WalEntry, WalRecovery, WalWriter};

/// A user-key range `[start, limit)` for size estimation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: Vec<u8>,
    pub limit: Vec<u8>,
}

impl Range {
    pub fn new(start: impl Into<Vec<u8>>, limit: impl Into<Vec<u8>>) -> Self {
        Self {
            start: start.into(),
            limit: limit.into(),
        }
    }
}

/// The main storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/delete/write/flush): serialized by the `writer` mutex,
///   which owns the active log.
///   - Lock order: writer → state
///   - A full memtable is frozen into `imm` and a new log started; the
///     writer then continues without waiting for the flush
///
/// - **Reads** (get/iterators/snapshots): take `state` only long enough to
///   clone the memtable and Version `Arc`s and read the last sequence.
///
/// - **Background**: one worker thread flushes `imm` and compacts tables. It
///   takes `state` briefly and never holds it across I/O. Writers stalled on
///   a flush or on too many level-0 files wait on `bg_cv`.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Option<JoinHandle<()>>,
}

/// Shared between the handle and the compaction worker
pub(crate) struct EngineInner {
    config: Config,
    dir: PathBuf,
    icmp: Arc<InternalKeyComparator>,
    table_cache: Arc<TableCache>,
    versions: VersionSet,
    snapshots: Arc<SnapshotList>,

    /// Active log; holding this lock makes the caller the single writer
    writer: Mutex<WalWriter>,
    state: Mutex<EngineState>,
    /// Signalled when a background round ends or the engine shuts down
    bg_cv: Condvar,

    /// Mirrors `state.imm.is_some()` for cheap polling during compaction
    has_imm: AtomicBool,
    shutting_down: AtomicBool,
    tasks: Sender<Task>,

    /// Held for the lifetime of the engine; the advisory lock dies with it
    _lock_file: File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    /// A scheduled round is queued or running
    Compacting,
}

struct EngineState {
    mem: Arc<MemTable>,
    /// Frozen memtable waiting to be flushed
    imm: Option<Arc<MemTable>>,
    /// Number of the active log
    log_number: u64,
    /// First background or log-write failure; poisons all later writes
    bg_error: Option<StrataError>,
    worker: WorkerState,
    /// Table numbers being written that no Version references yet
    pending_outputs: HashSet<u64>,
}

impl Engine {
    /// Open or create a database
    ///
    /// On startup:
    /// 1. Validate the config and take the directory lock
    /// 2. Create a new manifest or recover the existing one
    /// 3. Replay logs newer than the manifest's log number into level-0 tables
    /// 4. Start a fresh log and record it in the manifest
    /// 5. Delete obsolete files and start the compaction worker
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let dir = config.data_dir.clone();

        if config.create_if_missing {
            fs::create_dir_all(&dir)?;
        } else if !dir.is_dir() {
            return Err(StrataError::InvalidArgument(format!(
                "{}: does not exist (create_if_missing is false)",
                dir.display()
            )));
        }
        let lock_file = acquire_lock(&dir)?;

        let icmp = Arc::new(InternalKeyComparator::new(Arc::clone(&config.comparator)));
        let table_cache = Arc::new(TableCache::new(&dir, &config, Arc::clone(&icmp)));
        let versions = VersionSet::new(&dir, &config, Arc::clone(&icmp), Arc::clone(&table_cache));

        if current_file_path(&dir).exists() {
            if config.error_if_exists {
                return Err(StrataError::InvalidArgument(format!(
                    "{}: exists (error_if_exists is true)",
                    dir.display()
                )));
            }
        } else if config.create_if_missing {
            tracing::info!(dir = %dir.display(), "Creating new database");
            versions.create_new()?;
        } else {
            return Err(StrataError::InvalidArgument(format!(
                "{}: does not exist (create_if_missing is false)",
                dir.display()
            )));
        }
        versions.recover()?;

        let mut edit = VersionEdit::new();
        replay_logs(&dir, &config, &icmp, &versions, &mut edit)?;

        let log_number = versions.new_file_number();
        let wal = WalWriter::create(&log_file_path(&dir, log_number), config.wal_sync_strategy)?;
        edit.set_prev_log_number(0);
        edit.set_log_number(log_number);
        versions.log_and_apply(&mut edit)?;

        let (tasks, task_rx) = channel::unbounded();
        let inner = Arc::new(EngineInner {
            state: Mutex::new(EngineState {
                mem: Arc::new(MemTable::new(Arc::clone(&icmp))),
                imm: None,
                log_number,
                bg_error: None,
                worker: WorkerState::Idle,
                pending_outputs: HashSet::new(),
            }),
            config,
            dir,
            icmp,
            table_cache,
            versions,
            snapshots: Arc::new(SnapshotList::new()),
            writer: Mutex::new(wal),
            bg_cv: Condvar::new(),
            has_imm: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            tasks,
            _lock_file: lock_file,
        });

        inner.delete_obsolete_files();
        {
            let mut state = inner.state.lock();
            inner.maybe_schedule_compaction(&mut state);
        }
        let worker = spawn_worker(Arc::clone(&inner), task_rx)?;

        tracing::info!(
            dir = %inner.dir.display(),
            last_sequence = inner.versions.last_sequence(),
            log = log_number,
            levels = %inner.versions.level_summary(),
            "Opened database"
        );
        Ok(Self {
            inner,
            worker: Some(worker),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::builder().data_dir(path.as_ref()).build())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_with(&WriteOptions::default(), key, value)
    }

    pub fn put_with(&self, options: &WriteOptions, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write_with(options, batch)
    }

    /// Delete a key. Deleting a missing key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.delete_with(&WriteOptions::default(), key)
    }

    pub fn delete_with(&self, options: &WriteOptions, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write_with(options, batch)
    }

    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.write_with(&WriteOptions::default(), batch)
    }

    /// Apply a batch atomically
    ///
    /// Steps:
    /// 1. Become the writer and make room in the memtable
    /// 2. Log the whole batch as one record (fsync if requested)
    /// 3. Insert every operation into the memtable
    /// 4. Publish the last sequence; readers see the batch all at once
    pub fn write_with(&self, options: &WriteOptions, batch: WriteBatch) -> Result<()> {
        let inner = &self.inner;
        let mut wal = inner.writer.lock();
        inner.make_room_for_write(&mut wal, false)?;
        if batch.is_empty() {
            return Ok(());
        }

        let first = inner.versions.last_sequence() + 1;
        let entry = WalEntry::new(first, batch.into_operations());
        if let Err(e) = wal.append(&entry, options.sync) {
            tracing::error!(sequence = first, error = %e, "Log write failed");
            inner.record_background_error(e.clone());
            return Err(e);
        }

        let mem = Arc::clone(&inner.state.lock().mem);
        insert_operations(&mem, first, &entry.operations);
        inner.versions.set_last_sequence(entry.last_sequence());
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.get_with(&ReadOptions::default(), key)
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Mutable memtable
    /// 2. Frozen memtable
    /// 3. Tables of the current Version, newest first
    pub fn get_with(&self, options: &ReadOptions<'_>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = &self.inner;
        let (mem, imm, version, sequence) = {
            let state = inner.state.lock();
            let sequence = options
                .snapshot
                .map_or_else(|| inner.versions.last_sequence(), Snapshot::sequence);
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                inner.versions.current(),
                sequence,
            )
        };

        let from_memory = mem
            .get(key, sequence)
            .or_else(|| imm.as_ref().and_then(|imm| imm.get(key, sequence)));
        let entry = match from_memory {
            Some(entry) => Some(entry),
            None => version.get(&inner.table_cache, &seek_key(key, sequence))?,
        };

        Ok(match entry {
            Some(MemTableEntry::Value(value)) => Some(value),
            Some(MemTableEntry::Tombstone) | None => None,
        })
    }

    /// Ordered cursor over the database as of `options.snapshot` (or now).
    /// Starts unpositioned.
    pub fn new_iterator(&self, options: &ReadOptions<'_>) -> Result<DbIterator> {
        let inner = &self.inner;
        let (mem, imm, version, sequence) = {
            let state = inner.state.lock();
            let sequence = options
                .snapshot
                .map_or_else(|| inner.versions.last_sequence(), Snapshot::sequence);
            (
                Arc::clone(&state.mem),
                state.imm.clone(),
                inner.versions.current(),
                sequence,
            )
        };

        let mut children: Vec<Box<dyn InternalIterator>> = vec![Box::new(mem.iter())];
        if let Some(imm) = &imm {
            children.push(Box::new(imm.iter()));
        }
        version.add_iterators(&inner.table_cache, options.verify_checksums, &mut children)?;

        let merged = MergingIterator::new(Arc::clone(&inner.icmp), children);
        Ok(DbIterator::new(
            Box::new(merged),
            Arc::clone(&inner.config.comparator),
            sequence,
            version,
        ))
    }

    // =========================================================================
    // Snapshots
    // =========================================================================

    /// Capture the current state. Reads through the handle never see later
    /// writes.
    pub fn get_snapshot(&self) -> Snapshot {
        let inner = &self.inner;
        let _state = inner.state.lock();
        inner
            .snapshots
            .acquire(inner.versions.last_sequence(), inner.versions.current())
    }

    pub fn release_snapshot(&self, snapshot: Snapshot) {
        drop(snapshot);
    }

    // =========================================================================
    // Sizes and maintenance
    // =========================================================================

    /// Approximate on-disk bytes per range. Data still in memtables is not
    /// counted.
    pub fn get_approximate_sizes(&self, ranges: &[Range]) -> Result<Vec<u64>> {
        let inner = &self.inner;
        let version = inner.versions.current();
        ranges
            .iter()
            .map(|range| {
                if inner.config.comparator.compare(&range.start, &range.limit) == Ordering::Greater {
                    return Err(StrataError::InvalidArgument(
                        "range start sorts after its limit".to_string(),
                    ));
                }
                let start = version
                    .approximate_offset_of(&inner.table_cache, &seek_key(&range.start, MAX_SEQUENCE_NUMBER))?;
                let limit = version
                    .approximate_offset_of(&inner.table_cache, &seek_key(&range.limit, MAX_SEQUENCE_NUMBER))?;
                Ok(limit.saturating_sub(start))
            })
            .collect()
    }

    /// Freeze the memtable (if it holds anything) and wait until it is
    /// written to level 0
    pub fn flush(&self) -> Result<()> {
        let inner = &self.inner;
        {
            let mut wal = inner.writer.lock();
            inner.make_room_for_write(&mut wal, true)?;
        }
        inner.wait_for_flush()
    }

    /// Compact every level overlapping the user-key range `[begin, end]`
    /// (`None` = unbounded) into the level below it
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.flush()?;

        let version = self.inner.versions.current();
        let max_level_with_files = (1..version.num_levels())
            .filter(|&level| version.overlap_in_level(level, begin, end))
            .max()
            .unwrap_or(1);
        drop(version);

        for level in 0..max_level_with_files {
            let (reply, done) = channel::bounded(1);
            self.inner
                .tasks
                .send(Task::Manual {
                    level,
                    begin: begin.map(<[u8]>::to_vec),
                    end: end.map(<[u8]>::to_vec),
                    reply,
                })
                .map_err(|_| StrataError::ShuttingDown)?;
            done.recv().map_err(|_| StrataError::ShuttingDown)??;
        }
        Ok(())
    }

    /// Stop the worker and sync the log
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let inner = &self.inner;
        inner.shutting_down.store(true, AtomicOrdering::SeqCst);
        {
            let _state = inner.state.lock();
            inner.bg_cv.notify_all();
        }
        let _ = inner.tasks.send(Task::Shutdown);
        if worker.join().is_err() {
            tracing::error!("Compaction worker panicked");
        }

        inner.writer.lock().sync()?;
        tracing::info!(dir = %inner.dir.display(), "Closed database");
        Ok(())
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn data_dir(&self) -> &Path {
        &self.inner.dir
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn num_files_at_level(&self, level: usize) -> usize {
        self.inner.versions.num_level_files(level)
    }

    /// e.g. "files[ 2 3 0 0 0 0 0 ]"
    pub fn level_summary(&self) -> String {
        self.inner.versions.level_summary()
    }

    /// Metadata of the tables at `level` in the current Version, in level
    /// order
    pub fn level_files(&self, level: usize) -> Vec<FileMetaData> {
        let version = self.inner.versions.current();
        if level >= version.num_levels() {
            return Vec::new();
        }
        version.files(level).iter().map(|f| (**f).clone()).collect()
    }

    /// Number of tables in the current Version
    pub fn sstable_count(&self) -> usize {
        let version = self.inner.versions.current();
        (0..version.num_levels()).map(|level| version.num_files(level)).sum()
    }

    /// Approximate bytes in the mutable memtable
    pub fn memtable_size(&self) -> usize {
        self.inner.state.lock().mem.size()
    }

    pub fn memtable_entry_count(&self) -> usize {
        self.inner.state.lock().mem.entry_count()
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.inner.versions.last_sequence()
    }

    pub fn snapshot_count(&self) -> usize {
        self.inner.snapshots.len()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::warn!(error = %e, "Error while closing database");
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("dir", &self.inner.dir)
            .field("last_sequence", &self.inner.versions.last_sequence())
            .field("levels", &self.inner.versions.level_summary())
            .finish()
    }
}

// =============================================================================
// Engine internals
// =============================================================================

impl EngineInner {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(AtomicOrdering::Acquire)
    }

    /// Ensure the memtable has room for a write, freezing it when full.
    /// With `force`, freeze a non-empty memtable regardless of size.
    fn make_room_for_write(&self, wal: &mut WalWriter, mut force: bool) -> Result<()> {
        let mut allow_delay = !force;
        let mut state = self.state.lock();
        loop {
            if let Some(e) = &state.bg_error {
                return Err(StrataError::Poisoned(e.to_string()));
            }
            if self.is_shutting_down() {
                return Err(StrataError::ShuttingDown);
            }

            let level0 = self.versions.num_level_files(0);
            if allow_delay && level0 >= self.config.level0_slowdown_writes_trigger {
                // Hand the worker some CPU instead of stalling one write
                // for seconds later
                MutexGuard::unlocked(&mut state, || thread::sleep(Duration::from_millis(1)));
                allow_delay = false;
            } else if !force && !state.mem.should_flush(self.config.memtable_size_limit) {
                return Ok(());
            } else if state.imm.is_some() {
                tracing::debug!("Memtable full, waiting for flush");
                self.bg_cv.wait(&mut state);
            } else if level0 >= self.config.level0_stop_writes_trigger {
                tracing::info!(level0, "Too many level-0 files, stalling writes");
                self.bg_cv.wait(&mut state);
            } else if force && state.mem.is_empty() {
                return Ok(());
            } else {
                let number = self.versions.new_file_number();
                *wal = WalWriter::create(&log_file_path(&self.dir, number), self.config.wal_sync_strategy)?;
                state.log_number = number;

                let fresh = Arc::new(MemTable::new(Arc::clone(&self.icmp)));
                let full = std::mem::replace(&mut state.mem, fresh);
                tracing::debug!(entries = full.entry_count(), bytes = full.size(), log = number, "Froze memtable");
                state.imm = Some(full);
                self.has_imm.store(true, AtomicOrdering::Release);
                force = false;
                self.maybe_schedule_compaction(&mut state);
            }
        }
    }

    fn wait_for_flush(&self) -> Result<()> {
        let mut state = self.state.lock();
        while state.imm.is_some() && state.bg_error.is_none() && !self.is_shutting_down() {
            self.bg_cv.wait(&mut state);
        }
        match &state.bg_error {
            Some(e) => Err(StrataError::Poisoned(e.to_string())),
            None if state.imm.is_some() => Err(StrataError::ShuttingDown),
            None => Ok(()),
        }
    }

    fn maybe_schedule_compaction(&self, state: &mut EngineState) {
        if state.worker == WorkerState::Compacting || self.is_shutting_down() || state.bg_error.is_some() {
            return;
        }
        if state.imm.is_none() && !self.versions.needs_compaction() {
            return;
        }
        state.worker = WorkerState::Compacting;
        if self.tasks.send(Task::Schedule).is_err() {
            state.worker = WorkerState::Idle;
        }
    }

    fn record_background_error(&self, e: StrataError) {
        if matches!(e, StrataError::ShuttingDown) {
            return;
        }
        let mut state = self.state.lock();
        if state.bg_error.is_none() {
            tracing::error!(error = %e, "Background error, database is now read-only");
            state.bg_error = Some(e);
        }
        self.bg_cv.notify_all();
    }

    fn smallest_snapshot(&self) -> SequenceNumber {
        self.snapshots
            .oldest()
            .unwrap_or_else(|| self.versions.last_sequence())
    }

    /// Flush the frozen memtable to a level-0 table and retire its log
    fn compact_memtable(&self) -> Result<()> {
        let (imm, log_number) = {
            let state = self.state.lock();
            match &state.imm {
                Some(imm) => (Arc::clone(imm), state.log_number),
                None => return Ok(()),
            }
        };

        let start = Instant::now();
        let mut edit = VersionEdit::new();
        let number = self.new_output_number();
        if let Some(meta) = build_table(&self.dir, &self.config, &self.icmp, number, &mut imm.iter())? {
            tracing::info!(
                file = number,
                entries = imm.entry_count(),
                bytes = meta.file_size,
                micros = start.elapsed().as_micros() as u64,
                "Flushed memtable to level 0"
            );
            edit.add_file(0, meta);
        }
        if self.is_shutting_down() {
            return Err(StrataError::ShuttingDown);
        }

        // Every log older than the active one is now covered by tables
        edit.set_prev_log_number(0);
        edit.set_log_number(log_number);
        self.versions.log_and_apply(&mut edit)?;

        {
            let mut state = self.state.lock();
            state.imm = None;
            self.has_imm.store(false, AtomicOrdering::Release);
        }
        self.delete_obsolete_files();
        self.bg_cv.notify_all();
        Ok(())
    }

    /// One scheduled round: a pending flush first, else a size compaction
    fn background_compaction(&self) -> Result<()> {
        if self.has_imm.load(AtomicOrdering::Acquire) {
            return self.compact_memtable();
        }

        let Some(mut c) = self.versions.pick_compaction() else {
            return Ok(());
        };
        if c.is_trivial_move() {
            let file = Arc::clone(&c.inputs[0][0]);
            c.edit.delete_file(c.level, file.number);
            c.edit.add_file(c.level + 1, (*file).clone());
            self.versions.log_and_apply(&mut c.edit)?;
            tracing::info!(
                file = file.number,
                from = c.level,
                to = c.level + 1,
                bytes = file.file_size,
                summary = %self.versions.level_summary(),
                "Moved table"
            );
        } else {
            run_compaction(self, &self.versions, &self.config, &self.dir, c, self.smallest_snapshot())?;
        }
        self.delete_obsolete_files();
        Ok(())
    }

    /// Remove logs, manifests and tables nothing refers to any more
    fn delete_obsolete_files(&self) {
        let mut live = self.versions.live_files();
        {
            let state = self.state.lock();
            if state.bg_error.is_some() {
                // Unknown whether the last manifest write landed
                return;
            }
            live.extend(state.pending_outputs.iter().copied());
        }
        let log_number = self.versions.log_number();
        let prev_log_number = self.versions.prev_log_number();
        let manifest_number = self.versions.manifest_file_number();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = %self.dir.display(), error = %e, "Failed to list database directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((number, file_type)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            let keep = match file_type {
                FileType::Log => number >= log_number || number == prev_log_number,
                FileType::Manifest => number >= manifest_number,
                FileType::Table | FileType::Temp => live.contains(&number),
                FileType::Current | FileType::Lock => true,
            };
            if keep {
                continue;
            }
            if file_type == FileType::Table {
                self.table_cache.evict(number);
            }
            tracing::debug!(file = ?name, kind = ?file_type, "Deleting obsolete file");
            if let Err(e) = fs::remove_file(entry.path()) {
                tracing::warn!(file = ?name, error = %e, "Failed to delete obsolete file");
            }
        }
    }
}

impl CompactionHost for EngineInner {
    fn new_output_number(&self) -> u64 {
        let number = self.versions.new_file_number();
        self.state.lock().pending_outputs.insert(number);
        number
    }

    fn is_shutting_down(&self) -> bool {
        EngineInner::is_shutting_down(self)
    }

    fn service_imm(&self) -> Result<()> {
        if self.has_imm.load(AtomicOrdering::Acquire) {
            self.compact_memtable()?;
        }
        Ok(())
    }
}

impl BackgroundWork for EngineInner {
    fn run_scheduled(&self) {
        let poisoned = self.state.lock().bg_error.is_some();
        if !poisoned && !self.is_shutting_down() {
            if let Err(e) = self.background_compaction() {
                tracing::error!(task = "background_compaction", error = %e, "Task execution failed");
                self.record_background_error(e);
            }
        }

        let mut state = self.state.lock();
        state.pending_outputs.clear();
        state.worker = WorkerState::Idle;
        // The round may have produced more work (e.g. too many level-0 files)
        self.maybe_schedule_compaction(&mut state);
        self.bg_cv.notify_all();
    }

    fn run_manual(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        loop {
            if let Some(e) = &self.state.lock().bg_error {
                return Err(StrataError::Poisoned(e.to_string()));
            }
            if self.is_shutting_down() {
                return Err(StrataError::ShuttingDown);
            }
            self.service_imm()?;

            let Some(c) = self.versions.compact_range(level, begin, end) else {
                return Ok(());
            };
            let result = run_compaction(self, &self.versions, &self.config, &self.dir, c, self.smallest_snapshot());
            self.state.lock().pending_outputs.clear();
            if let Err(e) = result {
                self.record_background_error(e.clone());
                return Err(e);
            }
            self.delete_obsolete_files();
        }
    }
}

// =============================================================================
// Open helpers
// =============================================================================

fn acquire_lock(dir: &Path) -> Result<File> {
    let path = lock_file_path(dir);
    let file = OpenOptions::new().create(true).write(true).open(&path)?;
    file.try_lock_exclusive().map_err(|e| {
        StrataError::Io(std::io::Error::new(
            e.kind(),
            format!("lock {}: already held by another process or handle ({})", path.display(), e),
        ))
    })?;
    Ok(file)
}

fn insert_operations(mem: &MemTable, first: SequenceNumber, operations: &[Operation]) {
    for (sequence, op) in (first..).zip(operations) {
        match op {
            Operation::Put { key, value } => mem.put(sequence, key, value),
            Operation::Delete { key } => mem.delete(sequence, key),
        }
    }
}

/// Replay every log the manifest does not cover into level-0 tables,
/// recorded in `edit`, and advance the last sequence past them
fn replay_logs(
    dir: &Path,
    config: &Config,
    icmp: &Arc<InternalKeyComparator>,
    versions: &VersionSet,
    edit: &mut VersionEdit,
) -> Result<()> {
    let min_log = versions.log_number();
    let prev_log = versions.prev_log_number();
    let mut logs: Vec<u64> = fs::read_dir(dir)?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().and_then(parse_file_name))
        .filter(|&(number, file_type)| {
            file_type == FileType::Log && (number >= min_log || number == prev_log)
        })
        .map(|(number, _)| number)
        .collect();
    logs.sort_unstable();

    let mut max_sequence = versions.last_sequence();
    for number in logs {
        versions.mark_file_number_used(number);
        let path = log_file_path(dir, number);
        let (entries, result) = WalRecovery::recover(&path, config.paranoid_checks)?;

        let mut mem = Arc::new(MemTable::new(Arc::clone(icmp)));
        let mut tables = 0usize;
        for entry in &entries {
            insert_operations(&mem, entry.sequence, &entry.operations);
            max_sequence = max_sequence.max(entry.last_sequence());
            if mem.should_flush(config.memtable_size_limit) {
                flush_recovered(dir, config, icmp, versions, &mem, edit)?;
                tables += 1;
                mem = Arc::new(MemTable::new(Arc::clone(icmp)));
            }
        }
        if !mem.is_empty() {
            flush_recovered(dir, config, icmp, versions, &mem, edit)?;
            tables += 1;
        }

        tracing::info!(
            log = number,
            entries = result.entries_recovered,
            truncated = result.was_truncated,
            tables,
            "Replayed write-ahead log"
        );
    }

    versions.set_last_sequence(max_sequence);
    Ok(())
}

fn flush_recovered(
    dir: &Path,
    config: &Config,
    icmp: &Arc<InternalKeyComparator>,
    versions: &VersionSet,
    mem: &Arc<MemTable>,
    edit: &mut VersionEdit,
) -> Result<()> {
    let number = versions.new_file_number();
    if let Some(meta) = build_table(dir, config, icmp, number, &mut mem.iter())? {
        edit.add_file(0, meta);
    }
    Ok(())
}
