//! Configuration for StrataKV
//!
//! Centralized configuration with sensible defaults, plus per-call
//! `ReadOptions` / `WriteOptions`.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::filter::FilterPolicy;
use crate::keys::{BytewiseComparator, Comparator};
use crate::snapshot::Snapshot;

/// Main configuration for a StrataKV instance
#[derive(Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── LOCK
    ///     ├── CURRENT              (name of the live manifest)
    ///     ├── MANIFEST-000001      (version edits)
    ///     ├── wal_000003.log       (write-ahead log)
    ///     └── sstable_000004.sst   (sorted tables)
    pub data_dir: PathBuf,

    /// Create the database if it does not exist
    pub create_if_missing: bool,

    /// Fail to open if the database already exists
    pub error_if_exists: bool,

    /// Treat any detected corruption (including a torn log tail) as fatal
    pub paranoid_checks: bool,

    // -------------------------------------------------------------------------
    // Extension Points
    // -------------------------------------------------------------------------
    /// Key order; its name is persisted and checked on open
    pub comparator: Arc<dyn Comparator>,

    /// Optional per-block membership filter
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // SSTable Configuration
    // -------------------------------------------------------------------------
    /// Approximate uncompressed size of a data block (in bytes)
    pub block_size: usize,

    /// Max table files kept open by the table cache
    pub max_open_files: usize,

    /// Compaction output files are cut at this size (in bytes)
    pub max_file_size: u64,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Number of levels, including level 0
    pub max_levels: usize,

    /// Level-0 file count that triggers compaction
    pub level0_compaction_trigger: usize,

    /// Level-0 file count at which each write is delayed
    pub level0_slowdown_writes_trigger: usize,

    /// Level-0 file count at which writes stop until compaction catches up
    pub level0_stop_writes_trigger: usize,

    /// Target size of level 1 (in bytes)
    pub max_bytes_for_level_base: u64,

    /// Each level's target is this many times the previous one
    pub level_size_multiplier: u64,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync only when `WriteOptions::sync` is set
    OnRequest,

    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N unsynced writes (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./stratakv_data"),
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            wal_sync_strategy: WalSyncStrategy::OnRequest,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            block_size: 4 * 1024,
            max_open_files: 1000,
            max_file_size: 2 * 1024 * 1024,
            max_levels: 7,
            level0_compaction_trigger: 4,
            level0_slowdown_writes_trigger: 8,
            level0_stop_writes_trigger: 12,
            max_bytes_for_level_base: 10 * 1024 * 1024,
            level_size_multiplier: 10,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("data_dir", &self.data_dir)
            .field("create_if_missing", &self.create_if_missing)
            .field("error_if_exists", &self.error_if_exists)
            .field("paranoid_checks", &self.paranoid_checks)
            .field("comparator", &self.comparator.name())
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name()))
            .field("wal_sync_strategy", &self.wal_sync_strategy)
            .field("memtable_size_limit", &self.memtable_size_limit)
            .field("block_size", &self.block_size)
            .field("max_open_files", &self.max_open_files)
            .field("max_file_size", &self.max_file_size)
            .field("max_levels", &self.max_levels)
            .field("level0_compaction_trigger", &self.level0_compaction_trigger)
            .field("level0_slowdown_writes_trigger", &self.level0_slowdown_writes_trigger)
            .field("level0_stop_writes_trigger", &self.level0_stop_writes_trigger)
            .field("max_bytes_for_level_base", &self.max_bytes_for_level_base)
            .field("level_size_multiplier", &self.level_size_multiplier)
            .finish()
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Byte budget for `level` (level 0 is governed by file count instead)
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut result = self.max_bytes_for_level_base;
        for _ in 1..level {
            result = result.saturating_mul(self.level_size_multiplier);
        }
        result
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            return Err(StrataError::InvalidArgument("block_size must be > 0".into()));
        }
        if self.memtable_size_limit == 0 {
            return Err(StrataError::InvalidArgument(
                "memtable_size_limit must be > 0".into(),
            ));
        }
        if self.max_levels < 2 {
            return Err(StrataError::InvalidArgument("max_levels must be >= 2".into()));
        }
        if self.level0_compaction_trigger == 0
            || self.level0_slowdown_writes_trigger < self.level0_compaction_trigger
            || self.level0_stop_writes_trigger < self.level0_slowdown_writes_trigger
        {
            return Err(StrataError::InvalidArgument(
                "level-0 triggers must satisfy 0 < compaction <= slowdown <= stop".into(),
            ));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(StrataError::InvalidArgument(
                "EveryNEntries count must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    pub fn create_if_missing(mut self, yes: bool) -> Self {
        self.config.create_if_missing = yes;
        self
    }

    pub fn error_if_exists(mut self, yes: bool) -> Self {
        self.config.error_if_exists = yes;
        self
    }

    pub fn paranoid_checks(mut self, yes: bool) -> Self {
        self.config.paranoid_checks = yes;
        self
    }

    /// Set the key order
    pub fn comparator(mut self, comparator: Arc<dyn Comparator>) -> Self {
        self.config.comparator = comparator;
        self
    }

    /// Set the per-block membership filter
    pub fn filter_policy(mut self, policy: Arc<dyn FilterPolicy>) -> Self {
        self.config.filter_policy = Some(policy);
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    pub fn block_size(mut self, size: usize) -> Self {
        self.config.block_size = size;
        self
    }

    pub fn max_open_files(mut self, count: usize) -> Self {
        self.config.max_open_files = count;
        self
    }

    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    pub fn max_levels(mut self, levels: usize) -> Self {
        self.config.max_levels = levels;
        self
    }

    pub fn level0_compaction_trigger(mut self, count: usize) -> Self {
        self.config.level0_compaction_trigger = count;
        self
    }

    pub fn level0_slowdown_writes_trigger(mut self, count: usize) -> Self {
        self.config.level0_slowdown_writes_trigger = count;
        self
    }

    pub fn level0_stop_writes_trigger(mut self, count: usize) -> Self {
        self.config.level0_stop_writes_trigger = count;
        self
    }

    pub fn max_bytes_for_level_base(mut self, size: u64) -> Self {
        self.config.max_bytes_for_level_base = size;
        self
    }

    pub fn level_size_multiplier(mut self, multiplier: u64) -> Self {
        self.config.level_size_multiplier = multiplier;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

/// Options for a single read
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions<'a> {
    /// Read as of this snapshot instead of the latest state
    pub snapshot: Option<&'a Snapshot>,

    /// Verify block checksums on every read
    pub verify_checksums: bool,
}

impl<'a> ReadOptions<'a> {
    pub fn with_snapshot(snapshot: &'a Snapshot) -> Self {
        Self {
            snapshot: Some(snapshot),
            verify_checksums: false,
        }
    }
}

/// Options for a single write
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    /// fsync the log before acknowledging the write
    pub sync: bool,
}

impl WriteOptions {
    pub fn sync() -> Self {
        Self { sync: true }
    }
}
