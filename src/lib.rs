//! # StrataKV
//!
//! An embedded, ordered key-value store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with torn-tail truncation
//! - Atomic write batches and point-in-time snapshots
//! - Pluggable key ordering and membership filters
//! - Leveled compaction on a background worker
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Engine                              │
//! │            (Single Writer / Multi Reader)                   │
//! └──────┬──────────────────────┬───────────────────────┬───────┘
//!        │ write                │ read                  │ signal
//!        ▼                      ▼                       ▼
//!  ┌───────────┐    ┌───────────────────────┐   ┌──────────────┐
//!  │    WAL    │    │ MemTable (+ frozen)   │   │  Compaction  │
//!  │ (Append)  │    │  (lock-free skiplist) │   │   Worker     │
//!  └───────────┘    └───────────┬───────────┘   └──────┬───────┘
//!                               │ flush                 │ merge
//!                               ▼                       ▼
//!                   ┌────────────────────────────────────────────┐
//!                   │  Version: SSTables in levels 0..N          │
//!                   │  (recorded in the MANIFEST)                │
//!                   └────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use stratakv::{Config, Engine, WriteBatch};
//!
//! let engine = Engine::open(Config::builder().data_dir("/tmp/strata").build())?;
//! engine.put(b"name", b"strata")?;
//!
//! let mut batch = WriteBatch::new();
//! batch.put(b"a", b"1").delete(b"name");
//! engine.write(batch)?;
//!
//! assert_eq!(engine.get(b"a")?, Some(b"1".to_vec()));
//! # Ok::<(), stratakv::StrataError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod keys;
pub mod filter;
pub mod batch;
pub mod wal;
pub mod memtable;
pub mod storage;
pub mod iterator;
pub mod version;
pub mod snapshot;
pub mod compaction;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StrataError};
pub use config::{Config, ConfigBuilder, ReadOptions, WalSyncStrategy, WriteOptions};
pub use keys::{BytewiseComparator, Comparator};
pub use filter::{BloomFilterPolicy, FilterPolicy};
pub use batch::WriteBatch;
pub use iterator::DbIterator;
pub use snapshot::Snapshot;
pub use engine::{Engine, Range};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of StrataKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
