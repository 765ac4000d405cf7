//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern without reader locks
//! - Track size for flush triggers
//! - Ordered, bidirectional iteration for flushes and scans
//!
//! ## Data Structure Choice
//! A lock-free skip list (`crossbeam_skiplist::SkipMap`) keyed by internal
//! key. Entries are only ever appended: an overwrite or delete is a new entry
//! with a higher sequence number. When the table is full it is frozen (shared
//! read-only behind an `Arc`) and replaced by a fresh one; its memory is freed
//! when the last reader drops the `Arc`.

mod iterator;
mod table;

pub use iterator::MemTableIterator;
pub use table::MemTable;

/// Result of a point lookup in a MemTable
#[derive(Debug, Clone, PartialEq)]
pub enum MemTableEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}
