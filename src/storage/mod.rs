//! Storage Module
//!
//! Persistent storage layer: immutable sorted table files and the plumbing
//! around them.
//!
//! ## Responsibilities
//! - Persist sorted internal entries to disk in block format (`sstable`)
//! - Point lookups through the index block and per-block filters
//! - Bidirectional iteration for reads and compaction
//! - Bounded cache of open table readers (`table_cache`)
//! - Naming of every file in the database directory (`filename`)

pub mod filename;
mod sstable;
mod table_cache;

pub use sstable::{BlockHandle, Footer, SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
pub use table_cache::TableCache;
