//! Iterator Module
//!
//! Cursor-style, bidirectional iteration over internal entries.
//!
//! ## Layers
//! ```text
//!   DbIterator          user keys, snapshot ceiling, tombstones hidden
//!        │
//!   MergingIterator     k-way merge by internal key order
//!        │
//!   ┌────┴─────────┬──────────────────┬─────────────────┐
//!   MemTable(s)    Level-0 tables     Level iterators (one per level ≥ 1)
//! ```
//!
//! Sources are cursors rather than `std::iter::Iterator`s because the merge
//! needs `seek`, `prev`, and borrowed access to the current key/value.

mod db_iter;
mod merge;

pub use db_iter::DbIterator;
pub use merge::MergingIterator;

use crate::error::Result;

/// Cursor over a sorted sequence of (internal key, value) pairs.
///
/// `key()` and `value()` may only be called while `valid()` is true.
/// An I/O or corruption error makes the cursor invalid and is reported by
/// `status()`.
pub trait InternalIterator: Send {
    fn valid(&self) -> bool;

    /// Position at the first entry
    fn seek_to_first(&mut self);

    /// Position at the last entry
    fn seek_to_last(&mut self);

    /// Position at the first entry with key >= `target`
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    fn prev(&mut self);

    fn key(&self) -> &[u8];

    fn value(&self) -> &[u8];

    fn status(&self) -> Result<()>;
}
