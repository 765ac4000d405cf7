//! MemTable implementation
//!
//! Skip-list memtable ordered by the internal key comparator.

use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::keys::{
    make_internal_key, parse_internal_key, seek_key, Comparator, InternalKeyComparator,
    SequenceNumber, ValueType,
};

use super::{MemTableEntry, MemTableIterator};

/// Per-entry bookkeeping overhead (skip list node, tag, refcounts)
const ENTRY_OVERHEAD: usize = 48;

/// Skip-list key: an encoded internal key that orders itself with the
/// database's comparator.
#[derive(Clone)]
pub(crate) struct MemKey {
    pub(crate) ikey: Bytes,
    icmp: Arc<InternalKeyComparator>,
}

impl MemKey {
    pub(crate) fn new(ikey: Bytes, icmp: Arc<InternalKeyComparator>) -> Self {
        Self { ikey, icmp }
    }
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.icmp.compare(&self.ikey, &other.ikey)
    }
}

/// In-memory table for recent writes
pub struct MemTable {
    pub(crate) map: SkipMap<MemKey, Bytes>,
    icmp: Arc<InternalKeyComparator>,
    /// Approximate memory footprint in bytes
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new(icmp: Arc<InternalKeyComparator>) -> Self {
        Self {
            map: SkipMap::new(),
            icmp,
            size: AtomicUsize::new(0),
        }
    }

    /// Insert one internal entry.
    ///
    /// Only the writer path calls this; sequence numbers are unique so every
    /// call adds a new skip-list node.
    pub fn add(&self, sequence: SequenceNumber, value_type: ValueType, key: &[u8], value: &[u8]) {
        let ikey = Bytes::from(make_internal_key(key, sequence, value_type));
        let entry_size = ikey.len() + value.len() + ENTRY_OVERHEAD;
        self.map
            .insert(self.mem_key(ikey), Bytes::copy_from_slice(value));
        self.size.fetch_add(entry_size, AtomicOrdering::Relaxed);
    }

    /// Convenience: insert a live value
    pub fn put(&self, sequence: SequenceNumber, key: &[u8], value: &[u8]) {
        self.add(sequence, ValueType::Value, key, value);
    }

    /// Convenience: insert a tombstone
    pub fn delete(&self, sequence: SequenceNumber, key: &[u8]) {
        self.add(sequence, ValueType::Deletion, key, b"");
    }

    /// Newest version of `key` with sequence <= `sequence`.
    ///
    /// `None` means this table knows nothing about the key at that point in
    /// time; older tables must be consulted.
    pub fn get(&self, key: &[u8], sequence: SequenceNumber) -> Option<MemTableEntry> {
        let target = self.mem_key(Bytes::from(seek_key(key, sequence)));
        let entry = self.map.lower_bound(Bound::Included(&target))?;
        let parsed = parse_internal_key(&entry.key().ikey)?;

        if self.icmp.compare_user(parsed.user_key, key) != Ordering::Equal {
            return None;
        }
        match parsed.value_type {
            ValueType::Value => Some(MemTableEntry::Value(entry.value().to_vec())),
            ValueType::Deletion => Some(MemTableEntry::Tombstone),
        }
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(AtomicOrdering::Relaxed)
    }

    /// Get entry count (every version and tombstone counts)
    pub fn entry_count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Check if should flush (size > limit)
    pub fn should_flush(&self, size_limit: usize) -> bool {
        self.size() > size_limit
    }

    /// Cursor over all entries in internal key order.
    /// The cursor keeps this table alive.
    pub fn iter(self: &Arc<Self>) -> MemTableIterator {
        MemTableIterator::new(Arc::clone(self))
    }

    pub(crate) fn mem_key(&self, ikey: Bytes) -> MemKey {
        MemKey::new(ikey, Arc::clone(&self.icmp))
    }
}
