//! MemTable cursor
//!
//! The skip list hands out entries that borrow the map, so the cursor keeps
//! its own copy of the current (key, value) handles and re-enters the list
//! from there on every step. `Bytes` clones are reference-count bumps.

use std::ops::Bound;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::iterator::InternalIterator;

use super::table::MemKey;
use super::MemTable;

/// Bidirectional cursor over a MemTable
pub struct MemTableIterator {
    table: Arc<MemTable>,
    current: Option<(MemKey, Bytes)>,
}

impl MemTableIterator {
    pub(super) fn new(table: Arc<MemTable>) -> Self {
        Self {
            table,
            current: None,
        }
    }

    fn set_current<'a>(&mut self, entry: Option<crossbeam_skiplist::map::Entry<'a, MemKey, Bytes>>) {
        self.current = entry.map(|e| (e.key().clone(), e.value().clone()));
    }
}

impl InternalIterator for MemTableIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        let table = Arc::clone(&self.table);
        self.set_current(table.map.front());
    }

    fn seek_to_last(&mut self) {
        let table = Arc::clone(&self.table);
        self.set_current(table.map.back());
    }

    fn seek(&mut self, target: &[u8]) {
        let table = Arc::clone(&self.table);
        let target = table.mem_key(Bytes::copy_from_slice(target));
        self.set_current(table.map.lower_bound(Bound::Included(&target)));
    }

    fn next(&mut self) {
        let table = Arc::clone(&self.table);
        if let Some((key, _)) = self.current.take() {
            self.set_current(table.map.lower_bound(Bound::Excluded(&key)));
        }
    }

    fn prev(&mut self) {
        let table = Arc::clone(&self.table);
        if let Some((key, _)) = self.current.take() {
            self.set_current(table.map.upper_bound(Bound::Excluded(&key)));
        }
    }

    fn key(&self) -> &[u8] {
        match &self.current {
            Some((key, _)) => &key.ikey,
            None => panic!("key() on invalid MemTableIterator"),
        }
    }

    fn value(&self) -> &[u8] {
        match &self.current {
            Some((_, value)) => value,
            None => panic!("value() on invalid MemTableIterator"),
        }
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }
}
