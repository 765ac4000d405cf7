//! Table Cache
//!
//! Bounded set of open SSTable readers keyed by file number.
//!
//! ## Responsibilities
//! - Open readers lazily (index and filter blocks are loaded once per open)
//! - Keep at most `capacity` readers open, evicting the least recently used
//! - Drop a reader when its file is deleted
//!
//! Readers are handed out as `Arc`s, so an evicted reader stays usable by
//! iterators that already hold it.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::Result;
use crate::filter::FilterPolicy;
use crate::keys::InternalKeyComparator;

use super::filename::table_file_path;
use super::{SSTableIterator, SSTableReader};

/// File descriptors kept back for logs, the manifest, and the lock file
const RESERVED_FILES: usize = 10;
const MIN_CAPACITY: usize = 16;

struct CacheState {
    /// File number -> (reader, tick of its last use)
    readers: HashMap<u64, (Arc<SSTableReader>, u64)>,
    /// Tick of last use -> file number; the first entry is the LRU victim
    recency: BTreeMap<u64, u64>,
    next_tick: u64,
}

impl CacheState {
    /// Cached reader for `number`, marked as most recently used
    fn lookup(&mut self, number: u64) -> Option<Arc<SSTableReader>> {
        let tick = self.next_tick;
        let (reader, last_used) = self.readers.get_mut(&number)?;
        self.recency.remove(&*last_used);
        *last_used = tick;
        let reader = Arc::clone(reader);
        self.recency.insert(tick, number);
        self.next_tick += 1;
        Some(reader)
    }

    fn insert(&mut self, number: u64, reader: Arc<SSTableReader>) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some((_, old)) = self.readers.insert(number, (reader, tick)) {
            self.recency.remove(&old);
        }
        self.recency.insert(tick, number);
    }

    fn remove(&mut self, number: u64) -> bool {
        match self.readers.remove(&number) {
            Some((_, tick)) => {
                self.recency.remove(&tick);
                true
            }
            None => false,
        }
    }

    fn evict_to(&mut self, capacity: usize) {
        while self.readers.len() > capacity {
            let Some((_, victim)) = self.recency.pop_first() else {
                break;
            };
            self.readers.remove(&victim);
        }
    }
}

/// Open-reader cache shared by reads, iterators, and compaction
pub struct TableCache {
    data_dir: PathBuf,
    icmp: Arc<InternalKeyComparator>,
    filter_policy: Option<Arc<dyn FilterPolicy>>,
    paranoid: bool,
    capacity: usize,
    state: Mutex<CacheState>,
}

impl TableCache {
    pub fn new(data_dir: &Path, config: &Config, icmp: Arc<InternalKeyComparator>) -> Self {
        let capacity = config
            .max_open_files
            .saturating_sub(RESERVED_FILES)
            .max(MIN_CAPACITY);
        Self {
            data_dir: data_dir.to_path_buf(),
            icmp,
            filter_policy: config.filter_policy.clone(),
            paranoid: config.paranoid_checks,
            capacity,
            state: Mutex::new(CacheState {
                readers: HashMap::new(),
                recency: BTreeMap::new(),
                next_tick: 0,
            }),
        }
    }

    /// Reader for table `number`, opening it if needed
    pub fn find_table(&self, number: u64, file_size: u64) -> Result<Arc<SSTableReader>> {
        if let Some(reader) = self.state.lock().lookup(number) {
            return Ok(reader);
        }

        // Open outside the lock; a racing opener of the same file is harmless
        let path = table_file_path(&self.data_dir, number);
        let reader = Arc::new(SSTableReader::open(
            &path,
            file_size,
            Arc::clone(&self.icmp),
            self.filter_policy.clone(),
            self.paranoid,
        )?);
        tracing::debug!(file = number, size = file_size, "Opened SSTable");

        let mut state = self.state.lock();
        let reader = match state.lookup(number) {
            Some(existing) => existing,
            None => {
                state.insert(number, Arc::clone(&reader));
                reader
            }
        };
        state.evict_to(self.capacity);
        Ok(reader)
    }

    /// Point lookup in one table (see `SSTableReader::get`)
    pub fn get(&self, number: u64, file_size: u64, ikey: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        self.find_table(number, file_size)?.get(ikey)
    }

    pub fn new_iterator(&self, number: u64, file_size: u64, verify_checksums: bool) -> Result<SSTableIterator> {
        Ok(self.find_table(number, file_size)?.iter(verify_checksums))
    }

    pub fn approximate_offset_of(&self, number: u64, file_size: u64, ikey: &[u8]) -> Result<u64> {
        Ok(self.find_table(number, file_size)?.approximate_offset_of(ikey))
    }

    /// Forget table `number` (its file is about to be deleted)
    pub fn evict(&self, number: u64) {
        if self.state.lock().remove(number) {
            tracing::trace!(file = number, "Evicted SSTable reader");
        }
    }

    /// Number of readers currently open
    pub fn len(&self) -> usize {
        self.state.lock().readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
