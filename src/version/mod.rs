//! Version Module
//!
//! The level layout of the on-disk tables.
//!
//! ## Responsibilities
//! - `Version`: an immutable snapshot of which table files live at which
//!   level, shared behind `Arc` by readers, iterators, and snapshots
//! - `VersionEdit`: a delta between two Versions, logged to the manifest
//! - `VersionSet`: the current Version, the manifest, the engine counters,
//!   and compaction picking
//!
//! ## Level Invariants
//! Level-0 files may overlap each other (each is one flushed memtable).
//! Files in every deeper level are sorted by key and never overlap.

mod edit;
mod level_iter;
mod set;

use std::cmp::Ordering;
use std::sync::Arc;

pub use edit::{FileMetaData, VersionEdit};
pub use level_iter::LevelIterator;
pub use set::VersionSet;

use crate::config::Config;
use crate::error::Result;
use crate::iterator::InternalIterator;
use crate::keys::{extract_user_key, parse_internal_key, Comparator, InternalKeyComparator, ValueType};
use crate::memtable::MemTableEntry;
use crate::storage::TableCache;

/// Immutable set of table files per level
pub struct Version {
    icmp: Arc<InternalKeyComparator>,
    /// Level 0 ordered by file number (oldest first); deeper levels by smallest key
    files: Vec<Vec<Arc<FileMetaData>>>,
    compaction_score: f64,
    compaction_level: usize,
}

impl Version {
    pub fn new(icmp: Arc<InternalKeyComparator>, num_levels: usize) -> Self {
        Self {
            icmp,
            files: vec![Vec::new(); num_levels],
            compaction_score: 0.0,
            compaction_level: 0,
        }
    }

    pub fn num_levels(&self) -> usize {
        self.files.len()
    }

    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        &self.files[level]
    }

    pub fn num_files(&self, level: usize) -> usize {
        self.files[level].len()
    }

    pub fn level_bytes(&self, level: usize) -> u64 {
        total_file_size(&self.files[level])
    }

    pub fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    pub fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    /// "files[ 2 1 0 0 0 0 0 ]"
    pub fn level_summary(&self) -> String {
        let counts: Vec<String> = self.files.iter().map(|f| f.len().to_string()).collect();
        format!("files[ {} ]", counts.join(" "))
    }

    /// Compute which level most needs compaction
    pub(crate) fn finalize(&mut self, config: &Config) {
        let mut best_level = 0;
        let mut best_score = -1.0;

        for level in 0..self.files.len().saturating_sub(1) {
            let score = if level == 0 {
                // Level 0 is bounded by file count: every read searches every file
                self.files[0].len() as f64 / config.level0_compaction_trigger as f64
            } else {
                self.level_bytes(level) as f64 / config.max_bytes_for_level(level) as f64
            };
            if score > best_score {
                best_level = level;
                best_score = score;
            }
        }

        self.compaction_level = best_level;
        self.compaction_score = best_score;
    }

    /// Look `user_key` up at the sequence encoded in `ikey`.
    ///
    /// `None` when no table knows the key; `Some(Tombstone)` when the newest
    /// visible entry is a deletion.
    pub fn get(&self, table_cache: &TableCache, ikey: &[u8]) -> Result<Option<MemTableEntry>> {
        let user_key = extract_user_key(ikey);
        let ucmp = self.icmp.user_comparator();

        // Level 0: every file whose range covers the key, newest first
        for file in self.files[0].iter().rev() {
            if ucmp.compare(user_key, extract_user_key(&file.smallest)) == Ordering::Less
                || ucmp.compare(user_key, extract_user_key(&file.largest)) == Ordering::Greater
            {
                continue;
            }
            if let Some(entry) = self.search_file(table_cache, file, ikey)? {
                return Ok(Some(entry));
            }
        }

        // Deeper levels: at most one candidate file each
        for level in 1..self.files.len() {
            let files = &self.files[level];
            let index = find_file(&self.icmp, files, ikey);
            let Some(file) = files.get(index) else { continue };
            if ucmp.compare(user_key, extract_user_key(&file.smallest)) == Ordering::Less {
                continue;
            }
            if let Some(entry) = self.search_file(table_cache, file, ikey)? {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    fn search_file(&self, table_cache: &TableCache, file: &FileMetaData, ikey: &[u8]) -> Result<Option<MemTableEntry>> {
        let Some((found_key, value)) = table_cache.get(file.number, file.file_size, ikey)? else {
            return Ok(None);
        };
        let Some(parsed) = parse_internal_key(&found_key) else {
            return Err(crate::error::StrataError::Corruption(format!(
                "malformed key in table {}",
                file.number
            )));
        };
        if self.icmp.compare_user(parsed.user_key, extract_user_key(ikey)) != Ordering::Equal {
            return Ok(None);
        }
        Ok(Some(match parsed.value_type {
            ValueType::Value => MemTableEntry::Value(value),
            ValueType::Deletion => MemTableEntry::Tombstone,
        }))
    }

    /// Files at `level` overlapping the user-key range `[begin, end]`
    /// (`None` = unbounded).
    ///
    /// Level-0 files overlap each other, so the range grows to cover every
    /// file it touches and the search restarts until it is stable.
    pub fn get_overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<FileMetaData>> {
        let ucmp = self.icmp.user_comparator();
        let mut begin = begin.map(|b| b.to_vec());
        let mut end = end.map(|e| e.to_vec());
        let mut inputs = Vec::new();

        let mut i = 0;
        while i < self.files[level].len() {
            let file = &self.files[level][i];
            i += 1;
            let file_start = extract_user_key(&file.smallest);
            let file_limit = extract_user_key(&file.largest);

            if begin
                .as_deref()
                .is_some_and(|b| ucmp.compare(file_limit, b) == Ordering::Less)
            {
                continue;
            }
            if end
                .as_deref()
                .is_some_and(|e| ucmp.compare(file_start, e) == Ordering::Greater)
            {
                continue;
            }

            inputs.push(Arc::clone(file));
            if level == 0 {
                if begin
                    .as_deref()
                    .is_some_and(|b| ucmp.compare(file_start, b) == Ordering::Less)
                {
                    begin = Some(file_start.to_vec());
                    inputs.clear();
                    i = 0;
                } else if end
                    .as_deref()
                    .is_some_and(|e| ucmp.compare(file_limit, e) == Ordering::Greater)
                {
                    end = Some(file_limit.to_vec());
                    inputs.clear();
                    i = 0;
                }
            }
        }
        inputs
    }

    /// Does any file at `level` overlap the user-key range?
    pub fn overlap_in_level(&self, level: usize, smallest: Option<&[u8]>, largest: Option<&[u8]>) -> bool {
        let ucmp = self.icmp.user_comparator();
        self.files[level].iter().any(|file| {
            let before = smallest
                .is_some_and(|s| ucmp.compare(extract_user_key(&file.largest), s) == Ordering::Less);
            let after = largest
                .is_some_and(|l| ucmp.compare(extract_user_key(&file.smallest), l) == Ordering::Greater);
            !before && !after
        })
    }

    /// One cursor per level-0 file plus one concatenating cursor per
    /// non-empty deeper level
    pub fn add_iterators(
        &self,
        table_cache: &Arc<TableCache>,
        verify_checksums: bool,
        out: &mut Vec<Box<dyn InternalIterator>>,
    ) -> Result<()> {
        for file in &self.files[0] {
            out.push(Box::new(table_cache.new_iterator(
                file.number,
                file.file_size,
                verify_checksums,
            )?));
        }
        for level in 1..self.files.len() {
            if !self.files[level].is_empty() {
                out.push(Box::new(LevelIterator::new(
                    Arc::clone(table_cache),
                    Arc::clone(&self.icmp),
                    self.files[level].clone(),
                    verify_checksums,
                )));
            }
        }
        Ok(())
    }

    /// Approximate byte offset of `ikey` across the whole database
    pub fn approximate_offset_of(&self, table_cache: &TableCache, ikey: &[u8]) -> Result<u64> {
        let mut result = 0;
        for (level, files) in self.files.iter().enumerate() {
            for file in files {
                if self.icmp.compare(&file.largest, ikey) != Ordering::Greater {
                    // Entirely before ikey
                    result += file.file_size;
                } else if self.icmp.compare(&file.smallest, ikey) == Ordering::Greater {
                    // Entirely after ikey; sorted levels have nothing more to add
                    if level > 0 {
                        break;
                    }
                } else {
                    result += table_cache.approximate_offset_of(file.number, file.file_size, ikey)?;
                }
            }
        }
        Ok(result)
    }

    pub(crate) fn icmp(&self) -> &Arc<InternalKeyComparator> {
        &self.icmp
    }

    pub(crate) fn set_files(&mut self, level: usize, files: Vec<Arc<FileMetaData>>) {
        self.files[level] = files;
    }
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("levels", &self.level_summary())
            .field("compaction_score", &self.compaction_score)
            .finish()
    }
}

pub(crate) fn total_file_size(files: &[Arc<FileMetaData>]) -> u64 {
    files.iter().map(|f| f.file_size).sum()
}

/// Index of the first file whose largest key >= `ikey` (files sorted, disjoint)
pub(crate) fn find_file(icmp: &InternalKeyComparator, files: &[Arc<FileMetaData>], ikey: &[u8]) -> usize {
    files.partition_point(|f| icmp.compare(&f.largest, ikey) == Ordering::Less)
}
