//! Compaction Module
//!
//! Background maintenance of the level structure.
//!
//! ## Responsibilities
//! - Flush frozen memtables into level-0 tables
//! - Merge a level's files into the next level when the level is too big
//!   (level 0: too many files), dropping entries no snapshot can see
//! - Run on a dedicated worker thread fed by a channel
//!
//! ## Pieces
//! - `Compaction`: what to merge (picked by `VersionSet`)
//! - `job`: how to merge it, and how to write a memtable out as a table
//! - `worker`: the thread and its task queue

mod job;
mod worker;

use std::cmp::Ordering;
use std::sync::Arc;

pub(crate) use job::{build_table, run_compaction, CompactionHost};
pub(crate) use worker::{spawn_worker, BackgroundWork, Task};

use crate::config::Config;
use crate::keys::{extract_user_key, Comparator};
use crate::version::{total_file_size, FileMetaData, Version, VersionEdit};

/// Grandparent overlap (in units of max_file_size) after which an output
/// file is cut
const GRANDPARENT_OVERLAP_FACTOR: u64 = 10;

/// One compaction: `inputs[0]` from `level`, `inputs[1]` from `level + 1`
pub struct Compaction {
    pub(crate) level: usize,
    pub(crate) inputs: [Vec<Arc<FileMetaData>>; 2],
    /// Files at `level + 2` overlapping the compaction's key range
    pub(crate) grandparents: Vec<Arc<FileMetaData>>,
    pub(crate) input_version: Arc<Version>,
    pub(crate) edit: VersionEdit,

    max_output_file_size: u64,
    max_grandparent_overlap: u64,

    // State for should_stop_before
    grandparent_index: usize,
    seen_key: bool,
    overlapped_bytes: u64,

    // State for is_base_level_for_key: per-level file cursors
    level_ptrs: Vec<usize>,
}

impl Compaction {
    pub(crate) fn new(level: usize, input_version: Arc<Version>, config: &Config) -> Self {
        let num_levels = input_version.num_levels();
        Self {
            level,
            inputs: [Vec::new(), Vec::new()],
            grandparents: Vec::new(),
            input_version,
            edit: VersionEdit::new(),
            max_output_file_size: config.max_file_size,
            max_grandparent_overlap: GRANDPARENT_OVERLAP_FACTOR * config.max_file_size,
            grandparent_index: 0,
            seen_key: false,
            overlapped_bytes: 0,
            level_ptrs: vec![0; num_levels],
        }
    }

    pub fn level(&self) -> usize {
        self.level
    }

    pub fn num_input_files(&self, which: usize) -> usize {
        self.inputs[which].len()
    }

    pub fn max_output_file_size(&self) -> u64 {
        self.max_output_file_size
    }

    /// A single file with nothing to merge against can move down a level
    /// without being rewritten, unless that would leave it overlapping too
    /// much of the level below its destination.
    pub fn is_trivial_move(&self) -> bool {
        self.inputs[0].len() == 1
            && self.inputs[1].is_empty()
            && total_file_size(&self.grandparents) <= self.max_grandparent_overlap
    }

    /// Record the removal of every input file in the edit
    pub(crate) fn add_input_deletions(&mut self) {
        for (which, files) in self.inputs.iter().enumerate() {
            for file in files {
                self.edit.delete_file(self.level + which, file.number);
            }
        }
    }

    /// True if no level below the output level can hold `user_key`, so a
    /// tombstone for it has nothing left to shadow.
    ///
    /// Keys must be passed in increasing order.
    pub(crate) fn is_base_level_for_key(&mut self, user_key: &[u8]) -> bool {
        let icmp = Arc::clone(self.input_version.icmp());
        let ucmp = icmp.user_comparator();
        for level in self.level + 2..self.input_version.num_levels() {
            let files = self.input_version.files(level);
            while self.level_ptrs[level] < files.len() {
                let file = &files[self.level_ptrs[level]];
                if ucmp.compare(user_key, extract_user_key(&file.largest)) != Ordering::Greater {
                    if ucmp.compare(user_key, extract_user_key(&file.smallest)) != Ordering::Less {
                        return false;
                    }
                    break;
                }
                self.level_ptrs[level] += 1;
            }
        }
        true
    }

    /// Should the current output file end before `ikey`?
    ///
    /// Keeps any one output from overlapping so much of the grandparent level
    /// that compacting it later would be expensive.
    pub(crate) fn should_stop_before(&mut self, ikey: &[u8]) -> bool {
        let icmp = Arc::clone(self.input_version.icmp());
        while self.grandparent_index < self.grandparents.len()
            && icmp.compare(ikey, &self.grandparents[self.grandparent_index].largest) == Ordering::Greater
        {
            if self.seen_key {
                self.overlapped_bytes += self.grandparents[self.grandparent_index].file_size;
            }
            self.grandparent_index += 1;
        }
        self.seen_key = true;

        if self.overlapped_bytes > self.max_grandparent_overlap {
            self.overlapped_bytes = 0;
            true
        } else {
            false
        }
    }
}

impl std::fmt::Debug for Compaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let numbers = |files: &[Arc<FileMetaData>]| files.iter().map(|f| f.number).collect::<Vec<_>>();
        f.debug_struct("Compaction")
            .field("level", &self.level)
            .field("inputs0", &numbers(&self.inputs[0]))
            .field("inputs1", &numbers(&self.inputs[1]))
            .field("grandparents", &self.grandparents.len())
            .finish()
    }
}
