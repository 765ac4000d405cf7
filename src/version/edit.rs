//! Version edits
//!
//! A manifest is a log of `VersionEdit`s, each framed like a WAL record with a
//! bincode payload. Replaying every edit in order rebuilds the level layout
//! and the engine's counters.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::keys::SequenceNumber;

/// Metadata for one table file in a Version
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    /// Smallest internal key in the table
    pub smallest: Vec<u8>,
    /// Largest internal key in the table
    pub largest: Vec<u8>,
}

/// Delta between two Versions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub filter_policy: Option<String>,
    pub log_number: Option<u64>,
    pub prev_log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    /// (level, internal key where the next size compaction of that level starts)
    pub compact_pointers: Vec<(usize, Vec<u8>)>,
    /// (level, file number)
    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    pub fn set_filter_policy_name(&mut self, name: &str) {
        self.filter_policy = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, number: u64) {
        self.log_number = Some(number);
    }

    pub fn set_prev_log_number(&mut self, number: u64) {
        self.prev_log_number = Some(number);
    }

    pub fn set_next_file_number(&mut self, number: u64) {
        self.next_file_number = Some(number);
    }

    pub fn set_last_sequence(&mut self, sequence: SequenceNumber) {
        self.last_sequence = Some(sequence);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: Vec<u8>) {
        self.compact_pointers.push((level, key));
    }

    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.new_files.push((level, file));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        bincode::deserialize(payload)
            .map_err(|e| StrataError::Corruption(format!("bad version edit: {}", e)))
    }
}
