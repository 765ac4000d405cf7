//! WAL Writer
//!
//! Handles appending records to a log file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::WalSyncStrategy;
use crate::error::{Result, StrataError};

use super::entry::frame_record;
use super::WalEntry;

/// Writes records to a log file.
///
/// Two layers of buffering:
///   BufWriter.flush()  → Rust buffer → OS page cache   (every record)
///   file.sync_data()   → OS page cache → physical disk (per sync strategy)
pub struct WalWriter {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Bytes written so far (file length)
    offset: u64,
    sync_strategy: WalSyncStrategy,
    /// Records appended since the last fsync
    unsynced: usize,
}

impl WalWriter {
    /// Create a fresh, empty log file (truncating any existing file)
    pub fn create(path: &Path, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            offset: 0,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append a write batch entry. `force_sync` requests an fsync regardless
    /// of the configured strategy.
    ///
    /// Returns the file offset just past the record.
    pub fn append(&mut self, entry: &WalEntry, force_sync: bool) -> Result<u64> {
        let payload = entry.encode()?;
        self.add_record(&payload)
            .map_err(|e| StrataError::WalWrite(format!("{}: {}", self.path.display(), e)))?;

        self.unsynced += 1;
        let should_sync = force_sync
            || match self.sync_strategy {
                WalSyncStrategy::OnRequest => false,
                WalSyncStrategy::EveryWrite => true,
                WalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
            };
        if should_sync {
            self.sync()
                .map_err(|e| StrataError::WalWrite(format!("fsync {}: {}", self.path.display(), e)))?;
        }

        Ok(self.offset)
    }

    /// Append one framed record and push it to the OS
    pub fn add_record(&mut self, payload: &[u8]) -> Result<u64> {
        let record = frame_record(payload);
        self.writer.write_all(&record)?;
        self.writer.flush()?;
        self.offset += record.len() as u64;
        Ok(self.offset)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Current file length in bytes
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
