//! WAL Recovery
//!
//! Handles crash recovery by replaying the WAL.

use std::fs::OpenOptions;
use std::path::Path;

use tracing::warn;

use crate::error::Result;
use crate::keys::SequenceNumber;

use super::{WalEntry, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted records found (everything after the first is unreadable)
    pub entries_corrupted: u64,

    /// Last sequence number covered by a valid entry (0 if none)
    pub last_sequence: SequenceNumber,

    /// Whether the WAL was truncated (partial writes removed)
    pub was_truncated: bool,

    /// Length of the valid prefix of the file
    pub valid_bytes: u64,
}

impl WalRecovery {
    /// Recover entries from a WAL file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Stop at the first torn or corrupted record
    /// 3. Truncate that tail (an unflushed partial write), or fail with
    ///    `Corruption` when `paranoid` is set
    /// 4. Return all valid entries in order
    pub fn recover(path: &Path, paranoid: bool) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_sequence = entry.last_sequence();
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(e) if e.is_corruption() => {
                    if paranoid {
                        return Err(e);
                    }
                    warn!(
                        wal = %path.display(),
                        offset = reader.position(),
                        error = %e,
                        "dropping corrupted WAL tail"
                    );
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        result.valid_bytes = reader.position();
        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(result.valid_bytes)?;
            file.sync_all()?;
        }

        Ok((entries, result))
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let mut reader = WalReader::open(path)?;
        let mut result = RecoveryResult::default();
        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_sequence = entry.last_sequence();
                }
                Ok(None) => break,
                Err(e) if e.is_corruption() => {
                    result.entries_corrupted += 1;
                    result.was_truncated = true;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        // Reported, not applied
        result.valid_bytes = reader.position();
        Ok(result)
    }
}
