//! WAL Reader
//!
//! Handles reading records from a log file.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{Result, StrataError};

use super::{WalEntry, HEADER_SIZE};

/// Largest payload a single record may claim; anything bigger is a torn or
/// corrupted header.
const MAX_RECORD_SIZE: u64 = 1 << 30;

/// Reads records from a log file
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last record returned successfully
    position: u64,
    file_len: u64,
}

impl WalReader {
    /// Open a log file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Read the next record payload.
    ///
    /// - `Ok(Some(payload))`: a complete record with a valid checksum
    /// - `Ok(None)`: clean end of file
    /// - `Err(Corruption)`: torn header, truncated payload, or CRC mismatch;
    ///   `position()` still reports the end of the last good record
    pub fn next_record(&mut self) -> Result<Option<Vec<u8>>> {
        let remaining = self.file_len - self.position;
        if remaining == 0 {
            return Ok(None);
        }
        if remaining < HEADER_SIZE as u64 {
            return Err(StrataError::Corruption(format!(
                "truncated record header at offset {}",
                self.position
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        let crc = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;

        if len > MAX_RECORD_SIZE || len > remaining - HEADER_SIZE as u64 {
            return Err(StrataError::Corruption(format!(
                "truncated record at offset {} (claims {} bytes, {} remain)",
                self.position,
                len,
                remaining - HEADER_SIZE as u64
            )));
        }

        let mut payload = vec![0u8; len as usize];
        self.reader.read_exact(&mut payload)?;

        if crc32fast::hash(&payload) != crc {
            return Err(StrataError::Corruption(format!(
                "checksum mismatch at offset {}",
                self.position
            )));
        }

        self.position += HEADER_SIZE as u64 + len;
        Ok(Some(payload))
    }

    /// Read and decode the next write batch entry
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        match self.next_record()? {
            Some(payload) => WalEntry::decode(&payload).map(Some),
            None => Ok(None),
        }
    }

    /// End offset of the last valid record
    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn file_len(&self) -> u64 {
        self.file_len
    }
}
