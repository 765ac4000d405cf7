//! WAL Entry definitions
//!
//! Defines the structure of individual WAL log entries and the record framing
//! shared with the manifest.

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::keys::SequenceNumber;

/// Record header: CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 8;

/// A single entry in the WAL: one atomic write batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    /// Sequence number of the first operation; the rest follow contiguously
    pub sequence: SequenceNumber,

    /// The operations to apply, in order
    pub operations: Vec<Operation>,
}

/// Operations that can be logged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    /// Put a key-value pair
    Put { key: Vec<u8>, value: Vec<u8> },

    /// Delete a key
    Delete { key: Vec<u8> },
}

impl Operation {
    pub fn key(&self) -> &[u8] {
        match self {
            Operation::Put { key, .. } | Operation::Delete { key } => key,
        }
    }
}

impl WalEntry {
    pub fn new(sequence: SequenceNumber, operations: Vec<Operation>) -> Self {
        Self {
            sequence,
            operations,
        }
    }

    /// Sequence number of the last operation in this entry
    pub fn last_sequence(&self) -> SequenceNumber {
        self.sequence + self.operations.len().saturating_sub(1) as u64
    }

    /// Payload bytes (no framing)
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self> {
        bincode::deserialize(payload)
            .map_err(|e| StrataError::Corruption(format!("undecodable WAL entry: {}", e)))
    }
}

/// Frame a payload: `[crc32(payload)][len][payload]`
pub fn frame_record(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}
