//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted internal entries.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Data Block 0 .. Data Block N-1                          │
//! │   entries  [KeyLen: u32][ValLen: u32][Key][Value]       │
//! │   trailer  [EntryOffset: u32] * n  [n: u32]             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Filter Block (optional)                                 │
//! │   one filter per data block, over user keys             │
//! ├─────────────────────────────────────────────────────────┤
//! │ Meta-Index Block                                        │
//! │   "filter.<policy name>" → BlockHandle                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Index Block                                             │
//! │   separator key (>= last key of block i) → BlockHandle  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (40 bytes)                                       │
//! │   MetaIndex: BlockHandle | Index: BlockHandle | Magic   │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every block is followed by a 5-byte trailer: a compression type byte
//! (always 0, uncompressed) and a CRC32 over the block contents plus that byte.
//! All integers are little-endian.

mod block;
mod builder;
mod filter_block;
mod iterator;
mod reader;

use std::path::PathBuf;

use bytes::{Buf, BufMut};

use crate::error::{Result, StrataError};

pub(crate) use block::{Block, BlockBuilder, BlockIterator};
pub use builder::SSTableBuilder;
pub(crate) use filter_block::{FilterBlockBuilder, FilterBlockReader};
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic number identifying a StrataKV table file ("STRATAKV")
pub(crate) const TABLE_MAGIC: u64 = 0x5354_5241_5441_4b56;

/// Block trailer: compression type (1) + CRC32 (4)
pub(crate) const BLOCK_TRAILER_SIZE: usize = 5;

/// Only uncompressed blocks are written
pub(crate) const NO_COMPRESSION: u8 = 0;

/// Encoded size of a BlockHandle: offset (8) + size (8)
pub(crate) const BLOCK_HANDLE_SIZE: usize = 16;

/// Footer size: two handles + magic (8) = 40 bytes
pub(crate) const FOOTER_SIZE: usize = 2 * BLOCK_HANDLE_SIZE + 8;

/// Meta-index key prefix for the filter block
pub(crate) const FILTER_META_PREFIX: &str = "filter.";

/// CRC stored in a block trailer
pub(crate) fn block_checksum(contents: &[u8], block_type: u8) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    hasher.update(&[block_type]);
    hasher.finalize()
}

// =============================================================================
// Block Handle & Footer
// =============================================================================

/// Location of a block within a table file (size excludes the trailer)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

impl BlockHandle {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    pub fn encode_to(&self, dst: &mut impl BufMut) {
        dst.put_u64_le(self.offset);
        dst.put_u64_le(self.size);
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BLOCK_HANDLE_SIZE);
        self.encode_to(&mut buf);
        buf
    }

    pub fn decode(mut src: &[u8]) -> Result<Self> {
        if src.len() < BLOCK_HANDLE_SIZE {
            return Err(StrataError::Corruption("bad block handle".into()));
        }
        let offset = src.get_u64_le();
        let size = src.get_u64_le();
        Ok(Self { offset, size })
    }
}

/// Fixed-size tail of every table file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub metaindex_handle: BlockHandle,
    pub index_handle: BlockHandle,
}

impl Footer {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FOOTER_SIZE);
        self.metaindex_handle.encode_to(&mut buf);
        self.index_handle.encode_to(&mut buf);
        buf.put_u64_le(TABLE_MAGIC);
        buf
    }

    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() != FOOTER_SIZE {
            return Err(StrataError::Corruption(format!(
                "table footer must be {} bytes, got {}",
                FOOTER_SIZE,
                src.len()
            )));
        }
        let mut magic = &src[2 * BLOCK_HANDLE_SIZE..];
        let magic = magic.get_u64_le();
        if magic != TABLE_MAGIC {
            return Err(StrataError::Corruption(format!(
                "not a table file (bad magic {:#x})",
                magic
            )));
        }
        Ok(Self {
            metaindex_handle: BlockHandle::decode(&src[..BLOCK_HANDLE_SIZE])?,
            index_handle: BlockHandle::decode(&src[BLOCK_HANDLE_SIZE..2 * BLOCK_HANDLE_SIZE])?,
        })
    }
}

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Summary of a freshly written table, returned by `SSTableBuilder::finish`
#[derive(Debug, Clone)]
pub struct SSTable {
    /// Path to the SSTable file
    pub path: PathBuf,
    /// Number of internal entries (tombstones included)
    pub entry_count: u64,
    /// Smallest internal key
    pub min_key: Vec<u8>,
    /// Largest internal key
    pub max_key: Vec<u8>,
    /// File size in bytes
    pub file_size: u64,
}

impl SSTable {
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }
}
