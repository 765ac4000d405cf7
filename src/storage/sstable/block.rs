//! Blocks
//!
//! Layout of a block (data, index and meta-index blocks share it):
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │ Entry 0: [key_len u32][val_len u32][key][value]  │
//! │ ...                                              │
//! ├──────────────────────────────────────────────────┤
//! │ Offset array: [off_0 u32] ... [off_{n-1} u32]    │
//! │ Num entries (u32)                                │
//! └──────────────────────────────────────────────────┘
//! ```
//! The offset array lets a reader binary-search entries without parsing the
//! block front to back.

use std::cmp::Ordering;
use std::ops::Range;
use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Result, StrataError};
use crate::iterator::InternalIterator;
use crate::keys::Comparator;

const U32_SIZE: usize = 4;
const ENTRY_HEADER_SIZE: usize = 2 * U32_SIZE;

/// Accumulates sorted entries and serializes them into a block
#[derive(Debug, Default)]
pub(crate) struct BlockBuilder {
    buf: BytesMut,
    offsets: Vec<u32>,
}

impl BlockBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Entries must arrive in comparator order
    pub(crate) fn add(&mut self, key: &[u8], value: &[u8]) {
        self.offsets.push(self.buf.len() as u32);
        self.buf.put_u32_le(key.len() as u32);
        self.buf.put_u32_le(value.len() as u32);
        self.buf.put_slice(key);
        self.buf.put_slice(value);
    }

    /// Size of the block if it were finished now
    pub(crate) fn estimated_size(&self) -> usize {
        self.buf.len() + (self.offsets.len() + 1) * U32_SIZE
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Serialize the block and leave the builder empty
    pub(crate) fn finish(&mut self) -> Bytes {
        for offset in &self.offsets {
            self.buf.put_u32_le(*offset);
        }
        self.buf.put_u32_le(self.offsets.len() as u32);
        self.offsets.clear();
        self.buf.split().freeze()
    }
}

/// A parsed, immutable block
#[derive(Debug, Clone)]
pub(crate) struct Block {
    data: Bytes,
    /// Start of the offset array (end of entry data)
    offsets_start: usize,
    num_entries: usize,
}

impl Block {
    pub(crate) fn new(data: Bytes) -> Result<Self> {
        if data.len() < U32_SIZE {
            return Err(StrataError::Corruption("block too short".into()));
        }
        let mut tail = &data[data.len() - U32_SIZE..];
        let num_entries = tail.get_u32_le() as usize;
        let array_len = num_entries
            .checked_add(1)
            .and_then(|n| n.checked_mul(U32_SIZE))
            .filter(|len| *len <= data.len())
            .ok_or_else(|| StrataError::Corruption("bad block entry count".into()))?;

        Ok(Self {
            offsets_start: data.len() - array_len,
            num_entries,
            data,
        })
    }

    pub(crate) fn iter(&self, cmp: Arc<dyn Comparator>) -> BlockIterator {
        BlockIterator {
            block: self.clone(),
            cmp,
            current: None,
            error: None,
        }
    }

    fn entry_offset(&self, index: usize) -> usize {
        let mut pos = &self.data[self.offsets_start + index * U32_SIZE..];
        pos.get_u32_le() as usize
    }

    /// Byte ranges of the key and value of entry `index`
    fn entry(&self, index: usize) -> Result<(Range<usize>, Range<usize>)> {
        let start = self.entry_offset(index);
        if start + ENTRY_HEADER_SIZE > self.offsets_start {
            return Err(StrataError::Corruption("block entry offset out of range".into()));
        }
        let mut header = &self.data[start..start + ENTRY_HEADER_SIZE];
        let key_len = header.get_u32_le() as usize;
        let val_len = header.get_u32_le() as usize;

        let key_start = start + ENTRY_HEADER_SIZE;
        let val_start = key_start + key_len;
        let end = val_start + val_len;
        if end > self.offsets_start {
            return Err(StrataError::Corruption("block entry overruns block".into()));
        }
        Ok((key_start..val_start, val_start..end))
    }
}

/// Cursor over one block
pub(crate) struct BlockIterator {
    block: Block,
    cmp: Arc<dyn Comparator>,
    /// (entry index, key range, value range)
    current: Option<(usize, Range<usize>, Range<usize>)>,
    error: Option<StrataError>,
}

impl BlockIterator {
    /// Position of the current entry within the block
    pub(crate) fn entry_index(&self) -> Option<usize> {
        self.current.as_ref().map(|(i, _, _)| *i)
    }

    fn seek_to(&mut self, index: usize) {
        if index >= self.block.num_entries {
            self.current = None;
            return;
        }
        match self.block.entry(index) {
            Ok((key, value)) => self.current = Some((index, key, value)),
            Err(e) => {
                self.error = Some(e);
                self.current = None;
            }
        }
    }
}

impl InternalIterator for BlockIterator {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.seek_to(0);
    }

    fn seek_to_last(&mut self) {
        match self.block.num_entries {
            0 => self.current = None,
            n => self.seek_to(n - 1),
        }
    }

    fn seek(&mut self, target: &[u8]) {
        // Binary search for the first entry >= target
        let (mut lo, mut hi) = (0, self.block.num_entries);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let key = match self.block.entry(mid) {
                Ok((key, _)) => key,
                Err(e) => {
                    self.error = Some(e);
                    self.current = None;
                    return;
                }
            };
            match self.cmp.compare(&self.block.data[key], target) {
                Ordering::Less => lo = mid + 1,
                _ => hi = mid,
            }
        }
        self.seek_to(lo);
    }

    fn next(&mut self) {
        if let Some((index, _, _)) = self.current {
            self.seek_to(index + 1);
        }
    }

    fn prev(&mut self) {
        match self.current {
            Some((0, _, _)) => self.current = None,
            Some((index, _, _)) => self.seek_to(index - 1),
            None => {}
        }
    }

    fn key(&self) -> &[u8] {
        match &self.current {
            Some((_, key, _)) => &self.block.data[key.clone()],
            None => panic!("key() on invalid BlockIterator"),
        }
    }

    fn value(&self) -> &[u8] {
        match &self.current {
            Some((_, _, value)) => &self.block.data[value.clone()],
            None => panic!("value() on invalid BlockIterator"),
        }
    }

    fn status(&self) -> Result<()> {
        match &self.error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}
