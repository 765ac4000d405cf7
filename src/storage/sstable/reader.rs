//! SSTable Reader
//!
//! Opens a table file, keeps its index block (and filter block, if any) in
//! memory, and reads data blocks on demand.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, StrataError};
use crate::filter::FilterPolicy;
use crate::iterator::InternalIterator;
use crate::keys::{extract_user_key, BytewiseComparator, Comparator, InternalKeyComparator};

use super::iterator::SSTableIterator;
use super::{
    block_checksum, Block, BlockHandle, BlockIterator, FilterBlockReader, Footer,
    BLOCK_TRAILER_SIZE, FILTER_META_PREFIX, FOOTER_SIZE, NO_COMPRESSION,
};

/// Reader for one SSTable file.
///
/// Shared between threads behind an `Arc`; the file handle sits behind a
/// mutex because each read is a seek followed by a read.
pub struct SSTableReader {
    path: PathBuf,
    file: Mutex<File>,
    file_size: u64,
    icmp: Arc<InternalKeyComparator>,
    index_block: Block,
    metaindex_handle: BlockHandle,
    filter: Option<FilterBlockReader>,
    paranoid: bool,
}

impl SSTableReader {
    /// Open an SSTable for reading.
    ///
    /// A filter block is only loaded when `filter_policy` is given and the
    /// table carries a filter of that policy's name. An unreadable filter
    /// block is logged and ignored.
    pub fn open(
        path: &Path,
        file_size: u64,
        icmp: Arc<InternalKeyComparator>,
        filter_policy: Option<Arc<dyn FilterPolicy>>,
        paranoid: bool,
    ) -> Result<Self> {
        if file_size < FOOTER_SIZE as u64 {
            return Err(StrataError::Corruption(format!(
                "{} is too short to be a table ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut file = File::open(path)?;
        let mut footer = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::Start(file_size - FOOTER_SIZE as u64))?;
        file.read_exact(&mut footer)?;
        let footer = Footer::decode(&footer)?;

        let index_contents = read_raw_block(&mut file, file_size, &footer.index_handle, true)?;
        let index_block = Block::new(index_contents)?;

        let mut reader = Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            file_size,
            icmp,
            index_block,
            metaindex_handle: footer.metaindex_handle,
            filter: None,
            paranoid,
        };

        if let Some(policy) = filter_policy {
            match reader.read_filter(Arc::clone(&policy)) {
                Ok(filter) => reader.filter = filter,
                Err(e) => {
                    tracing::warn!(
                        path = %reader.path.display(),
                        policy = policy.name(),
                        error = %e,
                        "Ignoring unreadable filter block"
                    );
                }
            }
        }

        Ok(reader)
    }

    fn read_filter(&self, policy: Arc<dyn FilterPolicy>) -> Result<Option<FilterBlockReader>> {
        let metaindex = self.read_block(&self.metaindex_handle, true)?;
        let mut it = metaindex.iter(Arc::new(BytewiseComparator));
        let key = format!("{}{}", FILTER_META_PREFIX, policy.name());
        it.seek(key.as_bytes());
        it.status()?;
        if !it.valid() || it.key() != key.as_bytes() {
            return Ok(None);
        }

        let handle = BlockHandle::decode(it.value())?;
        let contents = self.read_block_contents(&handle, true)?;
        match FilterBlockReader::new(policy, contents.to_vec()) {
            Some(filter) => Ok(Some(filter)),
            None => Err(StrataError::Corruption("malformed filter block".into())),
        }
    }

    /// Read and verify one block's contents
    pub(crate) fn read_block_contents(&self, handle: &BlockHandle, verify: bool) -> Result<Bytes> {
        let mut file = self.file.lock();
        read_raw_block(&mut file, self.file_size, handle, verify || self.paranoid)
    }

    pub(crate) fn read_block(&self, handle: &BlockHandle, verify: bool) -> Result<Block> {
        Block::new(self.read_block_contents(handle, verify)?)
    }

    pub(crate) fn index_iter(&self) -> BlockIterator {
        self.index_block.iter(self.comparator())
    }

    pub(crate) fn comparator(&self) -> Arc<dyn Comparator> {
        Arc::clone(&self.icmp) as Arc<dyn Comparator>
    }

    /// First entry with internal key >= `ikey` in the one data block that
    /// could hold it.
    ///
    /// Returns `None` when the key is past the end of the table or the
    /// block's filter rules the user key out. The caller checks whether the
    /// returned entry belongs to the same user key.
    pub fn get(&self, ikey: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let mut index = self.index_iter();
        index.seek(ikey);
        index.status()?;
        if !index.valid() {
            return Ok(None);
        }

        if let (Some(filter), Some(block_index)) = (&self.filter, index.entry_index()) {
            if !filter.key_may_match(block_index, extract_user_key(ikey)) {
                return Ok(None);
            }
        }

        let handle = BlockHandle::decode(index.value())?;
        let block = self.read_block(&handle, false)?;
        let mut it = block.iter(self.comparator());
        it.seek(ikey);
        it.status()?;
        if it.valid() {
            Ok(Some((it.key().to_vec(), it.value().to_vec())))
        } else {
            Ok(None)
        }
    }

    /// Approximate file offset where entries for `ikey` would start
    pub fn approximate_offset_of(&self, ikey: &[u8]) -> u64 {
        let mut index = self.index_iter();
        index.seek(ikey);
        if index.valid() {
            if let Ok(handle) = BlockHandle::decode(index.value()) {
                return handle.offset;
            }
        }
        // Past the last key (or unreadable index entry): the meta blocks are
        // close to the end of the file
        self.metaindex_handle.offset
    }

    /// Bidirectional cursor over every entry. Keeps this reader alive.
    pub fn iter(self: &Arc<Self>, verify_checksums: bool) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), verify_checksums)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

fn read_raw_block(file: &mut File, file_size: u64, handle: &BlockHandle, verify: bool) -> Result<Bytes> {
    let total = handle
        .size
        .checked_add(BLOCK_TRAILER_SIZE as u64)
        .filter(|n| handle.offset.checked_add(*n).is_some_and(|end| end <= file_size))
        .ok_or_else(|| StrataError::Corruption("block handle points past end of file".into()))?;

    let mut buf = vec![0u8; total as usize];
    file.seek(SeekFrom::Start(handle.offset))?;
    file.read_exact(&mut buf)?;

    let size = handle.size as usize;
    let block_type = buf[size];
    if verify {
        let expected = u32::from_le_bytes([buf[size + 1], buf[size + 2], buf[size + 3], buf[size + 4]]);
        let actual = block_checksum(&buf[..size], block_type);
        if expected != actual {
            return Err(StrataError::Corruption(format!(
                "block checksum mismatch at offset {}",
                handle.offset
            )));
        }
    }
    if block_type != NO_COMPRESSION {
        return Err(StrataError::Corruption(format!(
            "unknown block compression type {}",
            block_type
        )));
    }

    buf.truncate(size);
    Ok(Bytes::from(buf))
}
