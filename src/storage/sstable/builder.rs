//! SSTable Builder
//!
//! Writes sorted internal entries to a new SSTable file.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::filter::FilterPolicy;
use crate::keys::{extract_user_key, Comparator, InternalKeyComparator};

use super::{
    block_checksum, BlockBuilder, BlockHandle, FilterBlockBuilder, Footer, SSTable,
    FILTER_META_PREFIX, NO_COMPRESSION,
};

/// Builder for creating new SSTables from sorted entries
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    icmp: Arc<InternalKeyComparator>,
    block_size: usize,
    /// Bytes written so far
    offset: u64,
    entry_count: u64,

    data_block: BlockBuilder,
    index_block: BlockBuilder,
    filter_block: Option<FilterBlockBuilder>,

    /// Index entry for the last flushed data block. Added once the next key is
    /// known so the separator can be shortened.
    pending_handle: Option<BlockHandle>,

    min_key: Option<Vec<u8>>,
    last_key: Vec<u8>,
}

impl SSTableBuilder {
    /// Create the file; call `add()` in internal key order, then `finish()`
    pub fn new(
        path: &Path,
        icmp: Arc<InternalKeyComparator>,
        block_size: usize,
        filter_policy: Option<Arc<dyn FilterPolicy>>,
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            icmp,
            block_size,
            offset: 0,
            entry_count: 0,
            data_block: BlockBuilder::new(),
            index_block: BlockBuilder::new(),
            filter_block: filter_policy.map(FilterBlockBuilder::new),
            pending_handle: None,
            min_key: None,
            last_key: Vec::new(),
        })
    }

    /// Add an internal key/value pair (must be called in sorted key order)
    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        debug_assert!(
            self.entry_count == 0
                || self.icmp.compare(&self.last_key, key) == std::cmp::Ordering::Less,
            "SSTableBuilder keys out of order"
        );

        if let Some(handle) = self.pending_handle.take() {
            let mut separator = self.last_key.clone();
            self.icmp.find_shortest_separator(&mut separator, key);
            self.index_block.add(&separator, &handle.encode());
        }

        if let Some(filter) = self.filter_block.as_mut() {
            filter.add_key(extract_user_key(key));
        }
        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.last_key.clear();
        self.last_key.extend_from_slice(key);
        self.entry_count += 1;
        self.data_block.add(key, value);

        if self.data_block.estimated_size() >= self.block_size {
            self.flush_data_block()?;
        }
        Ok(())
    }

    /// Bytes written to the file so far
    pub fn file_size(&self) -> u64 {
        self.offset
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Finish building: write filter, meta-index, index and footer
    pub fn finish(mut self) -> Result<SSTable> {
        self.flush_data_block()?;

        let mut metaindex_block = BlockBuilder::new();
        if let Some(filter) = self.filter_block.take() {
            let key = format!("{}{}", FILTER_META_PREFIX, filter.policy_name());
            let handle = self.write_raw_block(&filter.finish())?;
            metaindex_block.add(key.as_bytes(), &handle.encode());
        }
        let metaindex_handle = self.write_raw_block(&metaindex_block.finish())?;

        if let Some(handle) = self.pending_handle.take() {
            let mut successor = self.last_key.clone();
            self.icmp.find_short_successor(&mut successor);
            self.index_block.add(&successor, &handle.encode());
        }
        let index_contents = self.index_block.finish();
        let index_handle = self.write_raw_block(&index_contents)?;

        let footer = Footer {
            metaindex_handle,
            index_handle,
        };
        let footer = footer.encode();
        self.writer.write_all(&footer)?;
        self.offset += footer.len() as u64;

        self.writer.flush()?;
        let file = self
            .writer
            .into_inner()
            .map_err(|e| StrataError::Io(e.into_error()))?;
        file.sync_all()?;

        Ok(SSTable {
            path: self.path,
            entry_count: self.entry_count,
            min_key: self.min_key.unwrap_or_default(),
            max_key: self.last_key,
            file_size: self.offset,
        })
    }

    /// Give up on the table and remove the partial file
    pub fn abandon(self) {
        let path = self.path.clone();
        drop(self.writer);
        if let Err(e) = fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove abandoned SSTable");
        }
    }

    fn flush_data_block(&mut self) -> Result<()> {
        if self.data_block.is_empty() {
            return Ok(());
        }
        debug_assert!(self.pending_handle.is_none());
        let contents = self.data_block.finish();
        let handle = self.write_raw_block(&contents)?;
        self.pending_handle = Some(handle);
        if let Some(filter) = self.filter_block.as_mut() {
            filter.finish_block();
        }
        Ok(())
    }

    /// Write `contents` followed by its trailer
    fn write_raw_block(&mut self, contents: &[u8]) -> Result<BlockHandle> {
        let handle = BlockHandle::new(self.offset, contents.len() as u64);
        let crc = block_checksum(contents, NO_COMPRESSION);

        self.writer.write_all(contents)?;
        self.writer.write_all(&[NO_COMPRESSION])?;
        self.writer.write_all(&crc.to_le_bytes())?;

        self.offset += (contents.len() + super::BLOCK_TRAILER_SIZE) as u64;
        Ok(handle)
    }
}
