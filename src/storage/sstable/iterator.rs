//! SSTable Iterator
//!
//! Two-level cursor: the index block picks a data block, the data block
//! cursor walks its entries. Data blocks are read lazily and dropped when the
//! cursor leaves them.

use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::iterator::InternalIterator;

use super::{BlockHandle, BlockIterator, SSTableReader};

/// Iterator over SSTable entries in internal key order
pub struct SSTableIterator {
    reader: Arc<SSTableReader>,
    verify_checksums: bool,
    index_iter: BlockIterator,
    data_iter: Option<BlockIterator>,
    /// Handle of the block `data_iter` walks, to avoid re-reading it
    data_handle: Option<BlockHandle>,
    error: Option<StrataError>,
}

impl SSTableIterator {
    pub(super) fn new(reader: Arc<SSTableReader>, verify_checksums: bool) -> Self {
        let index_iter = reader.index_iter();
        Self {
            reader,
            verify_checksums,
            index_iter,
            data_iter: None,
            data_handle: None,
            error: None,
        }
    }

    /// Point `data_iter` at the block the index cursor is on
    fn init_data_block(&mut self) {
        if !self.index_iter.valid() {
            self.data_iter = None;
            self.data_handle = None;
            return;
        }

        let handle = match BlockHandle::decode(self.index_iter.value()) {
            Ok(handle) => handle,
            Err(e) => return self.fail(e),
        };
        if self.data_iter.is_some() && self.data_handle == Some(handle) {
            return;
        }

        match self.reader.read_block(&handle, self.verify_checksums) {
            Ok(block) => {
                self.data_iter = Some(block.iter(self.reader.comparator()));
                self.data_handle = Some(handle);
            }
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, error: StrataError) {
        tracing::warn!(
            path = %self.reader.path().display(),
            error = %error,
            "SSTable iteration stopped"
        );
        if self.error.is_none() {
            self.error = Some(error);
        }
        self.data_iter = None;
        self.data_handle = None;
    }

    fn check_data_status(&mut self) {
        if let Some(Err(e)) = self.data_iter.as_ref().map(|it| it.status()) {
            self.fail(e);
        }
    }

    fn data_valid(&self) -> bool {
        self.data_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn skip_empty_blocks_forward(&mut self) {
        while !self.data_valid() {
            self.check_data_status();
            if self.error.is_some() || !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.next();
            self.init_data_block();
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_blocks_backward(&mut self) {
        while !self.data_valid() {
            self.check_data_status();
            if self.error.is_some() || !self.index_iter.valid() {
                self.data_iter = None;
                return;
            }
            self.index_iter.prev();
            self.init_data_block();
            if let Some(it) = self.data_iter.as_mut() {
                it.seek_to_last();
            }
        }
    }
}

impl InternalIterator for SSTableIterator {
    fn valid(&self) -> bool {
        self.error.is_none() && self.data_valid()
    }

    fn seek_to_first(&mut self) {
        self.index_iter.seek_to_first();
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_first();
        }
        self.skip_empty_blocks_forward();
    }

    fn seek_to_last(&mut self) {
        self.index_iter.seek_to_last();
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek_to_last();
        }
        self.skip_empty_blocks_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.init_data_block();
        if let Some(it) = self.data_iter.as_mut() {
            it.seek(target);
        }
        self.skip_empty_blocks_forward();
    }

    fn next(&mut self) {
        if let Some(it) = self.data_iter.as_mut() {
            it.next();
        }
        self.skip_empty_blocks_forward();
    }

    fn prev(&mut self) {
        if let Some(it) = self.data_iter.as_mut() {
            it.prev();
        }
        self.skip_empty_blocks_backward();
    }

    fn key(&self) -> &[u8] {
        match &self.data_iter {
            Some(it) => it.key(),
            None => panic!("key() on invalid SSTableIterator"),
        }
    }

    fn value(&self) -> &[u8] {
        match &self.data_iter {
            Some(it) => it.value(),
            None => panic!("value() on invalid SSTableIterator"),
        }
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        self.index_iter.status()?;
        match &self.data_iter {
            Some(it) => it.status(),
            None => Ok(()),
        }
    }
}
