//! Concatenating cursor over the sorted, disjoint files of one level.
//! Only the file under the cursor is open.

use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::iterator::InternalIterator;
use crate::keys::InternalKeyComparator;
use crate::storage::{SSTableIterator, TableCache};

use super::{find_file, FileMetaData};

pub struct LevelIterator {
    table_cache: Arc<TableCache>,
    icmp: Arc<InternalKeyComparator>,
    files: Vec<Arc<FileMetaData>>,
    verify_checksums: bool,
    /// Index into `files` of the open table
    file_index: Option<usize>,
    file_iter: Option<SSTableIterator>,
    error: Option<StrataError>,
}

impl LevelIterator {
    pub fn new(
        table_cache: Arc<TableCache>,
        icmp: Arc<InternalKeyComparator>,
        files: Vec<Arc<FileMetaData>>,
        verify_checksums: bool,
    ) -> Self {
        Self {
            table_cache,
            icmp,
            files,
            verify_checksums,
            file_index: None,
            file_iter: None,
            error: None,
        }
    }

    fn open_file(&mut self, index: Option<usize>) {
        let index = index.filter(|i| *i < self.files.len());
        if index.is_some() && index == self.file_index && self.file_iter.is_some() {
            return;
        }
        self.file_index = index;
        self.file_iter = None;

        let Some(index) = index else { return };
        let file = &self.files[index];
        match self
            .table_cache
            .new_iterator(file.number, file.file_size, self.verify_checksums)
        {
            Ok(it) => self.file_iter = Some(it),
            Err(e) => {
                tracing::warn!(file = file.number, error = %e, "Failed to open table for iteration");
                self.error.get_or_insert(e);
                self.file_index = None;
            }
        }
    }

    fn file_valid(&self) -> bool {
        self.file_iter.as_ref().is_some_and(|it| it.valid())
    }

    fn check_file_status(&mut self) {
        if let Some(Err(e)) = self.file_iter.as_ref().map(|it| it.status()) {
            self.error.get_or_insert(e);
            self.file_iter = None;
            self.file_index = None;
        }
    }

    fn skip_empty_files_forward(&mut self) {
        while !self.file_valid() {
            self.check_file_status();
            let next = match self.file_index {
                Some(i) if self.error.is_none() && i + 1 < self.files.len() => i + 1,
                _ => {
                    self.file_iter = None;
                    self.file_index = None;
                    return;
                }
            };
            self.open_file(Some(next));
            if let Some(it) = self.file_iter.as_mut() {
                it.seek_to_first();
            }
        }
    }

    fn skip_empty_files_backward(&mut self) {
        while !self.file_valid() {
            self.check_file_status();
            let prev = match self.file_index {
                Some(i) if self.error.is_none() && i > 0 => i - 1,
                _ => {
                    self.file_iter = None;
                    self.file_index = None;
                    return;
                }
            };
            self.open_file(Some(prev));
            if let Some(it) = self.file_iter.as_mut() {
                it.seek_to_last();
            }
        }
    }
}

impl InternalIterator for LevelIterator {
    fn valid(&self) -> bool {
        self.error.is_none() && self.file_valid()
    }

    fn seek_to_first(&mut self) {
        self.open_file(Some(0));
        if let Some(it) = self.file_iter.as_mut() {
            it.seek_to_first();
        }
        self.skip_empty_files_forward();
    }

    fn seek_to_last(&mut self) {
        self.open_file(self.files.len().checked_sub(1));
        if let Some(it) = self.file_iter.as_mut() {
            it.seek_to_last();
        }
        self.skip_empty_files_backward();
    }

    fn seek(&mut self, target: &[u8]) {
        let index = find_file(&self.icmp, &self.files, target);
        self.open_file(Some(index));
        if let Some(it) = self.file_iter.as_mut() {
            it.seek(target);
        }
        self.skip_empty_files_forward();
    }

    fn next(&mut self) {
        if let Some(it) = self.file_iter.as_mut() {
            it.next();
        }
        self.skip_empty_files_forward();
    }

    fn prev(&mut self) {
        if let Some(it) = self.file_iter.as_mut() {
            it.prev();
        }
        self.skip_empty_files_backward();
    }

    fn key(&self) -> &[u8] {
        match &self.file_iter {
            Some(it) => it.key(),
            None => panic!("key() on invalid LevelIterator"),
        }
    }

    fn value(&self) -> &[u8] {
        match &self.file_iter {
            Some(it) => it.value(),
            None => panic!("value() on invalid LevelIterator"),
        }
    }

    fn status(&self) -> Result<()> {
        if let Some(e) = &self.error {
            return Err(e.clone());
        }
        match &self.file_iter {
            Some(it) => it.status(),
            None => Ok(()),
        }
    }
}
