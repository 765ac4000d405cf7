//! Write Batch
//!
//! An ordered list of Put/Delete operations applied atomically: the whole batch
//! is one WAL record and receives one contiguous range of sequence numbers.

use crate::wal::Operation;

/// Per-operation bookkeeping overhead used by `approximate_size`
const OPERATION_OVERHEAD: usize = 16;

/// Atomic group of writes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    operations: Vec<Operation>,
    approximate_size: usize,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put
    pub fn put(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> &mut Self {
        let key = key.as_ref().to_vec();
        let value = value.as_ref().to_vec();
        self.approximate_size += key.len() + value.len() + OPERATION_OVERHEAD;
        self.operations.push(Operation::Put { key, value });
        self
    }

    /// Queue a delete
    pub fn delete(&mut self, key: impl AsRef<[u8]>) -> &mut Self {
        let key = key.as_ref().to_vec();
        self.approximate_size += key.len() + OPERATION_OVERHEAD;
        self.operations.push(Operation::Delete { key });
        self
    }

    /// Append all operations of `other`, preserving order
    pub fn append(&mut self, other: WriteBatch) -> &mut Self {
        self.approximate_size += other.approximate_size;
        self.operations.extend(other.operations);
        self
    }

    pub fn clear(&mut self) {
        self.operations.clear();
        self.approximate_size = 0;
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Rough encoded size in bytes
    pub fn approximate_size(&self) -> usize {
        self.approximate_size
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.operations
    }
}
