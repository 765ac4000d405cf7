//! Filter block
//!
//! One filter per data block, in data block order:
//! ```text
//! [filter 0] ... [filter n-1] [off 0: u32] ... [off n-1: u32] [array start: u32]
//! ```

use std::sync::Arc;

use bytes::{Buf, BufMut};

use crate::filter::FilterPolicy;

const U32_SIZE: usize = 4;

pub(crate) struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    /// Flattened keys of the data block currently being built
    keys: Vec<u8>,
    starts: Vec<usize>,
    result: Vec<u8>,
    offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub(crate) fn new(policy: Arc<dyn FilterPolicy>) -> Self {
        Self {
            policy,
            keys: Vec::new(),
            starts: Vec::new(),
            result: Vec::new(),
            offsets: Vec::new(),
        }
    }

    pub(crate) fn add_key(&mut self, user_key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(user_key);
    }

    /// Seal the filter for the data block that was just written
    pub(crate) fn finish_block(&mut self) {
        self.offsets.push(self.result.len() as u32);

        let mut keys: Vec<&[u8]> = Vec::with_capacity(self.starts.len());
        for (i, start) in self.starts.iter().enumerate() {
            let end = self.starts.get(i + 1).copied().unwrap_or(self.keys.len());
            keys.push(&self.keys[*start..end]);
        }
        if !keys.is_empty() {
            self.policy.create_filter(&keys, &mut self.result);
        }

        self.keys.clear();
        self.starts.clear();
    }

    pub(crate) fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub(crate) fn finish(mut self) -> Vec<u8> {
        let array_start = self.result.len() as u32;
        for offset in &self.offsets {
            self.result.put_u32_le(*offset);
        }
        self.result.put_u32_le(array_start);
        self.result
    }
}

pub(crate) struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    data: Vec<u8>,
    array_start: usize,
    num_filters: usize,
}

impl FilterBlockReader {
    /// `None` when the contents are not a well-formed filter block
    pub(crate) fn new(policy: Arc<dyn FilterPolicy>, data: Vec<u8>) -> Option<Self> {
        if data.len() < U32_SIZE {
            return None;
        }
        let mut tail = &data[data.len() - U32_SIZE..];
        let array_start = tail.get_u32_le() as usize;
        if array_start > data.len() - U32_SIZE {
            return None;
        }
        let num_filters = (data.len() - U32_SIZE - array_start) / U32_SIZE;
        Some(Self {
            policy,
            data,
            array_start,
            num_filters,
        })
    }

    fn offset(&self, index: usize) -> usize {
        let mut pos = &self.data[self.array_start + index * U32_SIZE..];
        pos.get_u32_le() as usize
    }

    /// May data block `block_index` hold `user_key`? Errs towards true.
    pub(crate) fn key_may_match(&self, block_index: usize, user_key: &[u8]) -> bool {
        if block_index >= self.num_filters {
            return true;
        }
        let start = self.offset(block_index);
        let limit = if block_index + 1 < self.num_filters {
            self.offset(block_index + 1)
        } else {
            self.array_start
        };
        if start > limit || limit > self.array_start {
            return true;
        }
        if start == limit {
            // Empty filter: the block had no keys
            return false;
        }
        self.policy.key_may_match(user_key, &self.data[start..limit])
    }
}
