//! Filter Module
//!
//! Probabilistic "may contain" structures built per data block.
//!
//! ## Responsibilities
//! - `create_filter`: summarise the user keys destined for one data block
//! - `key_may_match`: answer "could this key be in that block?"
//!   (false positives allowed, false negatives never)
//!
//! Policies compose: a wrapping policy owns an inner policy (e.g. the built-in
//! bloom filter) and normalises keys before delegating.

mod bloom;

use std::fmt;

pub use bloom::BloomFilterPolicy;

/// Membership filter extension point
pub trait FilterPolicy: Send + Sync {
    /// Stable identity, persisted in the manifest and in each table's meta-index
    fn name(&self) -> &str;

    /// Append a filter summarising `keys` to `dst`
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Must return true for every key passed to the `create_filter` call
    /// that produced `filter`
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

impl fmt::Debug for dyn FilterPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FilterPolicy").field(&self.name()).finish()
    }
}
