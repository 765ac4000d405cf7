//! Keys Module
//!
//! Internal key encoding and the ordering extension point.
//!
//! ## Internal Key Format
//! ```text
//! ┌──────────────────────┬──────────────────────────────────┐
//! │ User Key (variable)  │ Tag: u64 LE = (sequence << 8) | kind │
//! └──────────────────────┴──────────────────────────────────┘
//! ```
//!
//! Internal keys sort by user key ascending (user comparator), then by tag
//! descending, so the newest version of a key comes first among duplicates.

mod comparator;

pub use comparator::{BytewiseComparator, Comparator, InternalKeyComparator};

/// Global write ordinal
pub type SequenceNumber = u64;

/// Sequence numbers share a u64 with the 8-bit kind
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1 << 56) - 1;

/// Size of the tag appended to every user key
pub const TAG_SIZE: usize = 8;

/// Kind of an internal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueType {
    /// Tombstone
    Deletion = 0,
    /// Live value
    Value = 1,
}

/// Seek targets use the highest kind so they sort before every entry
/// with the same user key and sequence.
pub(crate) const VALUE_TYPE_FOR_SEEK: ValueType = ValueType::Value;

impl ValueType {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

pub(crate) fn pack_tag(sequence: SequenceNumber, value_type: ValueType) -> u64 {
    debug_assert!(sequence <= MAX_SEQUENCE_NUMBER);
    (sequence << 8) | value_type as u64
}

/// Append an encoded internal key to `buf`
pub fn append_internal_key(
    buf: &mut Vec<u8>,
    user_key: &[u8],
    sequence: SequenceNumber,
    value_type: ValueType,
) {
    buf.extend_from_slice(user_key);
    buf.extend_from_slice(&pack_tag(sequence, value_type).to_le_bytes());
}

/// Build an encoded internal key
pub fn make_internal_key(user_key: &[u8], sequence: SequenceNumber, value_type: ValueType) -> Vec<u8> {
    let mut buf = Vec::with_capacity(user_key.len() + TAG_SIZE);
    append_internal_key(&mut buf, user_key, sequence, value_type);
    buf
}

/// Internal key used to position at the newest entry visible at `sequence`
pub fn seek_key(user_key: &[u8], sequence: SequenceNumber) -> Vec<u8> {
    make_internal_key(user_key, sequence, VALUE_TYPE_FOR_SEEK)
}

/// User-key portion of an internal key.
///
/// Callers must pass a well-formed internal key (at least `TAG_SIZE` bytes).
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    debug_assert!(internal_key.len() >= TAG_SIZE);
    &internal_key[..internal_key.len() - TAG_SIZE]
}

pub(crate) fn extract_tag(internal_key: &[u8]) -> u64 {
    let n = internal_key.len();
    let mut tag = [0u8; TAG_SIZE];
    tag.copy_from_slice(&internal_key[n - TAG_SIZE..]);
    u64::from_le_bytes(tag)
}

/// Decoded view of an internal key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

/// Parse an internal key; `None` if it is too short or carries an unknown kind
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < TAG_SIZE {
        return None;
    }
    let tag = extract_tag(internal_key);
    let value_type = ValueType::from_u8((tag & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: extract_user_key(internal_key),
        sequence: tag >> 8,
        value_type,
    })
}
