//! User-facing iterator
//!
//! Wraps the merged internal stream and turns it into a view of user keys at
//! one sequence number: entries newer than the ceiling are invisible, only the
//! newest visible version of each key is yielded, and keys whose newest
//! visible version is a tombstone are skipped.
//!
//! Moving forward, the merged cursor sits on the entry being yielded. Moving
//! backward, it sits just before all entries of the yielded key and the
//! key/value are held in `saved_key` / `saved_value`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Result, StrataError};
use crate::keys::{
    extract_user_key, parse_internal_key, seek_key, Comparator, SequenceNumber, ValueType,
};
use crate::version::Version;

use super::InternalIterator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// Ordered cursor over the database as of one sequence number
pub struct DbIterator {
    iter: Box<dyn InternalIterator>,
    ucmp: Arc<dyn Comparator>,
    sequence: SequenceNumber,
    direction: Direction,
    valid: bool,
    saved_key: Vec<u8>,
    saved_value: Vec<u8>,
    error: Option<StrataError>,
    /// Keeps every table file the merged cursor may touch from being deleted
    _version: Arc<Version>,
}

impl DbIterator {
    pub(crate) fn new(
        iter: Box<dyn InternalIterator>,
        ucmp: Arc<dyn Comparator>,
        sequence: SequenceNumber,
        version: Arc<Version>,
    ) -> Self {
        Self {
            iter,
            ucmp,
            sequence,
            direction: Direction::Forward,
            valid: false,
            saved_key: Vec::new(),
            saved_value: Vec::new(),
            error: None,
            _version: version,
        }
    }

    pub fn valid(&self) -> bool {
        self.valid
    }

    pub fn seek_to_first(&mut self) {
        self.direction = Direction::Forward;
        self.saved_value.clear();
        self.iter.seek_to_first();
        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn seek_to_last(&mut self) {
        self.direction = Direction::Reverse;
        self.saved_value.clear();
        self.iter.seek_to_last();
        self.find_prev_user_entry();
    }

    /// Position at the first key >= `target`
    pub fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Forward;
        self.saved_key.clear();
        self.saved_value.clear();
        self.iter.seek(&seek_key(target, self.sequence));
        if self.iter.valid() {
            self.find_next_user_entry(false);
        } else {
            self.valid = false;
        }
    }

    pub fn next(&mut self) {
        if !self.valid {
            return;
        }

        if self.direction == Direction::Reverse {
            // The merged cursor is before every entry of saved_key; step onto
            // them and let find_next_user_entry skip past.
            self.direction = Direction::Forward;
            if self.iter.valid() {
                self.iter.next();
            } else {
                self.iter.seek_to_first();
            }
        } else {
            self.saved_key.clear();
            self.saved_key
                .extend_from_slice(extract_user_key(self.iter.key()));
            self.iter.next();
        }

        if !self.iter.valid() {
            self.valid = false;
            self.saved_key.clear();
            return;
        }
        self.find_next_user_entry(true);
    }

    pub fn prev(&mut self) {
        if !self.valid {
            return;
        }

        if self.direction == Direction::Forward {
            // Walk back to the last entry of the previous user key
            self.saved_key.clear();
            self.saved_key
                .extend_from_slice(extract_user_key(self.iter.key()));
            loop {
                self.iter.prev();
                if !self.iter.valid() {
                    self.valid = false;
                    self.saved_key.clear();
                    self.saved_value.clear();
                    return;
                }
                let user_key = extract_user_key(self.iter.key());
                if self.ucmp.compare(user_key, &self.saved_key) == Ordering::Less {
                    break;
                }
            }
            self.direction = Direction::Reverse;
        }

        self.find_prev_user_entry();
    }

    /// Current user key
    pub fn key(&self) -> &[u8] {
        assert!(self.valid, "key() on invalid DbIterator");
        match self.direction {
            Direction::Forward => extract_user_key(self.iter.key()),
            Direction::Reverse => &self.saved_key,
        }
    }

    /// Current value
    pub fn value(&self) -> &[u8] {
        assert!(self.valid, "value() on invalid DbIterator");
        match self.direction {
            Direction::Forward => self.iter.value(),
            Direction::Reverse => &self.saved_value,
        }
    }

    /// First error seen by this iterator or any of its sources
    pub fn status(&self) -> Result<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => self.iter.status(),
        }
    }

    fn corrupted(&mut self) {
        self.error = Some(StrataError::Corruption(
            "malformed internal key in iterator".into(),
        ));
        self.valid = false;
        self.saved_key.clear();
        self.saved_value.clear();
    }

    /// Advance to the first visible, live entry. When `skipping`, entries for
    /// user keys <= saved_key are hidden.
    fn find_next_user_entry(&mut self, mut skipping: bool) {
        debug_assert_eq!(self.direction, Direction::Forward);
        while self.iter.valid() {
            let Some(parsed) = parse_internal_key(self.iter.key()) else {
                self.corrupted();
                return;
            };
            if parsed.sequence <= self.sequence {
                match parsed.value_type {
                    ValueType::Deletion => {
                        // Hide every older entry of this key
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(parsed.user_key);
                        skipping = true;
                    }
                    ValueType::Value => {
                        let hidden = skipping
                            && self.ucmp.compare(parsed.user_key, &self.saved_key)
                                != Ordering::Greater;
                        if !hidden {
                            self.valid = true;
                            self.saved_key.clear();
                            return;
                        }
                    }
                }
            }
            self.iter.next();
        }
        self.saved_key.clear();
        self.valid = false;
    }

    /// Walk backwards collecting the newest visible entry of the previous
    /// user key into saved_key / saved_value.
    fn find_prev_user_entry(&mut self) {
        debug_assert_eq!(self.direction, Direction::Reverse);
        let mut value_type = ValueType::Deletion;
        while self.iter.valid() {
            let Some(parsed) = parse_internal_key(self.iter.key()) else {
                self.corrupted();
                return;
            };
            if parsed.sequence <= self.sequence {
                if value_type != ValueType::Deletion
                    && self.ucmp.compare(parsed.user_key, &self.saved_key) == Ordering::Less
                {
                    // Crossed into an earlier key
                    break;
                }
                value_type = parsed.value_type;
                match value_type {
                    ValueType::Deletion => {
                        self.saved_key.clear();
                        self.saved_value.clear();
                    }
                    ValueType::Value => {
                        self.saved_key.clear();
                        self.saved_key.extend_from_slice(parsed.user_key);
                        self.saved_value.clear();
                        self.saved_value.extend_from_slice(self.iter.value());
                    }
                }
            }
            self.iter.prev();
        }

        if value_type == ValueType::Deletion {
            // Ran off the front
            self.valid = false;
            self.saved_key.clear();
            self.saved_value.clear();
            self.direction = Direction::Forward;
        } else {
            self.valid = true;
        }
    }
}
