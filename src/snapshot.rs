//! Snapshots
//!
//! A snapshot is a sequence number plus a pin on the Version that was current
//! when it was taken. Live snapshots are counted per sequence number so the
//! compactor can ask for the oldest one.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::keys::SequenceNumber;
use crate::version::Version;

/// Registry of live snapshot sequence numbers
#[derive(Debug, Default)]
pub(crate) struct SnapshotList {
    live: Mutex<BTreeMap<SequenceNumber, usize>>,
}

impl SnapshotList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn acquire(
        self: &Arc<Self>,
        sequence: SequenceNumber,
        version: Arc<Version>,
    ) -> Snapshot {
        *self.live.lock().entry(sequence).or_insert(0) += 1;
        Snapshot {
            sequence,
            list: Arc::clone(self),
            _version: version,
        }
    }

    fn release(&self, sequence: SequenceNumber) {
        let mut live = self.live.lock();
        if let Some(count) = live.get_mut(&sequence) {
            *count -= 1;
            if *count == 0 {
                live.remove(&sequence);
            }
        }
    }

    /// Oldest live snapshot sequence, if any
    pub(crate) fn oldest(&self) -> Option<SequenceNumber> {
        self.live.lock().keys().next().copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.live.lock().values().sum()
    }
}

/// Read-only point-in-time view handle.
///
/// Released by `Engine::release_snapshot` or by dropping it.
pub struct Snapshot {
    sequence: SequenceNumber,
    list: Arc<SnapshotList>,
    _version: Arc<Version>,
}

impl Snapshot {
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }
}

impl Drop for Snapshot {
    fn drop(&mut self) {
        self.list.release(self.sequence);
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("sequence", &self.sequence)
            .finish()
    }
}
