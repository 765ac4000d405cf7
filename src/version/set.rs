//! Version Set
//!
//! Owns the current Version, the manifest writer, and the engine-wide
//! counters (next file number, last sequence, live log number).
//!
//! ## Manifest Protocol
//! 1. Every open writes a fresh manifest: a snapshot edit of the recovered
//!    Version followed by the edits applied during this session.
//! 2. `CURRENT` is switched to a new manifest (temp file + rename) only after
//!    its first record is synced.
//! 3. A Version becomes current only after its edit is synced.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::compaction::Compaction;
use crate::config::{Config, WalSyncStrategy};
use crate::error::{Result, StrataError};
use crate::iterator::{InternalIterator, MergingIterator};
use crate::keys::{extract_user_key, Comparator, InternalKeyComparator, SequenceNumber};
use crate::storage::filename::{manifest_file_path, read_current_file, set_current_file};
use crate::storage::TableCache;
use crate::wal::{WalReader, WalWriter};

use super::{total_file_size, FileMetaData, LevelIterator, Version, VersionEdit};

/// Accumulates edits on top of a base Version
struct Builder<'a> {
    icmp: &'a InternalKeyComparator,
    base: Arc<Version>,
    deleted: Vec<BTreeSet<u64>>,
    added: Vec<Vec<Arc<FileMetaData>>>,
}

impl<'a> Builder<'a> {
    fn new(icmp: &'a InternalKeyComparator, base: Arc<Version>) -> Self {
        let levels = base.num_levels();
        Self {
            icmp,
            base,
            deleted: vec![BTreeSet::new(); levels],
            added: vec![Vec::new(); levels],
        }
    }

    fn apply(&mut self, edit: &VersionEdit) -> Result<()> {
        let levels = self.deleted.len();
        for &(level, number) in &edit.deleted_files {
            if level >= levels {
                return Err(StrataError::Corruption(format!("edit deletes from level {}", level)));
            }
            self.deleted[level].insert(number);
            self.added[level].retain(|f| f.number != number);
        }
        for (level, file) in &edit.new_files {
            if *level >= levels {
                return Err(StrataError::Corruption(format!("edit adds to level {}", level)));
            }
            self.deleted[*level].remove(&file.number);
            self.added[*level].push(Arc::new(file.clone()));
        }
        Ok(())
    }

    fn save_to(&self, version: &mut Version) {
        for level in 0..self.deleted.len() {
            let mut files: Vec<Arc<FileMetaData>> = self
                .base
                .files(level)
                .iter()
                .chain(self.added[level].iter())
                .filter(|f| !self.deleted[level].contains(&f.number))
                .cloned()
                .collect();

            if level == 0 {
                files.sort_by_key(|f| f.number);
            } else {
                files.sort_by(|a, b| self.icmp.compare(&a.smallest, &b.smallest));
                debug_assert!(
                    files
                        .windows(2)
                        .all(|w| self.icmp.compare(&w[0].largest, &w[1].smallest).is_lt()),
                    "overlapping files in level {}",
                    level
                );
            }
            version.set_files(level, files);
        }
    }
}

pub struct VersionSet {
    dir: PathBuf,
    config: Config,
    icmp: Arc<InternalKeyComparator>,
    table_cache: Arc<TableCache>,

    next_file_number: AtomicU64,
    manifest_file_number: AtomicU64,
    last_sequence: AtomicU64,
    log_number: AtomicU64,
    prev_log_number: AtomicU64,

    current: RwLock<Arc<Version>>,
    /// Every Version ever installed; dead entries are pruned on install
    live: Mutex<Vec<Weak<Version>>>,
    /// Held for the whole of `log_and_apply`, which serializes appliers
    manifest: Mutex<Option<WalWriter>>,
    /// Per level: where the next size compaction starts
    compact_pointers: Mutex<Vec<Vec<u8>>>,
}

impl VersionSet {
    pub fn new(dir: &Path, config: &Config, icmp: Arc<InternalKeyComparator>, table_cache: Arc<TableCache>) -> Self {
        let empty = Arc::new(Version::new(Arc::clone(&icmp), config.max_levels));
        Self {
            dir: dir.to_path_buf(),
            config: config.clone(),
            icmp,
            table_cache,
            next_file_number: AtomicU64::new(2),
            manifest_file_number: AtomicU64::new(0),
            last_sequence: AtomicU64::new(0),
            log_number: AtomicU64::new(0),
            prev_log_number: AtomicU64::new(0),
            live: Mutex::new(vec![Arc::downgrade(&empty)]),
            current: RwLock::new(empty),
            manifest: Mutex::new(None),
            compact_pointers: Mutex::new(vec![Vec::new(); config.max_levels]),
        }
    }

    // =========================================================================
    // Create / Recover
    // =========================================================================

    /// Write the initial manifest of a brand-new database
    pub fn create_new(&self) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        if let Some(policy) = &self.config.filter_policy {
            edit.set_filter_policy_name(policy.name());
        }
        edit.set_log_number(0);
        edit.set_next_file_number(2);
        edit.set_last_sequence(0);

        let path = manifest_file_path(&self.dir, 1);
        let result = (|| -> Result<()> {
            let mut writer = WalWriter::create(&path, WalSyncStrategy::OnRequest)?;
            writer.add_record(&edit.encode()?)?;
            writer.sync()?;
            set_current_file(&self.dir, 1)
        })();

        if result.is_err() {
            let _ = fs::remove_file(&path);
        }
        result
    }

    /// Rebuild the current Version from the manifest named by CURRENT
    pub fn recover(&self) -> Result<()> {
        let name = read_current_file(&self.dir)?;
        let path = self.dir.join(&name);
        let mut reader = WalReader::open(&path).map_err(|e| match e {
            StrataError::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                StrataError::Corruption(format!("CURRENT points to missing {}", name))
            }
            other => other,
        })?;

        let base = Arc::new(Version::new(Arc::clone(&self.icmp), self.config.max_levels));
        let mut builder = Builder::new(&self.icmp, base);
        let mut log_number = None;
        let mut prev_log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut edits = 0u64;

        loop {
            let record = match reader.next_record() {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) if !self.config.paranoid_checks && e.is_corruption() => {
                    tracing::warn!(manifest = %name, error = %e, "Ignoring torn manifest tail");
                    break;
                }
                Err(e) => return Err(e),
            };
            let edit = VersionEdit::decode(&record)?;
            self.check_identity(&edit)?;
            builder.apply(&edit)?;

            for (level, key) in &edit.compact_pointers {
                if let Some(slot) = self.compact_pointers.lock().get_mut(*level) {
                    *slot = key.clone();
                }
            }
            log_number = edit.log_number.or(log_number);
            prev_log_number = edit.prev_log_number.or(prev_log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
            edits += 1;
        }

        let missing = |what: &str| StrataError::Corruption(format!("manifest has no {} entry", what));
        let next_file_number = next_file_number.ok_or_else(|| missing("next-file"))?;
        let log_number = log_number.ok_or_else(|| missing("log-number"))?;
        let last_sequence = last_sequence.ok_or_else(|| missing("last-sequence"))?;
        let prev_log_number = prev_log_number.unwrap_or(0);

        let mut version = Version::new(Arc::clone(&self.icmp), self.config.max_levels);
        builder.save_to(&mut version);
        version.finalize(&self.config);

        self.next_file_number.store(next_file_number, AtomicOrdering::SeqCst);
        self.mark_file_number_used(log_number);
        self.mark_file_number_used(prev_log_number);
        for level in 0..version.num_levels() {
            for file in version.files(level) {
                self.mark_file_number_used(file.number);
            }
        }

        // This session writes a new manifest on its first log_and_apply
        self.manifest_file_number
            .store(self.new_file_number(), AtomicOrdering::SeqCst);
        self.last_sequence.store(last_sequence, AtomicOrdering::SeqCst);
        self.log_number.store(log_number, AtomicOrdering::SeqCst);
        self.prev_log_number.store(prev_log_number, AtomicOrdering::SeqCst);

        tracing::info!(
            manifest = %name,
            edits,
            last_sequence,
            log_number,
            levels = %version.level_summary(),
            "Recovered version set"
        );
        self.install(Arc::new(version));
        Ok(())
    }

    fn check_identity(&self, edit: &VersionEdit) -> Result<()> {
        if let Some(name) = &edit.comparator {
            let ours = self.icmp.user_comparator().name();
            if name != ours {
                return Err(StrataError::InvalidArgument(format!(
                    "comparator {} does not match existing comparator {}",
                    ours, name
                )));
            }
        }
        if let (Some(name), Some(policy)) = (&edit.filter_policy, &self.config.filter_policy) {
            if name != policy.name() {
                return Err(StrataError::InvalidArgument(format!(
                    "filter policy {} does not match existing filter policy {}",
                    policy.name(),
                    name
                )));
            }
        }
        Ok(())
    }

    // =========================================================================
    // Apply
    // =========================================================================

    /// Log `edit` to the manifest and make the resulting Version current
    pub fn log_and_apply(&self, edit: &mut VersionEdit) -> Result<Arc<Version>> {
        let mut manifest = self.manifest.lock();

        match edit.log_number {
            Some(number) => debug_assert!(
                number >= self.log_number() && number < self.next_file_number.load(AtomicOrdering::SeqCst),
                "log number {} out of range",
                number
            ),
            None => edit.set_log_number(self.log_number()),
        }
        if edit.prev_log_number.is_none() {
            edit.set_prev_log_number(self.prev_log_number());
        }
        edit.set_next_file_number(self.next_file_number.load(AtomicOrdering::SeqCst));
        edit.set_last_sequence(self.last_sequence());

        let base = self.current();
        let mut version = Version::new(Arc::clone(&self.icmp), self.config.max_levels);
        let mut builder = Builder::new(&self.icmp, Arc::clone(&base));
        builder.apply(edit)?;
        builder.save_to(&mut version);
        version.finalize(&self.config);

        // First apply of the session starts a new manifest
        let mut created = None;
        if manifest.is_none() {
            let number = self.manifest_file_number.load(AtomicOrdering::SeqCst);
            let path = manifest_file_path(&self.dir, number);
            let started = WalWriter::create(&path, WalSyncStrategy::OnRequest)
                .and_then(|mut writer| {
                    self.write_snapshot(&mut writer, &base)?;
                    Ok(writer)
                });
            match started {
                Ok(writer) => {
                    *manifest = Some(writer);
                    created = Some((number, path));
                }
                Err(e) => {
                    let _ = fs::remove_file(&path);
                    return Err(e);
                }
            }
        }

        let result = (|| -> Result<()> {
            let writer = manifest
                .as_mut()
                .ok_or_else(|| StrataError::Corruption("manifest writer missing".into()))?;
            writer.add_record(&edit.encode()?)?;
            writer.sync()?;
            if let Some((number, _)) = &created {
                set_current_file(&self.dir, *number)?;
            }
            Ok(())
        })();

        if let Err(e) = result {
            tracing::error!(error = %e, "Manifest write failed");
            *manifest = None;
            if let Some((_, path)) = created {
                let _ = fs::remove_file(path);
            }
            return Err(e);
        }

        if let Some(number) = edit.log_number {
            self.log_number.store(number, AtomicOrdering::SeqCst);
        }
        if let Some(number) = edit.prev_log_number {
            self.prev_log_number.store(number, AtomicOrdering::SeqCst);
        }

        let version = Arc::new(version);
        self.install(Arc::clone(&version));
        Ok(version)
    }

    /// Full description of `version` as a single edit
    fn write_snapshot(&self, writer: &mut WalWriter, version: &Version) -> Result<()> {
        let mut edit = VersionEdit::new();
        edit.set_comparator_name(self.icmp.user_comparator().name());
        if let Some(policy) = &self.config.filter_policy {
            edit.set_filter_policy_name(policy.name());
        }
        for (level, key) in self.compact_pointers.lock().iter().enumerate() {
            if !key.is_empty() {
                edit.set_compact_pointer(level, key.clone());
            }
        }
        for level in 0..version.num_levels() {
            for file in version.files(level) {
                edit.add_file(level, (**file).clone());
            }
        }
        writer.add_record(&edit.encode()?)?;
        Ok(())
    }

    fn install(&self, version: Arc<Version>) {
        let mut live = self.live.lock();
        live.retain(|v| v.strong_count() > 0);
        live.push(Arc::downgrade(&version));
        *self.current.write() = version;
    }

    // =========================================================================
    // Compaction Picking
    // =========================================================================

    pub fn needs_compaction(&self) -> bool {
        self.current().compaction_score() >= 1.0
    }

    /// Size-triggered compaction of the level that most needs it
    pub fn pick_compaction(&self) -> Option<Compaction> {
        let current = self.current();
        if current.compaction_score() < 1.0 {
            return None;
        }
        let level = current.compaction_level();
        debug_assert!(level + 1 < current.num_levels());

        let mut c = Compaction::new(level, Arc::clone(&current), &self.config);
        {
            // First file past this level's compaction pointer, wrapping around
            let pointers = self.compact_pointers.lock();
            let pointer = &pointers[level];
            let picked = current
                .files(level)
                .iter()
                .find(|f| pointer.is_empty() || self.icmp.compare(&f.largest, pointer).is_gt())
                .or_else(|| current.files(level).first())?;
            c.inputs[0].push(Arc::clone(picked));
        }

        if level == 0 {
            // Level-0 files overlap: take every file touching the picked range
            let (smallest, largest) = self.key_range(&c.inputs[0]);
            c.inputs[0] = current.get_overlapping_inputs(
                0,
                Some(extract_user_key(&smallest)),
                Some(extract_user_key(&largest)),
            );
            debug_assert!(!c.inputs[0].is_empty());
        }

        self.setup_other_inputs(&mut c);
        Some(c)
    }

    /// Compaction of `level` files overlapping the user-key range, or `None`
    /// if nothing overlaps
    pub fn compact_range(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Option<Compaction> {
        let current = self.current();
        if level + 1 >= current.num_levels() {
            return None;
        }
        let mut inputs = current.get_overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }

        // Bound the work per round; level 0 cannot be split because its
        // files overlap
        if level > 0 {
            let mut total = 0;
            for i in 0..inputs.len() {
                total += inputs[i].file_size;
                if total >= self.config.max_file_size {
                    inputs.truncate(i + 1);
                    break;
                }
            }
        }

        let mut c = Compaction::new(level, current, &self.config);
        c.inputs[0] = inputs;
        self.setup_other_inputs(&mut c);
        Some(c)
    }

    fn setup_other_inputs(&self, c: &mut Compaction) {
        let level = c.level;
        let current = Arc::clone(&c.input_version);

        self.add_boundary_inputs(&current, level, &mut c.inputs[0]);
        let (smallest, mut largest) = self.key_range(&c.inputs[0]);
        c.inputs[1] = current.get_overlapping_inputs(
            level + 1,
            Some(extract_user_key(&smallest)),
            Some(extract_user_key(&largest)),
        );
        let (mut all_start, mut all_limit) = self.key_range_of_both(&c.inputs[0], &c.inputs[1]);

        // Grow the level inputs if that does not pull in more next-level files
        if !c.inputs[1].is_empty() {
            let mut expanded0 = current.get_overlapping_inputs(
                level,
                Some(extract_user_key(&all_start)),
                Some(extract_user_key(&all_limit)),
            );
            self.add_boundary_inputs(&current, level, &mut expanded0);
            let inputs1_size = total_file_size(&c.inputs[1]);
            let expanded0_size = total_file_size(&expanded0);

            if expanded0.len() > c.inputs[0].len()
                && inputs1_size + expanded0_size < 25 * self.config.max_file_size
            {
                let (new_start, new_limit) = self.key_range(&expanded0);
                let expanded1 = current.get_overlapping_inputs(
                    level + 1,
                    Some(extract_user_key(&new_start)),
                    Some(extract_user_key(&new_limit)),
                );
                if expanded1.len() == c.inputs[1].len() {
                    tracing::debug!(
                        level,
                        from_inputs = c.inputs[0].len(),
                        to_inputs = expanded0.len(),
                        next_level_inputs = expanded1.len(),
                        "Expanding compaction inputs"
                    );
                    largest = new_limit;
                    c.inputs[0] = expanded0;
                    c.inputs[1] = expanded1;
                    let (s, l) = self.key_range_of_both(&c.inputs[0], &c.inputs[1]);
                    all_start = s;
                    all_limit = l;
                }
            }
        }

        if level + 2 < current.num_levels() {
            c.grandparents = current.get_overlapping_inputs(
                level + 2,
                Some(extract_user_key(&all_start)),
                Some(extract_user_key(&all_limit)),
            );
        }

        // Advance the pointer now so a failed compaction retries elsewhere
        self.compact_pointers.lock()[level] = largest.clone();
        c.edit.set_compact_pointer(level, largest);
    }

    /// Pull in files at `level` that start with the same user key the inputs
    /// end with; splitting one user key across a compaction boundary would
    /// let an older version outlive a newer one.
    fn add_boundary_inputs(&self, version: &Version, level: usize, inputs: &mut Vec<Arc<FileMetaData>>) {
        if inputs.is_empty() {
            return;
        }
        let Some(mut largest) = inputs
            .iter()
            .max_by(|a, b| self.icmp.compare(&a.largest, &b.largest))
            .map(|f| f.largest.clone())
        else {
            return;
        };

        loop {
            let boundary = version
                .files(level)
                .iter()
                .filter(|f| {
                    self.icmp.compare(&f.smallest, &largest).is_gt()
                        && self
                            .icmp
                            .compare_user(extract_user_key(&f.smallest), extract_user_key(&largest))
                            .is_eq()
                })
                .min_by(|a, b| self.icmp.compare(&a.smallest, &b.smallest));
            match boundary {
                Some(file) => {
                    largest = file.largest.clone();
                    inputs.push(Arc::clone(file));
                }
                None => break,
            }
        }
    }

    fn key_range(&self, files: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
        let smallest = files
            .iter()
            .min_by(|a, b| self.icmp.compare(&a.smallest, &b.smallest))
            .map(|f| f.smallest.clone())
            .unwrap_or_default();
        let largest = files
            .iter()
            .max_by(|a, b| self.icmp.compare(&a.largest, &b.largest))
            .map(|f| f.largest.clone())
            .unwrap_or_default();
        (smallest, largest)
    }

    fn key_range_of_both(&self, a: &[Arc<FileMetaData>], b: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
        let all: Vec<Arc<FileMetaData>> = a.iter().chain(b.iter()).cloned().collect();
        self.key_range(&all)
    }

    /// Merged cursor over every input of `c`
    pub fn make_input_iterator(&self, c: &Compaction) -> Result<MergingIterator> {
        let verify = self.config.paranoid_checks;
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        for (which, files) in c.inputs.iter().enumerate() {
            if files.is_empty() {
                continue;
            }
            if c.level + which == 0 {
                for file in files {
                    children.push(Box::new(self.table_cache.new_iterator(file.number, file.file_size, verify)?));
                }
            } else {
                children.push(Box::new(LevelIterator::new(
                    Arc::clone(&self.table_cache),
                    Arc::clone(&self.icmp),
                    files.clone(),
                    verify,
                )));
            }
        }
        Ok(MergingIterator::new(Arc::clone(&self.icmp), children))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Table files referenced by any Version still alive
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live_files = HashSet::new();
        let current = self.current();
        let versions: Vec<Arc<Version>> = self
            .live
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .chain(std::iter::once(current))
            .collect();
        for version in versions {
            for level in 0..version.num_levels() {
                live_files.extend(version.files(level).iter().map(|f| f.number));
            }
        }
        live_files
    }

    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, AtomicOrdering::SeqCst)
    }

    pub fn mark_file_number_used(&self, number: u64) {
        self.next_file_number
            .fetch_max(number + 1, AtomicOrdering::SeqCst);
    }

    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(AtomicOrdering::Acquire)
    }

    pub fn set_last_sequence(&self, sequence: SequenceNumber) {
        debug_assert!(sequence >= self.last_sequence());
        self.last_sequence.store(sequence, AtomicOrdering::Release);
    }

    pub fn log_number(&self) -> u64 {
        self.log_number.load(AtomicOrdering::SeqCst)
    }

    pub fn prev_log_number(&self) -> u64 {
        self.prev_log_number.load(AtomicOrdering::SeqCst)
    }

    pub fn manifest_file_number(&self) -> u64 {
        self.manifest_file_number.load(AtomicOrdering::SeqCst)
    }

    pub fn num_level_files(&self, level: usize) -> usize {
        self.current().num_files(level)
    }

    pub fn level_summary(&self) -> String {
        self.current().level_summary()
    }

    pub fn icmp(&self) -> &Arc<InternalKeyComparator> {
        &self.icmp
    }
}
