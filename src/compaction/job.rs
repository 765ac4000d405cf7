//! Compaction and flush jobs
//!
//! `run_compaction` merges a `Compaction`'s inputs into new files one level
//! down; `build_table` writes any sorted cursor (a memtable) out as a single
//! table. Both leave their output numbers registered with the host until the
//! caller has either installed or abandoned them.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::config::Config;
use crate::error::{Result, StrataError};
use crate::iterator::InternalIterator;
use crate::keys::{parse_internal_key, InternalKeyComparator, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER};
use crate::storage::filename::table_file_path;
use crate::storage::SSTableBuilder;
use crate::version::{FileMetaData, VersionSet};

use super::Compaction;

/// What a compaction job needs from the engine that runs it
pub(crate) trait CompactionHost {
    /// Allocate a file number for a new table and protect it from
    /// obsolete-file deletion
    fn new_output_number(&self) -> u64;

    fn is_shutting_down(&self) -> bool;

    /// Flush the frozen memtable if there is one. Called between entries so
    /// a long compaction does not stall writers waiting on the flush.
    fn service_imm(&self) -> Result<()>;
}

/// Counters reported when a compaction finishes
#[derive(Debug, Default)]
struct CompactionStats {
    input_files: usize,
    input_bytes: u64,
    output_files: usize,
    output_bytes: u64,
    dropped_entries: u64,
}

/// Write every entry of `iter` into table `number`.
///
/// Returns `None` (and creates no file) when the cursor is empty.
pub(crate) fn build_table(
    dir: &Path,
    config: &Config,
    icmp: &Arc<InternalKeyComparator>,
    number: u64,
    iter: &mut dyn InternalIterator,
) -> Result<Option<FileMetaData>> {
    iter.seek_to_first();
    if !iter.valid() {
        iter.status()?;
        return Ok(None);
    }

    let path = table_file_path(dir, number);
    let mut builder = SSTableBuilder::new(&path, Arc::clone(icmp), config.block_size, config.filter_policy.clone())?;
    while iter.valid() {
        if let Err(e) = builder.add(iter.key(), iter.value()) {
            builder.abandon();
            return Err(e);
        }
        iter.next();
    }
    if let Err(e) = iter.status() {
        builder.abandon();
        return Err(e);
    }

    let table = builder.finish()?;
    Ok(Some(FileMetaData {
        number,
        file_size: table.file_size,
        smallest: table.min_key,
        largest: table.max_key,
    }))
}

/// An output table being written
struct Output {
    number: u64,
    builder: SSTableBuilder,
}

/// Merge the inputs of `c` into new files at `c.level + 1` and install the
/// result.
///
/// An entry is dropped when a newer entry for the same user key is already
/// visible to the oldest snapshot, or when it is a tombstone at or below that
/// snapshot and no deeper level can hold the key.
pub(crate) fn run_compaction(
    host: &dyn CompactionHost,
    versions: &VersionSet,
    config: &Config,
    dir: &Path,
    mut c: Compaction,
    smallest_snapshot: SequenceNumber,
) -> Result<()> {
    let start = Instant::now();
    let icmp = Arc::clone(versions.icmp());
    let ucmp = Arc::clone(icmp.user_comparator());

    let mut stats = CompactionStats {
        input_files: c.num_input_files(0) + c.num_input_files(1),
        input_bytes: c.inputs.iter().flatten().map(|f| f.file_size).sum(),
        ..Default::default()
    };
    tracing::info!(
        level = c.level,
        inputs0 = c.num_input_files(0),
        inputs1 = c.num_input_files(1),
        input_bytes = stats.input_bytes,
        smallest_snapshot,
        "Compacting"
    );

    let mut input = versions.make_input_iterator(&c)?;
    input.seek_to_first();

    let mut output: Option<Output> = None;
    let mut finished: Vec<FileMetaData> = Vec::new();
    let mut current_user_key: Option<Vec<u8>> = None;
    let mut last_sequence_for_key = MAX_SEQUENCE_NUMBER;

    let result: Result<()> = (|| {
        while input.valid() {
            if host.is_shutting_down() {
                return Err(StrataError::ShuttingDown);
            }
            host.service_imm()?;

            let key = input.key();
            // Every key advances the grandparent cursor, written or not
            if c.should_stop_before(key) && output.is_some() {
                finish_output(&mut output, &mut finished)?;
            }

            let mut drop_entry = false;
            match parse_internal_key(key) {
                None => {
                    // Keep malformed keys; do not let them hide anything
                    current_user_key = None;
                    last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                }
                Some(parsed) => {
                    let first_occurrence = current_user_key
                        .as_deref()
                        .map_or(true, |cur| ucmp.compare(parsed.user_key, cur) != Ordering::Equal);
                    if first_occurrence {
                        current_user_key = Some(parsed.user_key.to_vec());
                        last_sequence_for_key = MAX_SEQUENCE_NUMBER;
                    }

                    if last_sequence_for_key <= smallest_snapshot {
                        // Shadowed by a newer entry every reader can see
                        drop_entry = true;
                    } else if parsed.value_type == ValueType::Deletion
                        && parsed.sequence <= smallest_snapshot
                        && c.is_base_level_for_key(parsed.user_key)
                    {
                        drop_entry = true;
                    }
                    last_sequence_for_key = parsed.sequence;
                }
            }

            if drop_entry {
                stats.dropped_entries += 1;
            } else {
                if output.is_none() {
                    let number = host.new_output_number();
                    let builder = SSTableBuilder::new(
                        &table_file_path(dir, number),
                        Arc::clone(&icmp),
                        config.block_size,
                        config.filter_policy.clone(),
                    )?;
                    output = Some(Output { number, builder });
                }
                if let Some(out) = output.as_mut() {
                    out.builder.add(key, input.value())?;
                    if out.builder.file_size() >= c.max_output_file_size() {
                        finish_output(&mut output, &mut finished)?;
                    }
                }
            }

            input.next();
        }

        if host.is_shutting_down() {
            return Err(StrataError::ShuttingDown);
        }
        input.status()?;
        finish_output(&mut output, &mut finished)
    })();

    if let Err(e) = result {
        if let Some(out) = output.take() {
            out.builder.abandon();
        }
        tracing::warn!(level = c.level, error = %e, "Compaction aborted");
        return Err(e);
    }

    // Install: inputs leave, outputs land one level down
    c.add_input_deletions();
    for file in &finished {
        stats.output_files += 1;
        stats.output_bytes += file.file_size;
        c.edit.add_file(c.level + 1, file.clone());
    }
    versions.log_and_apply(&mut c.edit)?;

    tracing::info!(
        level = c.level,
        inputs = stats.input_files,
        outputs = stats.output_files,
        output_bytes = stats.output_bytes,
        dropped = stats.dropped_entries,
        micros = start.elapsed().as_micros() as u64,
        summary = %versions.level_summary(),
        "Compacted"
    );
    Ok(())
}

fn finish_output(output: &mut Option<Output>, finished: &mut Vec<FileMetaData>) -> Result<()> {
    let Some(out) = output.take() else {
        return Ok(());
    };
    let number = out.number;
    if out.builder.entry_count() == 0 {
        out.builder.abandon();
        return Ok(());
    }
    let table = out.builder.finish()?;
    tracing::debug!(file = number, entries = table.entry_count, bytes = table.file_size, "Compaction output written");
    finished.push(FileMetaData {
        number,
        file_size: table.file_size,
        smallest: table.min_key,
        largest: table.max_key,
    });
    Ok(())
}
