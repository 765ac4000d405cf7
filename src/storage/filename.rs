//! File naming
//!
//! Every file in a database directory is named after its kind and, for
//! numbered files, a number drawn from the manifest's file counter.
//!
//! ```text
//! LOCK                  advisory lock, held while open
//! CURRENT               name of the live manifest
//! MANIFEST-000005       version edit log
//! wal_000007.log        write-ahead log
//! sstable_000009.sst    sorted table
//! 000011.dbtmp          scratch file (atomic CURRENT replacement)
//! ```

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Lock,
    Current,
    Manifest,
    Log,
    Table,
    Temp,
}

pub fn lock_file_path(dir: &Path) -> PathBuf {
    dir.join("LOCK")
}

pub fn current_file_path(dir: &Path) -> PathBuf {
    dir.join("CURRENT")
}

pub fn manifest_file_name(number: u64) -> String {
    format!("MANIFEST-{:06}", number)
}

pub fn manifest_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(manifest_file_name(number))
}

pub fn log_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("wal_{:06}.log", number))
}

pub fn table_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("sstable_{:06}.sst", number))
}

pub fn temp_file_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.dbtmp", number))
}

/// Classify a directory entry.
///
/// "sstable_000042.sst" → Some((42, Table)); unrelated names → None
pub fn parse_file_name(name: &str) -> Option<(u64, FileType)> {
    match name {
        "LOCK" => return Some((0, FileType::Lock)),
        "CURRENT" => return Some((0, FileType::Current)),
        _ => {}
    }

    if let Some(num) = name.strip_prefix("MANIFEST-") {
        return parse_number(num).map(|n| (n, FileType::Manifest));
    }
    if let Some(num) = name.strip_prefix("wal_").and_then(|s| s.strip_suffix(".log")) {
        return parse_number(num).map(|n| (n, FileType::Log));
    }
    if let Some(num) = name.strip_prefix("sstable_").and_then(|s| s.strip_suffix(".sst")) {
        return parse_number(num).map(|n| (n, FileType::Table));
    }
    if let Some(num) = name.strip_suffix(".dbtmp") {
        return parse_number(num).map(|n| (n, FileType::Temp));
    }
    None
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Point CURRENT at manifest `manifest_number` (write temp file, then rename)
pub fn set_current_file(dir: &Path, manifest_number: u64) -> Result<()> {
    let tmp = temp_file_path(dir, manifest_number);
    let contents = format!("{}\n", manifest_file_name(manifest_number));

    let result = (|| -> Result<()> {
        let mut file = File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp, current_file_path(dir))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

/// Name of the live manifest, as recorded in CURRENT
pub fn read_current_file(dir: &Path) -> Result<String> {
    let contents = fs::read_to_string(current_file_path(dir))?;
    let name = contents.trim_end_matches('\n');
    if name.is_empty() || name.contains('\n') || !name.starts_with("MANIFEST-") {
        return Err(crate::error::StrataError::Corruption(
            "CURRENT file does not name a manifest".into(),
        ));
    }
    Ok(name.to_string())
}
