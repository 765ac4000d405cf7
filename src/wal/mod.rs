//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append one record per write batch before it becomes visible
//! - CRC32 checksums for corruption detection
//! - Sequence numbers for ordering
//! - Crash recovery and replay (torn tails are truncated)
//!
//! The same record framing carries manifest edits.
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ Record 1                                 │
//! │ ┌─────────┬──────────┬─────────────────┐ │
//! │ │ CRC (4) │ Len (4)  │ Payload (Len)   │ │
//! │ └─────────┴──────────┴─────────────────┘ │
//! ├──────────────────────────────────────────┤
//! │ Record 2                                 │
//! │ ┌─────────┬──────────┬─────────────────┐ │
//! │ │ CRC (4) │ Len (4)  │ Payload (Len)   │ │
//! │ └─────────┴──────────┴─────────────────┘ │
//! └──────────────────────────────────────────┘
//! ```
//! WAL payload: bincode of `WalEntry { sequence, operations }`.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{frame_record, Operation, WalEntry, HEADER_SIZE};
pub use reader::WalReader;
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;
