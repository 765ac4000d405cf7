//! Error types for StrataKV
//!
//! Provides a unified error type for all operations. A missing key is not an
//! error: lookups return `Ok(None)`.

use thiserror::Error;

/// Result type alias using StrataError
pub type Result<T> = std::result::Result<T, StrataError>;

/// Unified error type for StrataKV operations
#[derive(Debug, Error)]
pub enum StrataError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Data Integrity Errors
    // -------------------------------------------------------------------------
    /// Checksum or format mismatch in a log, manifest, or table file
    #[error("Corruption: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    #[error("WAL write failed: {0}")]
    WalWrite(String),

    // -------------------------------------------------------------------------
    // Usage Errors
    // -------------------------------------------------------------------------
    /// Comparator/filter identity mismatch, malformed range, bad option
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Engine State Errors
    // -------------------------------------------------------------------------
    /// A previous write-path or background failure; reopen to clear
    #[error("Engine poisoned by earlier failure: {0}")]
    Poisoned(String),

    #[error("Engine is shutting down")]
    ShuttingDown,
}

impl StrataError {
    pub fn is_corruption(&self) -> bool {
        matches!(self, StrataError::Corruption(_))
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, StrataError::InvalidArgument(_))
    }

    pub fn is_io(&self) -> bool {
        matches!(self, StrataError::Io(_))
    }
}

// io::Error is not Clone; a stored background error must be reported to every
// later caller, so rebuild it from its kind and message.
impl Clone for StrataError {
    fn clone(&self) -> Self {
        match self {
            StrataError::Io(e) => StrataError::Io(std::io::Error::new(e.kind(), e.to_string())),
            StrataError::Corruption(m) => StrataError::Corruption(m.clone()),
            StrataError::WalWrite(m) => StrataError::WalWrite(m.clone()),
            StrataError::InvalidArgument(m) => StrataError::InvalidArgument(m.clone()),
            StrataError::Serialization(m) => StrataError::Serialization(m.clone()),
            StrataError::Poisoned(m) => StrataError::Poisoned(m.clone()),
            StrataError::ShuttingDown => StrataError::ShuttingDown,
        }
    }
}

impl From<bincode::Error> for StrataError {
    fn from(e: bincode::Error) -> Self {
        StrataError::Serialization(e.to_string())
    }
}
