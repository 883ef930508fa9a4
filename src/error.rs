//! Error types for pagewal
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Unified error type for write-ahead log operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Corruption Errors
    // -------------------------------------------------------------------------
    #[error("page {page} checksum mismatch: stored {expected:#010x}, computed {actual:#010x}")]
    PageChecksumMismatch { page: u64, expected: u32, actual: u32 },

    #[error("master record checksum mismatch: stored {expected:#010x}, computed {actual:#010x}")]
    MasterChecksumMismatch { expected: u32, actual: u32 },

    #[error("unsupported master record version: {0}")]
    UnsupportedMasterVersion(u8),

    #[error("unknown entry type byte: {0:#04x}")]
    UnknownEntryType(u8),

    // -------------------------------------------------------------------------
    // Framing Errors
    // -------------------------------------------------------------------------
    #[error("entry of {len} bytes cannot be declared in a 2-byte length field")]
    FramingViolation { len: usize },

    // -------------------------------------------------------------------------
    // Capacity Errors
    // -------------------------------------------------------------------------
    #[error("entry of {len} bytes exceeds the maximum of {max} bytes")]
    EntryTooLarge { len: usize, max: usize },

    #[error("log file is full ({pages} pages)")]
    LogFull { pages: u64 },

    #[error("ring buffer full: page {needed} must be published before its slot can be reused (published through page {published})")]
    RingBufferFull { needed: u64, published: u64 },

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("log is closed")]
    Closed,

    #[error("background persist failed: {0}")]
    PersistFailure(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}
