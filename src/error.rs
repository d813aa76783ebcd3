//! Error types for SlabKV
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using SlabError
pub type Result<T> = std::result::Result<T, SlabError>;

/// Unified error type for SlabKV operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SlabError {
    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    #[error("key not found")]
    KeyNotFound,

    // -------------------------------------------------------------------------
    // Table Errors
    // -------------------------------------------------------------------------
    /// The table's arena cannot fit the record. `Storage` absorbs this by
    /// allocating a larger table and retrying; it only escapes when a
    /// `Table` is driven directly.
    #[error("not enough space left in table")]
    TableFull,

    // -------------------------------------------------------------------------
    // Record Errors
    // -------------------------------------------------------------------------
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    // -------------------------------------------------------------------------
    // Snapshot Errors
    // -------------------------------------------------------------------------
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}
