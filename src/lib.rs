//! # SlabKV
//!
//! The in-memory storage engine behind a distributed, Redis-speaking
//! key-value store. Each cluster peer owns a set of partitions and keeps one
//! [`Storage`] per partition:
//! - Append-only tables: records are encoded back-to-back into fixed-size
//!   byte arenas and found again through per-table offset indexes
//! - O(1) point lookups by a caller-hashed 64-bit key
//! - Online compaction in bounded slices, interleaved with foreground
//!   requests under the caller's partition lock
//! - Portable big-endian snapshots for rebalancing and rejoin
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                    Storage                      │
//! │  (ordered tables, the newest one takes writes)  │
//! └───────┬───────────────┬───────────────┬─────────┘
//!         │               │               │
//!         ▼               ▼               ▼
//!  ┌─────────────┐ ┌─────────────┐ ┌─────────────┐
//!  │    Table    │ │    Table    │ │    Table    │
//!  │ arena+index │ │ arena+index │ │ arena+index │
//!  └──────┬──────┘ └─────────────┘ └─────────────┘
//!         │
//!         ▼ encode / decode
//!  ┌─────────────┐
//!  │   Record    │
//!  └─────────────┘
//! ```
//!
//! The engine performs no locking, no background work and no I/O. The caller
//! serializes mutations per partition and drives
//! [`Storage::compact_tables`] whenever a mutation reports
//! [`WriteOutcome::Fragmented`].

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod record;
pub mod storage;
pub mod table;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, SlabError};
pub use record::Record;
pub use storage::{Storage, StorageStats, TableStats, WriteOutcome};
pub use table::{Table, MINIMUM_SIZE};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of SlabKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
