//! Storage
//!
//! One partition's storage engine: an ordered collection of [`Table`]s,
//! oldest first, with writes always landing in the newest one.
//!
//! ## Responsibilities
//! - Keep every live hkey indexed in exactly one table
//! - Grow by allocating a larger table when the newest cannot fit a record
//! - Surface the fragmented hint so the caller schedules compaction
//! - Compact in bounded slices and purge once everything is deleted
//!
//! ## Concurrency
//! The engine is not internally synchronized and spawns no background work.
//! Callers serialize `put`, `delete` and `compact_tables` behind an
//! exclusive lock per storage and may share `get`, `check`, `len`, `range`
//! and `stats` behind its read side. A typical caller reacts to
//! [`WriteOutcome::Fragmented`] by driving [`Storage::compact_tables`] to
//! completion on a worker, reacquiring the exclusive lock for each slice so
//! foreground requests interleave.

mod snapshot;

use tracing::debug;

use crate::error::{Result, SlabError};
use crate::record::{self, Record};
use crate::table::{Table, MINIMUM_SIZE};

/// Aggregate garbage share past which a delete reports
/// [`WriteOutcome::Fragmented`].
const FRAGMENTATION_RATIO: f64 = 0.40;

/// Encoded bytes one [`Storage::compact_tables`] call moves before yielding.
const COMPACTION_SLICE: usize = 64 << 10;

/// Outcome of a successful mutation.
///
/// `Fragmented` is a hint, not a failure: the write or delete has taken
/// effect, and compaction would now reclaim space. Callers must not treat it
/// as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The mutation completed; no follow-up needed.
    Done,
    /// The mutation completed and the engine would benefit from compaction.
    Fragmented,
}

/// Point-in-time usage counters for one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableStats {
    pub allocated: usize,
    pub inuse: usize,
    pub garbage: usize,
    pub offset: usize,
    pub length: usize,
}

/// Usage counters for a storage, aggregated and per table (oldest first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    pub allocated: usize,
    pub inuse: usize,
    pub garbage: usize,
    pub length: usize,
    pub tables: Vec<TableStats>,
}

/// Segmented append-only storage for pre-hashed keys.
pub struct Storage {
    /// Oldest first; the last entry takes all writes.
    tables: Vec<Table>,
}

impl Storage {
    /// Create a storage backed by a single table of at least `size` bytes
    /// (clamped to [`MINIMUM_SIZE`]).
    pub fn new(size: usize) -> Self {
        Storage {
            tables: vec![Table::new(size)],
        }
    }

    /// Store `record` under `hkey`, overwriting any previous version.
    ///
    /// When the newest table cannot fit the record, a larger table is
    /// allocated and the write retried there; the returned outcome is then
    /// [`WriteOutcome::Fragmented`] if any live record or garbage byte
    /// exists outside the fresh table, telling the caller compaction would
    /// consolidate the storage again.
    pub fn put(&mut self, hkey: u64, record: Record) -> Result<WriteOutcome> {
        record::validate(&record)?;
        let need = record.encoded_len();
        let mut outcome = WriteOutcome::Done;

        loop {
            let newest = self.tables.len() - 1;
            match self.tables[newest].put(hkey, &record) {
                Ok(()) => break,
                Err(SlabError::TableFull) => {
                    if self.len() > 0 || self.total_garbage() > 0 {
                        outcome = WriteOutcome::Fragmented;
                    }
                    let size = self.grown_table_size(need);
                    debug!(size, tables = self.tables.len(), "newest table is full, growing");
                    self.tables.push(Table::new(size));
                }
                Err(e) => return Err(e),
            }
        }

        // A previous version of the record may live in an older table; drop
        // it so the hkey stays indexed in exactly one place.
        let newest = self.tables.len() - 1;
        for table in &mut self.tables[..newest] {
            match table.delete(hkey) {
                Ok(()) => break,
                Err(SlabError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }

    /// Return the record stored under `hkey`.
    pub fn get(&self, hkey: u64) -> Result<Record> {
        for table in self.tables.iter().rev() {
            match table.get(hkey) {
                Ok(record) => return Ok(record),
                Err(SlabError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SlabError::KeyNotFound)
    }

    /// Remove the record stored under `hkey`.
    ///
    /// Reports [`WriteOutcome::Fragmented`] once garbage makes up more than
    /// 40% of all allocated bytes.
    pub fn delete(&mut self, hkey: u64) -> Result<WriteOutcome> {
        let mut found = false;
        for table in &mut self.tables {
            match table.delete(hkey) {
                Ok(()) => {
                    found = true;
                    break;
                }
                Err(SlabError::KeyNotFound) => continue,
                Err(e) => return Err(e),
            }
        }
        if !found {
            return Err(SlabError::KeyNotFound);
        }

        if self.total_garbage() as f64 / self.total_allocated() as f64 >= FRAGMENTATION_RATIO {
            Ok(WriteOutcome::Fragmented)
        } else {
            Ok(WriteOutcome::Done)
        }
    }

    /// Membership test without decoding.
    pub fn check(&self, hkey: u64) -> bool {
        self.tables.iter().any(|t| t.check(hkey))
    }

    /// Number of distinct live hkeys across all tables.
    pub fn len(&self) -> usize {
        self.tables.iter().map(Table::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Visit every live record once. Iteration stops when `f` returns false;
    /// the order is unspecified and not stable across mutations.
    pub fn range<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(u64, Record) -> bool,
    {
        let mut keep_going = true;
        for table in &self.tables {
            if !keep_going {
                break;
            }
            table.range(|hkey, record| {
                keep_going = f(hkey, record);
                keep_going
            })?;
        }
        Ok(())
    }

    /// Perform one bounded slice of compaction and report whether the
    /// storage has reached its compacted steady state.
    ///
    /// Each call moves a bounded chunk of encoded bytes out of the oldest
    /// table through the normal put path, drops that table once it is
    /// drained, and collapses a fully emptied storage back to a single
    /// minimum-size table. Callers loop until `true`, releasing their
    /// exclusive lock between calls so foreground requests make progress.
    pub fn compact_tables(&mut self) -> Result<bool> {
        if self.tables.len() == 1 {
            self.purge();
            return Ok(true);
        }

        let keys: Vec<u64> = self.tables[0].keys().collect();
        let mut moved = 0usize;
        let mut count = 0usize;
        for hkey in keys {
            let record = self.tables[0].get(hkey)?;
            moved += record.encoded_len();
            // The put path reinserts into the newest table and unlinks the
            // stale copy from this one.
            self.put(hkey, record)?;
            count += 1;
            if moved >= COMPACTION_SLICE {
                break;
            }
        }
        debug!(records = count, bytes = moved, "compaction slice finished");

        if self.tables[0].is_empty() {
            let dropped = self.tables.remove(0);
            debug!(allocated = dropped.allocated(), "dropped drained table");
        }

        if self.tables.len() == 1 {
            self.purge();
            return Ok(true);
        }
        Ok(false)
    }

    /// Usage counters, aggregated and per table (oldest first).
    pub fn stats(&self) -> StorageStats {
        let tables: Vec<TableStats> = self
            .tables
            .iter()
            .map(|t| TableStats {
                allocated: t.allocated(),
                inuse: t.inuse(),
                garbage: t.garbage(),
                offset: t.offset(),
                length: t.len(),
            })
            .collect();
        StorageStats {
            allocated: tables.iter().map(|t| t.allocated).sum(),
            inuse: tables.iter().map(|t| t.inuse).sum(),
            garbage: tables.iter().map(|t| t.garbage).sum(),
            length: tables.iter().map(|t| t.length).sum(),
            tables,
        }
    }

    /// Number of tables currently backing this storage.
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Capacity for the table allocated when `need` bytes would not fit the
    /// newest one: doubles the newest capacity, never below the minimum,
    /// never too small for the record itself.
    fn grown_table_size(&self, need: usize) -> usize {
        let newest = self.tables[self.tables.len() - 1].allocated();
        MINIMUM_SIZE
            .max(newest * 2)
            .max(need.next_power_of_two())
    }

    /// Collapse to a fresh minimum-size table once the last table holds no
    /// records. Without this, a storage that grew and then emptied would pin
    /// its largest arena forever.
    fn purge(&mut self) {
        let only = &self.tables[0];
        if only.is_empty() && (only.allocated() != MINIMUM_SIZE || only.offset() > 0) {
            debug!("storage emptied, replacing with a minimum-size table");
            self.tables = vec![Table::new(MINIMUM_SIZE)];
        }
    }

    fn total_garbage(&self) -> usize {
        self.tables.iter().map(Table::garbage).sum()
    }

    fn total_allocated(&self) -> usize {
        self.tables.iter().map(Table::allocated).sum()
    }
}
