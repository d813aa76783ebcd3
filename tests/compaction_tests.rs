//! Tests for compaction and purge
//!
//! These tests verify:
//! - The fragmented hint scheduling compaction without losing writes
//! - Incremental, restartable compaction slices
//! - Table draining and removal under a concurrent reader/writer lock
//! - Purge back to a single minimum-size table after mass deletes

use std::collections::BTreeSet;
use std::hash::Hasher;

use parking_lot::RwLock;
use slabkv::{Record, Storage, WriteOutcome, MINIMUM_SIZE};
use tracing_subscriber::EnvFilter;
use twox_hash::XxHash64;

// =============================================================================
// Helper Functions
// =============================================================================

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn hkey(key: &[u8]) -> u64 {
    let mut h = XxHash64::with_seed(0);
    h.write(key);
    h.finish()
}

fn bkey(i: usize) -> Vec<u8> {
    format!("{:09}", i).into_bytes()
}

/// A value wide enough that a thousand records overflow the minimum table.
fn wide_val(i: usize) -> Vec<u8> {
    format!("{:01000}", i).into_bytes()
}

fn drain(storage: &mut Storage) {
    loop {
        if storage.compact_tables().unwrap() {
            return;
        }
    }
}

// =============================================================================
// Steady-state Tests
// =============================================================================

#[test]
fn test_compact_on_fresh_storage_is_done() {
    let mut storage = Storage::new(0);
    assert!(storage.compact_tables().unwrap());
    assert_eq!(storage.table_count(), 1);
}

#[test]
fn test_inserting_into_empty_storage_is_never_fragmented() {
    let mut storage = Storage::new(0);
    for i in 0..100 {
        let rec = Record::new(bkey(i), b"value".to_vec(), i as i64);
        let outcome = storage.put(hkey(&bkey(i)), rec).unwrap();
        assert_eq!(outcome, WriteOutcome::Done);
    }
}

// =============================================================================
// Incremental Compaction Tests
// =============================================================================

#[test]
fn test_compaction_slice_is_bounded_and_restartable() {
    let mut storage = Storage::new(0);
    for i in 0..1100 {
        let rec = Record::new(bkey(i), wide_val(i), i as i64);
        storage.put(hkey(&bkey(i)), rec).unwrap();
    }
    assert!(storage.table_count() > 1);

    // One slice moves a bounded chunk; the old table is far from drained.
    let done = storage.compact_tables().unwrap();
    assert!(!done);
    assert!(storage.table_count() > 1);

    // Mid-compaction the storage stays fully consistent.
    assert_eq!(storage.len(), 1100);
    for i in (0..1100).step_by(97) {
        let rec = storage.get(hkey(&bkey(i))).unwrap();
        assert_eq!(rec.value, wide_val(i));
    }

    drain(&mut storage);
    assert_eq!(storage.table_count(), 1);
    assert_eq!(storage.len(), 1100);
}

#[test]
fn test_compaction_reclaims_overwrite_garbage() {
    let mut storage = Storage::new(0);
    for i in 0..600 {
        let rec = Record::new(bkey(i), wide_val(i), i as i64);
        storage.put(hkey(&bkey(i)), rec).unwrap();
    }
    // Overwrite everything once; half the arena turns into garbage and the
    // rewrites overflow into a second table.
    for i in 0..600 {
        let rec = Record::new(bkey(i), wide_val(i + 1), i as i64);
        storage.put(hkey(&bkey(i)), rec).unwrap();
    }
    assert!(storage.stats().garbage > 0);

    drain(&mut storage);

    let stats = storage.stats();
    assert_eq!(stats.tables.len(), 1);
    assert_eq!(stats.length, 600);
    for i in 0..600 {
        assert_eq!(storage.get(hkey(&bkey(i))).unwrap().value, wide_val(i + 1));
    }
}

// =============================================================================
// Triggered Compaction Tests
// =============================================================================

#[test]
fn test_triggered_compaction_under_shared_lock() {
    init_logging();
    let storage = RwLock::new(Storage::new(0));
    let mut saw_fragmented = false;

    crossbeam::scope(|s| {
        for i in 0..1500 {
            let rec = Record::new(bkey(i), wide_val(i), i as i64);
            let outcome = storage.write().put(hkey(&bkey(i)), rec).unwrap();
            if outcome == WriteOutcome::Fragmented {
                saw_fragmented = true;
                s.spawn(|_| loop {
                    if storage.write().compact_tables().unwrap() {
                        break;
                    }
                });
            }
        }

        // Reads interleave with the compaction workers.
        for i in 0..1500 {
            let guard = storage.read();
            let rec = guard.get(hkey(&bkey(i))).unwrap();
            assert_eq!(rec.key, bkey(i));
            assert_eq!(rec.ttl, i as i64);
            assert_eq!(rec.value, wide_val(i));
        }
    })
    .unwrap();

    assert!(saw_fragmented, "growing past a full table must hint at compaction");

    let mut storage = storage.into_inner();
    drain(&mut storage);
    assert_eq!(storage.table_count(), 1);
    assert_eq!(storage.len(), 1500);
}

#[test]
fn test_compaction_preserves_the_key_set() {
    let mut storage = Storage::new(0);
    let mut inserted = BTreeSet::new();
    for i in 0..1500 {
        let h = hkey(&bkey(i));
        let rec = Record::new(bkey(i), wide_val(i), i as i64);
        storage.put(h, rec).unwrap();
        inserted.insert(h);
    }

    drain(&mut storage);

    let mut seen = BTreeSet::new();
    storage
        .range(|h, _| {
            seen.insert(h);
            true
        })
        .unwrap();
    assert_eq!(seen, inserted);
}

// =============================================================================
// Purge Tests
// =============================================================================

#[test]
fn test_purge_after_mass_delete() {
    init_logging();
    let mut storage = Storage::new(0);

    for i in 0..2000 {
        let rec = Record::new(bkey(i), wide_val(i), i as i64);
        if storage.put(hkey(&bkey(i)), rec).unwrap() == WriteOutcome::Fragmented {
            drain(&mut storage);
        }
    }

    for i in 0..2000 {
        if storage.delete(hkey(&bkey(i))).unwrap() == WriteOutcome::Fragmented {
            drain(&mut storage);
        }
    }

    drain(&mut storage);
    let stats = storage.stats();
    assert_eq!(stats.tables.len(), 1);
    assert_eq!(stats.tables[0].allocated, MINIMUM_SIZE);
    assert_eq!(stats.length, 0);
    assert_eq!(stats.inuse, 0);
    assert_eq!(stats.garbage, 0);
}

#[test]
fn test_purge_drops_grown_tables_without_delete_hints() {
    let mut storage = Storage::new(0);
    // A single oversized record forces a 4 MiB table.
    let h = hkey(b"big");
    storage
        .put(h, Record::new(b"big".to_vec(), vec![b'x'; 2 * MINIMUM_SIZE], 0))
        .unwrap();
    storage.delete(h).unwrap();

    drain(&mut storage);
    let stats = storage.stats();
    assert_eq!(stats.tables.len(), 1);
    assert_eq!(stats.tables[0].allocated, MINIMUM_SIZE);
}

#[test]
fn test_mass_delete_reports_fragmented() {
    let mut storage = Storage::new(0);
    for i in 0..900 {
        let rec = Record::new(bkey(i), wide_val(i), i as i64);
        storage.put(hkey(&bkey(i)), rec).unwrap();
    }

    // Deleting most of a table has to cross the garbage threshold.
    let mut hinted = false;
    for i in 0..900 {
        if storage.delete(hkey(&bkey(i))).unwrap() == WriteOutcome::Fragmented {
            hinted = true;
        }
    }
    assert!(hinted);
}
