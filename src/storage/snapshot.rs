//! Snapshot export and import
//!
//! Serializes a whole [`Storage`] to a self-describing byte stream for
//! rebalancing and rejoin, and rebuilds an equivalent instance on the
//! receiving peer.
//!
//! ## Stream Format
//! All integers big-endian.
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                     │
//! │   Magic: "OLRS" (4) | Version: u16 (2)               │
//! ├──────────────────────────────────────────────────────┤
//! │ TableCount: u32 (4)                                  │
//! ├──────────────────────────────────────────────────────┤
//! │ Per table:                                           │
//! │   Allocated: u64 | Inuse: u64 | Garbage: u64         │
//! │   Offset: u64                                        │
//! │   Arena bytes (Offset bytes)                         │
//! │   IndexLen: u32                                      │
//! │   IndexLen × [ HKey: u64 | ArenaOffset: u32 ]        │
//! └──────────────────────────────────────────────────────┘
//! ```

use std::collections::BTreeMap;

use crate::error::{Result, SlabError};
use crate::record;
use crate::table::Table;

use super::Storage;

/// Magic bytes identifying a serialized storage snapshot.
pub(crate) const MAGIC: &[u8; 4] = b"OLRS";

/// Current snapshot format version.
pub(crate) const VERSION: u16 = 1;

impl Storage {
    /// Serialize the full storage state to a portable byte stream.
    pub fn export(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.export_size_hint());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&(self.tables.len() as u32).to_be_bytes());

        for table in &self.tables {
            out.extend_from_slice(&(table.allocated() as u64).to_be_bytes());
            out.extend_from_slice(&(table.inuse() as u64).to_be_bytes());
            out.extend_from_slice(&(table.garbage() as u64).to_be_bytes());
            out.extend_from_slice(&(table.offset() as u64).to_be_bytes());
            out.extend_from_slice(table.written());
            out.extend_from_slice(&(table.index().len() as u32).to_be_bytes());
            for (&hkey, &offset) in table.index() {
                out.extend_from_slice(&hkey.to_be_bytes());
                out.extend_from_slice(&(offset as u32).to_be_bytes());
            }
        }
        out
    }

    /// Rebuild a storage from a stream produced by [`Storage::export`].
    ///
    /// The stream is fully validated before the instance serves reads: a bad
    /// magic, an unknown version, counters that disagree with the arena
    /// contents, or index entries that do not address a decodable record are
    /// all rejected with `CorruptSnapshot`.
    pub fn import(buf: &[u8]) -> Result<Storage> {
        let mut r = Reader { buf, pos: 0 };

        let magic = r.bytes(4)?;
        if magic != &MAGIC[..] {
            return Err(SlabError::CorruptSnapshot(format!(
                "bad magic {:?}",
                magic
            )));
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(SlabError::CorruptSnapshot(format!(
                "unsupported version {}",
                version
            )));
        }

        let ntables = r.u32()? as usize;
        if ntables == 0 {
            return Err(SlabError::CorruptSnapshot(
                "snapshot holds no tables".to_string(),
            ));
        }
        let mut tables = Vec::with_capacity(ntables);
        for _ in 0..ntables {
            tables.push(read_table(&mut r)?);
        }

        if r.pos != buf.len() {
            return Err(SlabError::CorruptSnapshot(format!(
                "{} trailing bytes after the last table",
                buf.len() - r.pos
            )));
        }
        Ok(Storage { tables })
    }

    fn export_size_hint(&self) -> usize {
        let header = 4 + 2 + 4;
        header
            + self
                .tables
                .iter()
                .map(|t| 32 + t.offset() + 4 + t.index().len() * 12)
                .sum::<usize>()
    }
}

fn read_table(r: &mut Reader<'_>) -> Result<Table> {
    let allocated = r.u64()? as usize;
    let inuse = r.u64()? as usize;
    let garbage = r.u64()? as usize;
    let offset = r.u64()? as usize;

    if offset > allocated {
        return Err(SlabError::CorruptSnapshot(format!(
            "write cursor {} is past the arena capacity {}",
            offset, allocated
        )));
    }
    if inuse.checked_add(garbage) != Some(offset) {
        return Err(SlabError::CorruptSnapshot(format!(
            "inuse {} and garbage {} do not add up to the write cursor {}",
            inuse, garbage, offset
        )));
    }

    let written = r.bytes(offset)?;
    let mut arena = vec![0u8; allocated];
    arena[..offset].copy_from_slice(written);

    let index_len = r.u32()? as usize;
    let mut index = BTreeMap::new();
    let mut live = 0usize;
    for _ in 0..index_len {
        let hkey = r.u64()?;
        let record_offset = r.u32()? as usize;
        // Every indexed entry must address a record that decodes from the
        // written arena prefix.
        let size = record::encoded_len_at(&arena[..offset], record_offset).map_err(|e| {
            SlabError::CorruptSnapshot(format!("index entry for hkey {}: {}", hkey, e))
        })?;
        live += size;
        if index.insert(hkey, record_offset).is_some() {
            return Err(SlabError::CorruptSnapshot(format!(
                "duplicate index entry for hkey {}",
                hkey
            )));
        }
    }
    if live != inuse {
        return Err(SlabError::CorruptSnapshot(format!(
            "live records hold {} bytes but inuse says {}",
            live, inuse
        )));
    }

    Ok(Table::from_snapshot(arena, inuse, garbage, offset, index))
}

/// Cursor over the snapshot stream with bounds-checked reads.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).ok_or_else(|| self.eof())?;
        match self.buf.get(self.pos..end) {
            Some(b) => {
                self.pos = end;
                Ok(b)
            }
            None => Err(self.eof()),
        }
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.bytes(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.bytes(4)?.try_into().unwrap()))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.bytes(8)?.try_into().unwrap()))
    }

    fn eof(&self) -> SlabError {
        SlabError::CorruptSnapshot(format!("unexpected end of stream at byte {}", self.pos))
    }
}
