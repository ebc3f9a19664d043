//! Sector allocation tables.
//!
//! An allocation table maps each sector ID to the next sector of its
//! chain, or to one of the reserved markers (`FREESECT`, `ENDOFCHAIN`,
//! `FATSECT`, `DIFSECT`). The same type serves both tables of a
//! container: the big FAT, indexed by host-file sectors, and the
//! MiniFAT, indexed by mini sectors of the mini stream.

use crate::consts::*;
use crate::error::{Error, Result};
use std::collections::HashSet;

/// A sector chain table.
#[derive(Debug, Clone, Default)]
pub struct AllocationTable {
    /// Entry per sector: next sector in chain, or a reserved marker
    entries: Vec<u32>,
    /// Scan position for the next free-entry search
    free_hint: usize,
}

impl AllocationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from entries loaded off disk.
    pub fn from_entries(entries: Vec<u32>) -> Self {
        AllocationTable {
            entries,
            free_hint: 0,
        }
    }

    /// The raw table entries.
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// Number of sectors the table covers.
    pub fn sector_count(&self) -> u32 {
        self.entries.len() as u32
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Walk the chain starting at `start` until `ENDOFCHAIN`.
    ///
    /// Fails with `Corrupt` on an out-of-bounds ID, a reserved marker in
    /// the middle of the chain, or a cycle (the walk is bounded by the
    /// table length).
    pub fn chain(&self, start: u32) -> Result<Vec<u32>> {
        let mut chain = Vec::new();
        let mut sid = start;
        while sid != ENDOFCHAIN {
            if sid > MAXREGSECT {
                return Err(Error::Corrupt(format!(
                    "chain entered reserved sector ID {sid:#010x}"
                )));
            }
            if sid as usize >= self.entries.len() {
                return Err(Error::Corrupt(format!(
                    "chain references sector {sid} beyond table end {}",
                    self.entries.len()
                )));
            }
            if chain.len() >= self.entries.len() {
                return Err(Error::Corrupt(format!(
                    "cycle in sector chain starting at {start}"
                )));
            }
            chain.push(sid);
            sid = self.entries[sid as usize];
        }
        Ok(chain)
    }

    /// Mark every sector of the chain starting at `start` as free.
    pub fn free_chain(&mut self, start: u32) -> Result<()> {
        for sid in self.chain(start)? {
            self.entries[sid as usize] = FREESECT;
            self.free_hint = self.free_hint.min(sid as usize);
        }
        Ok(())
    }

    /// Allocate a linked chain of `count` sectors and return its first
    /// sector, or `ENDOFCHAIN` for an empty allocation.
    ///
    /// Free entries are reused in ascending order; the table grows when
    /// none are left.
    pub fn allocate(&mut self, count: usize) -> Result<u32> {
        if count == 0 {
            return Ok(ENDOFCHAIN);
        }
        let mut first = ENDOFCHAIN;
        let mut prev = ENDOFCHAIN;
        for _ in 0..count {
            let sid = self.take_free()?;
            self.entries[sid as usize] = ENDOFCHAIN;
            if first == ENDOFCHAIN {
                first = sid;
            } else {
                self.entries[prev as usize] = sid;
            }
            prev = sid;
        }
        Ok(first)
    }

    /// Append `extra` freshly allocated sectors to an existing chain.
    /// Returns the (possibly new) chain start.
    pub fn extend_chain(&mut self, start: u32, extra: usize) -> Result<u32> {
        if extra == 0 {
            return Ok(start);
        }
        if start == ENDOFCHAIN {
            return self.allocate(extra);
        }
        let chain = self.chain(start)?;
        let appended = self.allocate(extra)?;
        let last = chain[chain.len() - 1];
        self.entries[last as usize] = appended;
        Ok(start)
    }

    /// Resize the chain starting at `start` so that it covers `bytes`
    /// bytes of `sector_size`-byte sectors, freeing the tail or
    /// allocating fresh sectors as needed. Returns the new chain start
    /// (`ENDOFCHAIN` when resized to nothing).
    pub fn resize_chain(&mut self, start: u32, bytes: u64, sector_size: usize) -> Result<u32> {
        let needed = bytes.div_ceil(sector_size as u64) as usize;
        let chain = self.chain(start)?;
        if needed == chain.len() {
            return Ok(start);
        }
        if needed < chain.len() {
            for &sid in &chain[needed..] {
                self.entries[sid as usize] = FREESECT;
                self.free_hint = self.free_hint.min(sid as usize);
            }
            if needed == 0 {
                return Ok(ENDOFCHAIN);
            }
            self.entries[chain[needed - 1] as usize] = ENDOFCHAIN;
            return Ok(start);
        }
        self.extend_chain(start, needed - chain.len())
    }

    /// Claim `count` sectors and mark them with a reserved value.
    ///
    /// Used to reserve the FAT's own pages (`FATSECT`) and DIFAT pages
    /// (`DIFSECT`); the sectors are not part of any chain.
    pub fn reserve_marked(&mut self, count: usize, marker: u32) -> Result<Vec<u32>> {
        let mut sids = Vec::with_capacity(count);
        for _ in 0..count {
            let sid = self.take_free()?;
            self.entries[sid as usize] = marker;
            sids.push(sid);
        }
        Ok(sids)
    }

    /// Drop trailing free entries, so the table length matches the last
    /// sector actually in use. Tables loaded off disk carry page
    /// padding; trimming it keeps the length meaningful as a sector
    /// count.
    pub fn truncate_trailing_free(&mut self) {
        while self.entries.last() == Some(&FREESECT) {
            self.entries.pop();
        }
        self.free_hint = self.free_hint.min(self.entries.len());
    }

    /// Serialize the table into sector-sized little-endian pages, padded
    /// with `FREESECT`.
    pub fn to_sector_bytes(&self, sector_size: usize) -> Vec<Vec<u8>> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        let entries_per_sector = sector_size / 4;
        let num_sectors = self.entries.len().div_ceil(entries_per_sector);

        let mut sectors = Vec::with_capacity(num_sectors);
        for sector_idx in 0..num_sectors {
            // 0xFF fill is FREESECT in every slot
            let mut sector_data = vec![0xFFu8; sector_size];
            let start_entry = sector_idx * entries_per_sector;
            let end_entry = (start_entry + entries_per_sector).min(self.entries.len());
            for (i, &value) in self.entries[start_entry..end_entry].iter().enumerate() {
                let offset = i * 4;
                sector_data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
            }
            sectors.push(sector_data);
        }
        sectors
    }

    /// Check table consistency: every regular entry must stay in bounds
    /// and no sector may be pointed to by two chains.
    pub fn validate(&self) -> Result<()> {
        let mut pointees = HashSet::new();
        for (sid, &next) in self.entries.iter().enumerate() {
            if next > MAXREGSECT {
                continue;
            }
            if next as usize >= self.entries.len() {
                return Err(Error::Corrupt(format!(
                    "sector {sid} points to {next}, which is out of bounds"
                )));
            }
            if !pointees.insert(next) {
                return Err(Error::Corrupt(format!("sector {next} pointed to twice")));
            }
        }
        Ok(())
    }

    /// Find the next free entry, growing the table when exhausted. The
    /// caller must overwrite the entry before the next call.
    fn take_free(&mut self) -> Result<u32> {
        while self.free_hint < self.entries.len() {
            if self.entries[self.free_hint] == FREESECT {
                let sid = self.free_hint as u32;
                self.free_hint += 1;
                return Ok(sid);
            }
            self.free_hint += 1;
        }
        if self.entries.len() as u64 > MAXREGSECT as u64 {
            return Err(Error::Unsupported(
                "sector address space exhausted".to_string(),
            ));
        }
        self.entries.push(FREESECT);
        self.free_hint = self.entries.len();
        Ok((self.entries.len() - 1) as u32)
    }
}
