//! MiniFAT generation for the write pass
//!
//! Small streams (shorter than the cutoff) are packed into the ministream
//! as runs of 64-byte mini sectors. The ministream itself is stored in big
//! sectors referenced from the root entry, and the miniFAT chains the mini
//! sectors the same way the FAT chains big ones.

use super::super::consts::*;
use super::super::fat::AllocationTable;
use super::super::sector::{Sector, SectorKind};

/// Ministream and miniFAT ready to be placed as big sectors.
#[derive(Debug, Default)]
pub struct MiniStreamLayout {
    /// Ministream content in big sectors
    pub ministream: Vec<Sector>,
    /// Ministream length in bytes, stored as the root entry's size
    pub ministream_size: usize,
    /// MiniFAT in big sectors
    pub mini_fat: Vec<Sector>,
}

/// MiniFAT builder for small stream allocation
#[derive(Debug, Default)]
pub struct MiniFatBuilder {
    /// Maps mini sector number to the next mini sector in its chain
    minifat: Vec<i32>,
    /// Concatenated mini sectors
    ministream_data: Vec<u8>,
}

impl MiniFatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append existing mini sectors as one chain.
    ///
    /// Returns the first mini sector, or `ENDOFCHAIN` when `sectors` is empty.
    pub fn allocate_mini_chain(&mut self, sectors: &[&Sector]) -> i32 {
        if sectors.is_empty() {
            return ENDOFCHAIN;
        }

        let start = self.minifat.len();
        let count = sectors.len();
        for (i, sector) in sectors.iter().enumerate() {
            let current = start + i;
            self.minifat.push(if i + 1 < count {
                (current + 1) as i32
            } else {
                ENDOFCHAIN
            });
            let bytes = sector.padded_bytes();
            self.ministream_data
                .extend_from_slice(&bytes[..MINI_SECTOR_SIZE.min(bytes.len())]);
        }

        start as i32
    }

    /// Split `data` into mini sectors and append them as one chain.
    pub fn allocate_mini_data(&mut self, data: &[u8]) -> i32 {
        let sectors = Sector::from_bytes(data, SectorKind::Mini);
        let refs: Vec<&Sector> = sectors.iter().collect();
        self.allocate_mini_chain(&refs)
    }

    pub fn ministream_data(&self) -> &[u8] {
        &self.ministream_data
    }

    pub fn ministream_size(&self) -> usize {
        self.ministream_data.len()
    }

    pub fn mini_sector_count(&self) -> usize {
        self.minifat.len()
    }

    pub fn is_empty(&self) -> bool {
        self.minifat.is_empty()
    }

    pub fn minifat(&self) -> &[i32] {
        &self.minifat
    }

    /// MiniFAT as whole big sectors, padded with free entries.
    pub fn generate_minifat_sectors(&self) -> Vec<Sector> {
        AllocationTable::new(self.minifat.clone()).to_sectors()
    }

    /// Ministream content as big sectors.
    pub fn ministream_sectors(&self) -> Vec<Sector> {
        Sector::from_bytes(&self.ministream_data, SectorKind::Big)
    }

    pub fn finish(self) -> MiniStreamLayout {
        if self.is_empty() {
            return MiniStreamLayout::default();
        }
        MiniStreamLayout {
            ministream: self.ministream_sectors(),
            ministream_size: self.ministream_size(),
            mini_fat: self.generate_minifat_sectors(),
        }
    }
}
