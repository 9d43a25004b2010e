//! FAT generation for the write pass
//!
//! Sectors are handed out sequentially: every allocation takes the next
//! free run, links it as a chain and terminates it with `ENDOFCHAIN`. The
//! FAT and DIFAT sectors themselves are reserved with their markers.

use fixedbitset::FixedBitSet;

use super::super::consts::*;
use super::super::fat::AllocationTable;
use crate::common::error::{Error, Result};

/// FAT sectors needed to describe `total_sectors` sectors.
///
/// ```
/// use leofile::leo::writer::fat_sector_count;
/// assert_eq!(fat_sector_count(128), 1);
/// assert_eq!(fat_sector_count(129), 2);
/// ```
pub fn fat_sector_count(total_sectors: usize) -> usize {
    (total_sectors * 4).div_ceil(BIG_SECTOR_SIZE)
}

/// Extra DIFAT sectors needed to list `fat_sectors` FAT sectors.
pub fn difat_sector_count(fat_sectors: usize) -> usize {
    fat_sectors
        .saturating_sub(HEADER_DIFAT_LEN)
        .div_ceil(DIFAT_ENTRIES_PER_SECTOR)
}

/// FAT and DIFAT sector counts for a container with `data_sectors`
/// sectors of content, accounting for the tables' own sectors.
pub fn table_sector_counts(data_sectors: usize) -> (usize, usize) {
    let mut fat = 0;
    let mut difat = 0;
    loop {
        let total = data_sectors + fat + difat;
        let next_fat = fat_sector_count(total);
        let next_difat = difat_sector_count(next_fat);
        if next_fat == fat && next_difat == difat {
            return (fat, difat);
        }
        fat = next_fat;
        difat = next_difat;
    }
}

/// FAT builder for sequential sector allocation
#[derive(Debug, Default)]
pub struct FatBuilder {
    /// Maps sector number to the next sector in its chain
    fat: Vec<i32>,
    /// Next available sector
    next_sector: usize,
}

impl FatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a chain of `count` sectors.
    ///
    /// Returns the first sector, or `ENDOFCHAIN` when `count` is zero.
    pub fn allocate_chain(&mut self, count: usize) -> i32 {
        if count == 0 {
            return ENDOFCHAIN;
        }

        let start = self.next_sector;
        self.fat.resize(start + count, FREESECT);
        for sector in start..start + count {
            self.fat[sector] = if sector + 1 < start + count {
                (sector + 1) as i32
            } else {
                ENDOFCHAIN
            };
        }
        self.next_sector += count;
        start as i32
    }

    /// Reserve `count` sectors marked with `marker` (`FATSECT`, `DIFSECT`).
    ///
    /// Returns the first reserved sector, or `ENDOFCHAIN` when `count` is zero.
    pub fn allocate_special(&mut self, count: usize, marker: i32) -> i32 {
        if count == 0 {
            return ENDOFCHAIN;
        }

        let start = self.next_sector;
        self.fat.resize(start + count, marker);
        self.next_sector += count;
        start as i32
    }

    pub fn fat(&self) -> &[i32] {
        &self.fat
    }

    /// Number of sectors allocated so far.
    pub fn total_sectors(&self) -> usize {
        self.next_sector
    }

    /// Check that every chain is well formed.
    ///
    /// Rejects links past the table, sectors shared by two chains and
    /// cycles.
    pub fn validate(&self) -> Result<()> {
        let len = self.fat.len();
        let mut pointed = FixedBitSet::with_capacity(len);

        for (sector, &next) in self.fat.iter().enumerate() {
            if next < 0 {
                continue;
            }
            let next = next as usize;
            if next >= len {
                return Err(Error::InconsistentLayout(format!(
                    "sector {sector} links past the table to {next}"
                )));
            }
            if pointed.contains(next) {
                return Err(Error::InconsistentLayout(format!(
                    "sector {next} is linked from two chains"
                )));
            }
            pointed.insert(next);
        }

        let in_chain = |entry: i32| entry >= 0 || entry == ENDOFCHAIN;
        let mut visited = FixedBitSet::with_capacity(len);
        for head in 0..len {
            if pointed.contains(head) || !in_chain(self.fat[head]) {
                continue;
            }
            let mut current = head;
            loop {
                visited.insert(current);
                match self.fat[current] {
                    next if next >= 0 => current = next as usize,
                    _ => break,
                }
            }
        }

        match (0..len).find(|&s| in_chain(self.fat[s]) && !visited.contains(s)) {
            Some(sector) => Err(Error::InconsistentLayout(format!(
                "sector {sector} is part of a cycle"
            ))),
            None => Ok(()),
        }
    }

    /// Pad to `fat_sectors` whole sectors of entries.
    ///
    /// Fails when the allocation does not fit, since the FAT would not be
    /// able to describe its own sectors.
    pub fn into_table(mut self, fat_sectors: usize) -> Result<AllocationTable> {
        let capacity = fat_sectors * ENTRIES_PER_SECTOR;
        if self.fat.len() > capacity {
            return Err(Error::InconsistentLayout(format!(
                "{} sectors do not fit in {fat_sectors} FAT sectors",
                self.fat.len()
            )));
        }
        self.fat.resize(capacity, FREESECT);
        Ok(AllocationTable::new(self.fat))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_chain() {
        let mut fat = FatBuilder::new();

        let start = fat.allocate_chain(2);
        assert_eq!(start, 0);
        assert_eq!(fat.total_sectors(), 2);
        assert_eq!(fat.fat()[0], 1);
        assert_eq!(fat.fat()[1], ENDOFCHAIN);

        let second = fat.allocate_chain(1);
        assert_eq!(second, 2);
        assert_eq!(fat.fat()[2], ENDOFCHAIN);
    }

    #[test]
    fn test_empty_chain() {
        let mut fat = FatBuilder::new();
        assert_eq!(fat.allocate_chain(0), ENDOFCHAIN);
        assert_eq!(fat.total_sectors(), 0);
    }

    #[test]
    fn test_allocate_special() {
        let mut fat = FatBuilder::new();
        fat.allocate_chain(1);
        assert_eq!(fat.allocate_special(2, FATSECT), 1);
        assert_eq!(fat.fat()[1], FATSECT);
        assert_eq!(fat.fat()[2], FATSECT);
        assert!(fat.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_cycle() {
        let mut fat = FatBuilder::new();
        fat.allocate_chain(3);
        fat.fat[2] = 1;
        assert!(matches!(fat.validate(), Err(Error::InconsistentLayout(_))));

        let mut ring = FatBuilder::new();
        ring.allocate_chain(2);
        ring.fat[1] = 0;
        assert!(ring.validate().is_err());
    }

    #[test]
    fn test_into_table_capacity() {
        let mut fat = FatBuilder::new();
        fat.allocate_chain(129);
        assert!(matches!(fat.into_table(1), Err(Error::InconsistentLayout(_))));

        let mut fat = FatBuilder::new();
        fat.allocate_chain(3);
        let table = fat.into_table(1).unwrap();
        assert_eq!(table.len(), 128);
        assert_eq!(table.get(3), Some(FREESECT));
    }

    #[test]
    fn test_sector_counts() {
        assert_eq!(fat_sector_count(0), 0);
        assert_eq!(fat_sector_count(1), 1);
        assert_eq!(difat_sector_count(109), 0);
        assert_eq!(difat_sector_count(110), 1);
        assert_eq!(difat_sector_count(109 + 127 + 1), 2);
    }

    #[test]
    fn test_table_counts_include_themselves() {
        // 127 data sectors plus one FAT sector fit in one FAT sector
        assert_eq!(table_sector_counts(127), (1, 0));
        // 128 data sectors need a second FAT sector once the first is counted
        assert_eq!(table_sector_counts(128), (2, 0));
        let (fat, difat) = table_sector_counts(20_000);
        assert!(fat > HEADER_DIFAT_LEN);
        assert_eq!(difat, difat_sector_count(fat));
        assert!(fat * ENTRIES_PER_SECTOR >= 20_000 + fat + difat);
    }
}
