//! Extra DIFAT generation for the write pass
//!
//! The header lists the first 109 FAT sectors. Containers with more FAT
//! sectors list the rest in extra DIFAT sectors, each holding 127
//! locations followed by the number of the next DIFAT sector.

use super::super::consts::*;
use super::super::sector::{Sector, SectorKind};

/// DIFAT builder for large containers
#[derive(Debug, Default)]
pub struct DifatBuilder {
    /// FAT sector numbers beyond the first 109
    fat_sector_ids: Vec<i32>,
}

impl DifatBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the complete list of FAT sector numbers; the first 109 stay in
    /// the header.
    pub fn set_fat_sectors(&mut self, fat_sectors: &[i32]) {
        self.fat_sector_ids = fat_sectors
            .get(HEADER_DIFAT_LEN..)
            .map(<[i32]>::to_vec)
            .unwrap_or_default();
    }

    pub fn calculate_difat_sector_count(&self) -> usize {
        self.fat_sector_ids.len().div_ceil(DIFAT_ENTRIES_PER_SECTOR)
    }

    pub fn is_needed(&self) -> bool {
        !self.fat_sector_ids.is_empty()
    }

    /// Build the DIFAT chain starting at sector `first_difat_sector`.
    ///
    /// Unused slots hold `FREESECT`; the last sector's next pointer is
    /// `ENDOFCHAIN`.
    pub fn generate_difat_sectors(&self, first_difat_sector: i32) -> Vec<Sector> {
        let count = self.calculate_difat_sector_count();
        let mut sectors = Vec::with_capacity(count);

        for (difat_idx, ids) in self
            .fat_sector_ids
            .chunks(DIFAT_ENTRIES_PER_SECTOR)
            .enumerate()
        {
            let mut entries = [FREESECT; ENTRIES_PER_SECTOR];
            entries[..ids.len()].copy_from_slice(ids);
            entries[ENTRIES_PER_SECTOR - 1] = if difat_idx + 1 < count {
                first_difat_sector + difat_idx as i32 + 1
            } else {
                ENDOFCHAIN
            };

            let data: Vec<u8> = entries.iter().flat_map(|e| e.to_le_bytes()).collect();
            let mut sector = Sector::from_bytes(&data, SectorKind::Big)
                .pop()
                .unwrap_or_else(|| Sector::prototype(SectorKind::Big));
            sector.set_extra_difat();
            sectors.push(sector);
        }

        sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::binary::read_i32_le;

    #[test]
    fn test_no_difat_needed() {
        let mut difat = DifatBuilder::new();
        difat.set_fat_sectors(&(0..109).collect::<Vec<i32>>());
        assert!(!difat.is_needed());
        assert_eq!(difat.calculate_difat_sector_count(), 0);
        assert!(difat.generate_difat_sectors(0).is_empty());
    }

    #[test]
    fn test_difat_generation() {
        let mut difat = DifatBuilder::new();

        // 150 FAT sectors: 109 in the header, 41 in one DIFAT sector
        let fat_sectors: Vec<i32> = (0..150).collect();
        difat.set_fat_sectors(&fat_sectors);
        assert_eq!(difat.calculate_difat_sector_count(), 1);

        let sectors = difat.generate_difat_sectors(200);
        assert_eq!(sectors.len(), 1);
        assert!(sectors[0].is_extra_difat());
        let data = sectors[0].data();
        assert_eq!(read_i32_le(data, 0).unwrap(), 109);
        assert_eq!(read_i32_le(data, 40 * 4).unwrap(), 149);
        assert_eq!(read_i32_le(data, 41 * 4).unwrap(), FREESECT);
        assert_eq!(read_i32_le(data, 508).unwrap(), ENDOFCHAIN);
    }

    #[test]
    fn test_difat_multiple_sectors() {
        let mut difat = DifatBuilder::new();

        // 141 locations beyond the header need 2 DIFAT sectors (127 + 14)
        let fat_sectors: Vec<i32> = (0..250).collect();
        difat.set_fat_sectors(&fat_sectors);
        assert_eq!(difat.calculate_difat_sector_count(), 2);

        let sectors = difat.generate_difat_sectors(300);
        assert_eq!(sectors.len(), 2);
        assert_eq!(read_i32_le(sectors[0].data(), 508).unwrap(), 301);
        assert_eq!(read_i32_le(sectors[1].data(), 0).unwrap(), 109 + 127);
        assert_eq!(read_i32_le(sectors[1].data(), 508).unwrap(), ENDOFCHAIN);
    }
}
