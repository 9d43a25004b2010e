//! Two-pass write layout
//!
//! The first pass sizes every region and hands out sector numbers; the
//! second assembles the sectors in that order:
//!
//! ```text
//! header | primary content | other big storages | ministream | miniFAT
//!        | directory | FAT | extra DIFAT | encryption trailer
//! ```
//!
//! Primary content is not held by the container. The layout only reserves
//! its slot, and the caller supplies the bytes when the list is streamed.

use std::io::Write;

use bytes::Bytes;

use super::super::consts::*;
use super::super::diagnostics::{Anomaly, Diagnostics};
use super::super::header::Header;
use super::super::sector::{Sector, SectorKind};
use super::super::storage::{SectorChain, StorageType};
use super::super::table::StorageTable;
use super::difat::DifatBuilder;
use super::fat::{FatBuilder, table_sector_counts};
use super::minifat::MiniFatBuilder;
use crate::common::error::{Error, Result};

/// Big sectors reserved for primary content of `len` bytes.
///
/// Primary content never drops below the cutoff so it stays in the FAT.
pub fn primary_sector_count(len: usize, cutoff: usize) -> usize {
    SectorKind::Big
        .count_for(len)
        .max(SectorKind::Big.count_for(cutoff))
}

/// Ordered output of a layout pass.
#[derive(Debug)]
pub struct SectorList {
    header: Header,
    primary_sectors: usize,
    primary_len: usize,
    sectors: Vec<Sector>,
    trailer: Option<Bytes>,
}

impl SectorList {
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Big sectors reserved for the primary content.
    pub fn primary_sectors(&self) -> usize {
        self.primary_sectors
    }

    /// Byte length the primary content must have when streamed.
    pub fn primary_len(&self) -> usize {
        self.primary_len
    }

    /// Every sector after the primary content, in output order.
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// Bytes appended after the last sector.
    pub fn trailer(&self) -> Option<&Bytes> {
        self.trailer.as_ref()
    }

    /// Sectors after the header, primary content included.
    pub fn total_sectors(&self) -> usize {
        self.primary_sectors + self.sectors.len()
    }

    /// Size of the serialized container.
    pub fn byte_len(&self) -> usize {
        (1 + self.total_sectors()) * BIG_SECTOR_SIZE + self.trailer.as_ref().map_or(0, Bytes::len)
    }

    /// Stream the container to `out`.
    ///
    /// `primary` must have exactly the length the layout was computed for.
    pub fn write_to<W: Write + ?Sized>(&mut self, out: &mut W, primary: &[u8]) -> Result<()> {
        if primary.len() != self.primary_len {
            return Err(Error::InconsistentLayout(format!(
                "primary content is {} bytes, layout was computed for {}",
                primary.len(),
                self.primary_len
            )));
        }

        out.write_all(self.header.as_bytes())?;
        out.write_all(primary)?;
        let pad = self.primary_sectors * BIG_SECTOR_SIZE - primary.len();
        out.write_all(&vec![0u8; pad])?;

        for sector in &mut self.sectors {
            out.write_all(&sector.padded_bytes())?;
            sector.mark_streamed();
        }

        if let Some(trailer) = &self.trailer {
            out.write_all(trailer)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Serialize into a fresh buffer.
    pub fn to_vec(&mut self, primary: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.byte_len());
        self.write_to(&mut out, primary)?;
        Ok(out)
    }
}

/// A non-primary storage and where its content goes.
enum Placement {
    Big { id: usize, sectors: Vec<Sector> },
    Mini { id: usize, start: i32 },
    Empty { id: usize },
}

/// Lay out every storage of `table` around primary content of
/// `primary_len` bytes held by entry `primary_id`.
///
/// Directory start sectors and sizes are only updated once the whole
/// layout is known to be consistent.
pub(crate) fn layout(
    table: &mut StorageTable,
    arena: &[Sector],
    primary_id: usize,
    primary_len: usize,
    trailer: Option<Bytes>,
    diag: &mut Diagnostics,
) -> Result<SectorList> {
    let cutoff = table.cutoff();
    table.relink();

    let primary_sectors = primary_sector_count(primary_len, cutoff);
    let declared = primary_len.max(cutoff);
    if declared != primary_len {
        diag.record(Anomaly::PrimaryPadded {
            len: primary_len,
            padded: declared,
        });
    }

    let mut minifat = MiniFatBuilder::new();
    let mut placements = Vec::with_capacity(table.len());
    for (id, storage) in table.entries().iter().enumerate().skip(1) {
        if id == primary_id || storage.storage_type() == StorageType::Unallocated {
            continue;
        }
        let sectors = table.sectors_of(storage, arena);
        let placement = match storage.chain() {
            SectorChain::Empty => Placement::Empty { id },
            _ if sectors.is_empty() => Placement::Empty { id },
            chain if chain.kind() == Some(SectorKind::Mini) => Placement::Mini {
                id,
                start: minifat.allocate_mini_chain(&sectors),
            },
            _ => Placement::Big {
                id,
                sectors: sectors.iter().map(|s| s.relocated(0)).collect(),
            },
        };
        placements.push(placement);
    }
    let mini = minifat.finish();

    let big_sectors: usize = placements
        .iter()
        .map(|p| match p {
            Placement::Big { sectors, .. } => sectors.len(),
            _ => 0,
        })
        .sum();
    let directory_sectors =
        table.len().next_multiple_of(DIRENTRIES_PER_SECTOR) / DIRENTRIES_PER_SECTOR;
    let data_sectors = primary_sectors
        + big_sectors
        + mini.ministream.len()
        + mini.mini_fat.len()
        + directory_sectors;
    let (fat_sectors, difat_sectors) = table_sector_counts(data_sectors);

    let mut fat = FatBuilder::new();
    let primary_start = fat.allocate_chain(primary_sectors);
    let mut starts = Vec::with_capacity(placements.len());
    for placement in &placements {
        match placement {
            Placement::Big { id, sectors } => {
                starts.push((*id, fat.allocate_chain(sectors.len())));
            },
            Placement::Mini { id, start } => starts.push((*id, *start)),
            Placement::Empty { id } => {
                if table.by_id(*id).map(|s| s.storage_type()) == Some(StorageType::Stream) {
                    starts.push((*id, ENDOFCHAIN));
                }
            },
        }
    }
    let ministream_start = fat.allocate_chain(mini.ministream.len());
    let mini_fat_start = fat.allocate_chain(mini.mini_fat.len());
    let directory_start = fat.allocate_chain(directory_sectors);
    let fat_start = fat.allocate_special(fat_sectors, FATSECT);
    let difat_start = fat.allocate_special(difat_sectors, DIFSECT);

    fat.validate()?;
    let total = fat.total_sectors();
    let fat_table = fat.into_table(fat_sectors)?;

    let fat_ids: Vec<i32> = (0..fat_sectors as i32).map(|i| fat_start + i).collect();
    let mut difat = DifatBuilder::new();
    difat.set_fat_sectors(&fat_ids);
    if difat.calculate_difat_sector_count() != difat_sectors {
        return Err(Error::InconsistentLayout(format!(
            "{} FAT sectors need {} DIFAT sectors, {difat_sectors} reserved",
            fat_sectors,
            difat.calculate_difat_sector_count()
        )));
    }

    let mut header = Header::prototype(cutoff as u32);
    header.set_num_fat_sectors(fat_sectors as i32);
    header.set_root_start(directory_start);
    header.set_mini_fat(mini_fat_start, mini.mini_fat.len() as i32);
    header.set_extra_difat(difat_start, difat_sectors as i32);
    let fat_positions: Vec<usize> = fat_ids.iter().map(|&s| s as usize + 1).collect();
    header.set_difat(&fat_positions)?;

    // Layout is consistent: commit start sectors and sizes.
    if let Some(primary) = table.by_id_mut(primary_id) {
        primary.set_start_sector(primary_start);
        primary.set_size(declared);
    }
    for &(id, start) in &starts {
        if let Some(storage) = table.by_id_mut(id) {
            storage.set_start_sector(start);
        }
    }
    if let Some(root) = table.root_mut() {
        root.set_start_sector(ministream_start);
        root.set_size(mini.ministream_size);
    }
    let directory = table.rebuild_root_store();
    let directory = table.set_root_content_from_big_chain(&directory).to_vec();
    if directory.len() != directory_sectors {
        return Err(Error::InconsistentLayout(format!(
            "directory needs {} sectors, {directory_sectors} reserved",
            directory.len()
        )));
    }

    let mut sectors = Vec::with_capacity(total - primary_sectors);
    for placement in placements {
        if let Placement::Big { sectors: content, .. } = placement {
            sectors.extend(content);
        }
    }
    sectors.extend(mini.ministream);
    sectors.extend(mini.mini_fat);
    sectors.extend(directory);
    sectors.extend(fat_table.to_sectors());
    sectors.extend(difat.generate_difat_sectors(difat_start));

    if primary_sectors + sectors.len() != total {
        return Err(Error::InconsistentLayout(format!(
            "assembled {} sectors, allocated {total}",
            primary_sectors + sectors.len()
        )));
    }
    for (i, sector) in sectors.iter_mut().enumerate() {
        sector.set_index(1 + primary_sectors + i);
    }

    tracing::debug!(
        total,
        primary_sectors,
        fat_sectors,
        difat_sectors,
        mini_sectors = mini.ministream_size / MINI_SECTOR_SIZE,
        "layout computed"
    );

    Ok(SectorList {
        header,
        primary_sectors,
        primary_len,
        sectors,
        trailer,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leo::fat::AllocationTable;

    #[test]
    fn test_primary_sector_count() {
        assert_eq!(primary_sector_count(1000, 512), 2);
        assert_eq!(primary_sector_count(1024, 512), 2);
        assert_eq!(primary_sector_count(100, 4096), 8);
        assert_eq!(primary_sector_count(5000, 4096), 10);
    }

    fn sample_table() -> StorageTable {
        let mut table = StorageTable::new(4096);
        let primary = table.create_storage(WORKBOOK, StorageType::Stream, None).unwrap();
        let small = table.create_storage("Small", StorageType::Stream, None).unwrap();
        let large = table.create_storage("Large", StorageType::Stream, None).unwrap();
        table.by_id_mut(primary).unwrap().set_size(0);
        table.by_id_mut(small).unwrap().set_content(&[7u8; 100], 4096);
        table.by_id_mut(large).unwrap().set_content(&[9u8; 5000], 4096);
        table
    }

    #[test]
    fn test_layout_order() {
        let mut table = sample_table();
        let mut diag = Diagnostics::new();
        let list = layout(&mut table, &[], 1, 4096, None, &mut diag).unwrap();
        assert!(diag.is_empty());

        // primary 8 | large 10 | ministream 1 | miniFAT 1 | directory 1 | FAT 1
        assert_eq!(list.primary_sectors(), 8);
        assert_eq!(list.total_sectors(), 22);
        let header = list.header();
        assert_eq!(header.num_fat_sectors(), 1);
        assert_eq!(header.mini_fat_start(), 19);
        assert_eq!(header.num_mini_fat_sectors(), 1);
        assert_eq!(header.root_start(), 20);
        assert_eq!(header.difat_entry(0), Some(21));
        assert_eq!(header.difat_entry(1), Some(FREESECT));
        assert_eq!(header.extra_difat_start(), ENDOFCHAIN);

        assert_eq!(table.get("Large").unwrap().start_sector(), 8);
        assert_eq!(table.get("Small").unwrap().start_sector(), 0);
        assert_eq!(table.root().unwrap().start_sector(), 18);
        assert_eq!(table.root().unwrap().size(), 128);

        let fat = AllocationTable::from_sectors(&list.sectors()[list.sectors().len() - 1..]);
        assert_eq!(fat.get(7), Some(ENDOFCHAIN));
        assert_eq!(fat.get(17), Some(ENDOFCHAIN));
        assert_eq!(fat.get(21), Some(FATSECT));
        assert_eq!(fat.get(22), Some(FREESECT));
    }

    #[test]
    fn test_short_primary_is_padded() {
        let mut table = sample_table();
        let mut diag = Diagnostics::new();
        let list = layout(&mut table, &[], 1, 100, None, &mut diag).unwrap();
        assert_eq!(list.primary_sectors(), 8);
        assert_eq!(table.get(WORKBOOK).unwrap().size(), 4096);
        assert!(matches!(
            diag.anomalies()[0],
            Anomaly::PrimaryPadded {
                len: 100,
                padded: 4096
            }
        ));
    }

    #[test]
    fn test_write_checks_primary_length() {
        let mut table = sample_table();
        let mut diag = Diagnostics::new();
        let mut list = layout(&mut table, &[], 1, 4096, None, &mut diag).unwrap();
        assert!(matches!(
            list.to_vec(&[0u8; 10]),
            Err(Error::InconsistentLayout(_))
        ));

        let bytes = list.to_vec(&[1u8; 4096]).unwrap();
        assert_eq!(bytes.len(), 23 * 512);
        assert_eq!(bytes.len(), list.byte_len());
        assert_eq!(&bytes[..8], MAGIC);
        assert!(list.sectors().iter().all(Sector::is_streamed));
    }

    #[test]
    fn test_trailer_is_appended() {
        let mut table = sample_table();
        let mut diag = Diagnostics::new();
        let trailer = Bytes::from_static(&[0xEE; 17]);
        let mut list = layout(&mut table, &[], 1, 4096, Some(trailer), &mut diag).unwrap();
        let bytes = list.to_vec(&[0u8; 4096]).unwrap();
        assert_eq!(bytes.len() % 512, 17);
        assert!(bytes[bytes.len() - 17..].iter().all(|&b| b == 0xEE));
    }
}
