//! The 512-byte container header.
//!
//! Sector numbers in the header are zero-based and do not count the header
//! block itself. Helpers that return arena positions add one; helpers that
//! take arena positions subtract one before storing.

use zerocopy::{FromBytes, FromZeros, I32, IntoBytes, LE, U16, U32};
use zerocopy_derive::{
    FromBytes as DeriveFromBytes, Immutable as DeriveImmutable, IntoBytes as DeriveIntoBytes,
    KnownLayout as DeriveKnownLayout,
};

use super::consts::*;
use super::sector::{Sector, SectorKind};
use crate::common::error::{Error, Result};

/// On-disk header layout.
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, DeriveKnownLayout, DeriveImmutable)]
#[repr(C)]
struct RawHeader {
    /// 0x00: magic
    signature: [u8; 8],
    /// 0x08: header CLSID, must be zero in its first eight bytes
    clsid: [u8; 16],
    /// 0x18
    minor_version: U16<LE>,
    /// 0x1A
    major_version: U16<LE>,
    /// 0x1C
    byte_order: U16<LE>,
    /// 0x1E
    sector_shift: U16<LE>,
    /// 0x20
    mini_sector_shift: U16<LE>,
    /// 0x22
    reserved: [u8; 6],
    /// 0x28
    num_dir_sectors: I32<LE>,
    /// 0x2C
    num_fat_sectors: I32<LE>,
    /// 0x30
    root_start: I32<LE>,
    /// 0x34
    transaction: I32<LE>,
    /// 0x38
    min_stream_size: U32<LE>,
    /// 0x3C
    mini_fat_start: I32<LE>,
    /// 0x40
    num_mini_fat_sectors: I32<LE>,
    /// 0x44
    extra_difat_start: I32<LE>,
    /// 0x48
    num_extra_difat_sectors: I32<LE>,
    /// 0x4C: first 109 FAT sector locations
    difat: [I32<LE>; HEADER_DIFAT_LEN],
}

/// Parsed header plus the bytes it came from.
#[derive(Debug, Clone)]
pub struct Header {
    raw: RawHeader,
}

impl Header {
    /// Parse and validate the first 512 bytes of a container.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(Error::InvalidFormat(format!(
                "header needs {HEADER_SIZE} bytes, got {}",
                data.len()
            )));
        }
        if &data[..8] != MAGIC || data[8..SIGNATURE_LEN].iter().any(|&b| b != 0) {
            return Err(Error::InvalidFormat(
                "signature mismatch, not a compound container".to_string(),
            ));
        }

        let raw = RawHeader::read_from_bytes(&data[..HEADER_SIZE])
            .map_err(|_| Error::InvalidFormat("unreadable header".to_string()))?;

        let header = Self { raw };
        if header.num_fat_sectors() < 0 || header.num_extra_difat_sectors() < 0 {
            return Err(Error::InvalidFormat(
                "negative allocation table count in header".to_string(),
            ));
        }
        Ok(header)
    }

    /// A fresh header with fixed constants, no FAT sectors and no mini
    /// allocator.
    pub fn prototype(min_stream_size: u32) -> Self {
        let mut raw = RawHeader::new_zeroed();
        raw.signature = *MAGIC;
        raw.minor_version = U16::new(MINOR_VERSION);
        raw.major_version = U16::new(MAJOR_VERSION);
        raw.byte_order = U16::new(BYTE_ORDER);
        raw.sector_shift = U16::new(SECTOR_SHIFT);
        raw.mini_sector_shift = U16::new(MINI_SECTOR_SHIFT);
        raw.min_stream_size = U32::new(min_stream_size);
        raw.mini_fat_start = I32::new(ENDOFCHAIN);
        raw.extra_difat_start = I32::new(ENDOFCHAIN);
        raw.difat = [I32::new(FREESECT); HEADER_DIFAT_LEN];
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.raw.as_bytes()
    }

    /// The header as the first sector of the output.
    pub fn to_sector(&self) -> Sector {
        let mut sectors = Sector::from_bytes(self.as_bytes(), SectorKind::Big);
        let mut sector = sectors.pop().unwrap_or_else(|| Sector::prototype(SectorKind::Big));
        sector.set_special();
        sector
    }

    pub fn num_fat_sectors(&self) -> i32 {
        self.raw.num_fat_sectors.get()
    }

    pub fn set_num_fat_sectors(&mut self, count: i32) {
        self.raw.num_fat_sectors = I32::new(count);
    }

    /// Zero-based sector of the directory stream.
    pub fn root_start(&self) -> i32 {
        self.raw.root_start.get()
    }

    pub fn set_root_start(&mut self, sector: i32) {
        self.raw.root_start = I32::new(sector);
    }

    /// Byte offset of the directory stream's first sector.
    pub fn root_start_pos(&self) -> Option<u64> {
        u64::try_from(self.root_start())
            .ok()
            .map(|s| (s + 1) * BIG_SECTOR_SIZE as u64)
    }

    /// Big/mini allocation cutoff.
    pub fn min_stream_size(&self) -> u32 {
        self.raw.min_stream_size.get()
    }

    /// Cutoff, falling back to the default when the header carries zero.
    pub fn cutoff(&self) -> usize {
        match self.min_stream_size() {
            0 => DEFAULT_MIN_STREAM_SIZE as usize,
            size => size as usize,
        }
    }

    /// Minimum stream size expressed in big sectors.
    pub fn min_blocks(&self) -> usize {
        self.cutoff() / BIG_SECTOR_SIZE
    }

    pub fn mini_fat_start(&self) -> i32 {
        self.raw.mini_fat_start.get()
    }

    pub fn num_mini_fat_sectors(&self) -> i32 {
        self.raw.num_mini_fat_sectors.get()
    }

    pub fn set_mini_fat(&mut self, start: i32, count: i32) {
        self.raw.mini_fat_start = I32::new(start);
        self.raw.num_mini_fat_sectors = I32::new(count);
    }

    pub fn extra_difat_start(&self) -> i32 {
        self.raw.extra_difat_start.get()
    }

    pub fn num_extra_difat_sectors(&self) -> i32 {
        self.raw.num_extra_difat_sectors.get()
    }

    pub fn set_extra_difat(&mut self, start: i32, count: i32) {
        self.raw.extra_difat_start = I32::new(start);
        self.raw.num_extra_difat_sectors = I32::new(count);
    }

    /// Raw inline DIFAT slot `i` (zero-based sector or -1).
    pub fn difat_entry(&self, i: usize) -> Option<i32> {
        self.raw.difat.get(i).map(|v| v.get())
    }

    /// Arena positions of the FAT sectors listed inline in the header.
    ///
    /// Only the first `min(num_fat_sectors, 109)` slots are used.
    pub fn difat(&self) -> Result<Vec<usize>> {
        let count = (self.num_fat_sectors().max(0) as usize).min(HEADER_DIFAT_LEN);
        self.raw.difat[..count]
            .iter()
            .map(|v| {
                let stored = v.get();
                usize::try_from(stored).map(|s| s + 1).map_err(|_| {
                    Error::InvalidFormat(format!("invalid FAT sector location {stored} in header"))
                })
            })
            .collect()
    }

    /// Store up to 109 FAT sector arena positions, filling the rest with -1.
    ///
    /// The FAT sector count is left alone; containers with more than 109
    /// FAT sectors carry the remainder in extra DIFAT sectors.
    pub fn set_difat(&mut self, positions: &[usize]) -> Result<()> {
        let mut slots = [I32::new(FREESECT); HEADER_DIFAT_LEN];
        for (slot, &pos) in slots.iter_mut().zip(positions) {
            let stored = pos
                .checked_sub(1)
                .and_then(|s| i32::try_from(s).ok())
                .ok_or_else(|| {
                    Error::InconsistentLayout(format!("FAT sector position {pos} cannot be stored"))
                })?;
            *slot = I32::new(stored);
        }
        self.raw.difat = slots;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::binary::read_i32_le;

    #[test]
    fn test_prototype_constants() {
        let header = Header::prototype(4096);
        let bytes = header.as_bytes();
        assert_eq!(bytes.len(), 512);
        assert_eq!(&bytes[..8], MAGIC);
        assert_eq!(u16::from_le_bytes([bytes[0x1E], bytes[0x1F]]), 9);
        assert_eq!(u16::from_le_bytes([bytes[0x20], bytes[0x21]]), 6);
        assert_eq!(read_i32_le(bytes, 0x38).unwrap(), 4096);
        assert_eq!(read_i32_le(bytes, 0x3C).unwrap(), ENDOFCHAIN);
        assert_eq!(read_i32_le(bytes, 0x44).unwrap(), ENDOFCHAIN);
        assert_eq!(read_i32_le(bytes, 0x4C).unwrap(), FREESECT);
    }

    #[test]
    fn test_round_trip() {
        let mut header = Header::prototype(4096);
        header.set_num_fat_sectors(3);
        header.set_root_start(1);
        header.set_difat(&[5, 6, 7]).unwrap();

        let decoded = Header::parse(header.as_bytes()).unwrap();
        assert_eq!(decoded.num_fat_sectors(), 3);
        assert_eq!(decoded.root_start(), 1);
        assert_eq!(decoded.root_start_pos(), Some(1024));
        assert_eq!(decoded.mini_fat_start(), ENDOFCHAIN);
        assert_eq!(decoded.num_extra_difat_sectors(), 0);
        assert_eq!(decoded.difat().unwrap(), vec![5, 6, 7]);

        let bytes = decoded.as_bytes();
        assert_eq!(read_i32_le(bytes, 0x4C).unwrap(), 4);
        for slot in 3..HEADER_DIFAT_LEN {
            assert_eq!(read_i32_le(bytes, 0x4C + slot * 4).unwrap(), -1);
        }
    }

    #[test]
    fn test_magic_mismatch() {
        let mut bytes = Header::prototype(4096).as_bytes().to_vec();
        bytes[0] = 0x00;
        assert!(matches!(Header::parse(&bytes), Err(Error::InvalidFormat(_))));

        let mut bytes = Header::prototype(4096).as_bytes().to_vec();
        bytes[12] = 0x01;
        assert!(matches!(Header::parse(&bytes), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_short_input() {
        assert!(matches!(Header::parse(&[0u8; 100]), Err(Error::InvalidFormat(_))));
    }

    #[test]
    fn test_min_blocks() {
        assert_eq!(Header::prototype(4096).min_blocks(), 8);
        assert_eq!(Header::prototype(0).cutoff(), 4096);
    }

    #[test]
    fn test_header_sector_is_special() {
        let sector = Header::prototype(4096).to_sector();
        assert!(sector.is_special());
        assert_eq!(sector.data().len(), 512);
    }
}
