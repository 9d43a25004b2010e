//! Fixed-size sectors, the unit every container structure is built from.
//!
//! A [`Sector`] is a zero-copy view into the source buffer (or a freshly
//! built buffer on the write path) plus the bookkeeping the engine needs:
//! which storage owns it, whether it holds allocation tables, and whether it
//! has been streamed out.

use std::borrow::Cow;

use bitflags::bitflags;
use bytes::Bytes;

use super::consts::{BIG_SECTOR_SIZE, MINI_SECTOR_SIZE};

/// Sector granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectorKind {
    /// 512-byte sector addressed through the FAT
    Big,
    /// 64-byte sector inside the ministream, addressed through the miniFAT
    Mini,
}

impl SectorKind {
    /// Sector size in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            SectorKind::Big => BIG_SECTOR_SIZE,
            SectorKind::Mini => MINI_SECTOR_SIZE,
        }
    }

    /// Number of sectors needed to hold `len` bytes.
    ///
    /// ```
    /// use leofile::leo::SectorKind;
    /// assert_eq!(SectorKind::Big.count_for(1000), 2);
    /// assert_eq!(SectorKind::Big.count_for(1024), 2);
    /// assert_eq!(SectorKind::Mini.count_for(0), 0);
    /// ```
    #[inline]
    pub const fn count_for(self, len: usize) -> usize {
        len.div_ceil(self.size())
    }
}

bitflags! {
    /// Lifecycle and role bits of a sector.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SectorFlags: u8 {
        /// Claimed by a storage chain
        const INITIALIZED = 1 << 0;
        /// Already written to an output sink
        const STREAMED = 1 << 1;
        /// Holds FAT or miniFAT entries
        const DEPOT = 1 << 2;
        /// Holds extra DIFAT entries
        const EXTRA_DIFAT = 1 << 3;
        /// Never part of a data chain (header, depot, DIFAT)
        const SPECIAL = 1 << 4;
    }
}

/// A single big or mini sector.
#[derive(Debug, Clone)]
pub struct Sector {
    kind: SectorKind,
    /// Position in the owning arena
    index: usize,
    /// Byte offset in the source this sector was sliced from
    offset: u64,
    data: Bytes,
    flags: SectorFlags,
    /// Directory index of the storage that claimed this sector
    owner: Option<usize>,
    /// Arena index of the next sector in the owner's chain
    next: Option<usize>,
}

impl Sector {
    /// Wrap `data` as sector `index` of the given kind.
    ///
    /// `data` may be shorter than the sector size when the source ends
    /// mid-sector; readers see the short slice and writers zero-fill it.
    pub fn new(kind: SectorKind, index: usize, offset: u64, data: Bytes) -> Self {
        Self {
            kind,
            index,
            offset,
            data,
            flags: SectorFlags::empty(),
            owner: None,
            next: None,
        }
    }

    /// A zero-filled sector.
    pub fn prototype(kind: SectorKind) -> Self {
        Self::new(kind, 0, 0, Bytes::from(vec![0u8; kind.size()]))
    }

    /// Slice `data` into sectors, zero-filling the tail of the final one.
    pub fn from_bytes(data: &[u8], kind: SectorKind) -> Vec<Sector> {
        Self::from_shared(Bytes::copy_from_slice(data), kind)
    }

    /// Like [`Sector::from_bytes`] but shares full sectors with `data`.
    pub fn from_shared(data: Bytes, kind: SectorKind) -> Vec<Sector> {
        let size = kind.size();
        let count = kind.count_for(data.len());
        let mut sectors = Vec::with_capacity(count);

        for i in 0..count {
            let start = i * size;
            let end = (start + size).min(data.len());
            let chunk = if end - start == size {
                data.slice(start..end)
            } else {
                let mut padded = vec![0u8; size];
                padded[..end - start].copy_from_slice(&data[start..end]);
                Bytes::from(padded)
            };
            sectors.push(Sector::new(kind, i, start as u64, chunk));
        }

        sectors
    }

    /// A copy placed at output position `index`, sharing the bytes but
    /// with fresh flags and no owner.
    pub fn relocated(&self, index: usize) -> Sector {
        Sector::new(self.kind, index, self.offset, self.data.clone())
    }

    #[inline]
    pub fn kind(&self) -> SectorKind {
        self.kind
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.kind.size()
    }

    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn set_index(&mut self, index: usize) {
        self.index = index;
    }

    /// Source byte offset this sector was read from.
    #[inline]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Raw bytes as held, possibly shorter than the sector size.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle on the raw bytes.
    #[inline]
    pub fn shared(&self) -> Bytes {
        self.data.clone()
    }

    #[inline]
    pub fn is_truncated(&self) -> bool {
        self.data.len() < self.size()
    }

    /// Bytes `[start, end)` clamped to what the sector actually holds.
    ///
    /// A truncated sector yields a short (possibly empty) slice instead of
    /// an error.
    pub fn get_bytes(&self, start: usize, end: usize) -> &[u8] {
        let len = self.data.len();
        let end = end.min(len);
        let start = start.min(end);
        &self.data[start..end]
    }

    /// Full-size contents, zero-filled past the held bytes.
    pub fn padded_bytes(&self) -> Cow<'_, [u8]> {
        if self.is_truncated() {
            let mut full = vec![0u8; self.size()];
            full[..self.data.len()].copy_from_slice(&self.data);
            Cow::Owned(full)
        } else {
            Cow::Borrowed(&self.data[..self.size()])
        }
    }

    #[inline]
    pub fn flags(&self) -> SectorFlags {
        self.flags
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.flags.contains(SectorFlags::INITIALIZED)
    }

    /// Claim the sector for a storage.
    ///
    /// Returns `false` without changing anything if it was already claimed.
    pub fn mark_initialized(&mut self, owner: Option<usize>) -> bool {
        if self.is_initialized() {
            return false;
        }
        self.flags.insert(SectorFlags::INITIALIZED);
        self.owner = owner;
        true
    }

    #[inline]
    pub fn is_streamed(&self) -> bool {
        self.flags.contains(SectorFlags::STREAMED)
    }

    pub fn mark_streamed(&mut self) {
        self.flags.insert(SectorFlags::STREAMED);
    }

    #[inline]
    pub fn is_depot(&self) -> bool {
        self.flags.contains(SectorFlags::DEPOT)
    }

    /// Mark as an allocation-table sector. Depot sectors are also special.
    pub fn set_depot(&mut self) {
        self.flags.insert(SectorFlags::DEPOT | SectorFlags::SPECIAL);
    }

    #[inline]
    pub fn is_extra_difat(&self) -> bool {
        self.flags.contains(SectorFlags::EXTRA_DIFAT)
    }

    pub fn set_extra_difat(&mut self) {
        self.flags.insert(SectorFlags::EXTRA_DIFAT | SectorFlags::SPECIAL);
    }

    #[inline]
    pub fn is_special(&self) -> bool {
        self.flags.contains(SectorFlags::SPECIAL)
    }

    pub fn set_special(&mut self) {
        self.flags.insert(SectorFlags::SPECIAL);
    }

    #[inline]
    pub fn owner(&self) -> Option<usize> {
        self.owner
    }

    #[inline]
    pub fn next(&self) -> Option<usize> {
        self.next
    }

    pub fn set_next(&mut self, next: Option<usize>) {
        self.next = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prototype_is_zeroed() {
        let sector = Sector::prototype(SectorKind::Big);
        assert_eq!(sector.data().len(), 512);
        assert!(sector.data().iter().all(|&b| b == 0));
        assert!(!sector.is_truncated());
    }

    #[test]
    fn test_from_bytes_pads_tail() {
        let data: Vec<u8> = (0..100u8).collect();
        let sectors = Sector::from_bytes(&data, SectorKind::Mini);
        assert_eq!(sectors.len(), 2);
        assert_eq!(sectors[0].data(), &data[..64]);
        assert_eq!(&sectors[1].data()[..36], &data[64..]);
        assert!(sectors[1].data()[36..].iter().all(|&b| b == 0));
        assert_eq!(sectors[1].index(), 1);
        assert_eq!(sectors[1].offset(), 64);
    }

    #[test]
    fn test_from_bytes_exact_and_empty() {
        assert_eq!(Sector::from_bytes(&[1u8; 1024], SectorKind::Big).len(), 2);
        assert!(Sector::from_bytes(&[], SectorKind::Big).is_empty());
    }

    #[test]
    fn test_get_bytes_clamps() {
        let sector = Sector::new(SectorKind::Big, 0, 0, Bytes::from(vec![7u8; 10]));
        assert!(sector.is_truncated());
        assert_eq!(sector.get_bytes(4, 20).len(), 6);
        assert!(sector.get_bytes(12, 20).is_empty());
        assert_eq!(sector.padded_bytes().len(), 512);
    }

    #[test]
    fn test_claim_once() {
        let mut sector = Sector::prototype(SectorKind::Big);
        assert!(sector.mark_initialized(Some(3)));
        assert!(!sector.mark_initialized(Some(4)));
        assert_eq!(sector.owner(), Some(3));
    }

    #[test]
    fn test_depot_is_special() {
        let mut sector = Sector::prototype(SectorKind::Big);
        sector.set_depot();
        assert!(sector.is_depot());
        assert!(sector.is_special());
        assert!(!sector.is_extra_difat());
    }
}
