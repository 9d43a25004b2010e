//! Directory entries ("storages") and their sector chains.

use zerocopy::{FromBytes, FromZeros, I32, IntoBytes, LE, U16, U32, U64};
use zerocopy_derive::{
    FromBytes as DeriveFromBytes, Immutable as DeriveImmutable, IntoBytes as DeriveIntoBytes,
    KnownLayout as DeriveKnownLayout,
};

use super::consts::*;
use super::diagnostics::{Anomaly, Diagnostics};
use super::fat::{AllocationTable, WalkOptions};
use super::sector::{Sector, SectorKind};
use crate::common::binary::{encode_utf16le, parse_utf16le_string};
use crate::common::error::{Error, Result};

/// Raw directory entry structure (128 bytes)
#[derive(Debug, Clone, DeriveFromBytes, DeriveIntoBytes, DeriveKnownLayout, DeriveImmutable)]
#[repr(C)]
struct RawDirectoryEntry {
    /// Entry name in UTF-16LE (64 bytes, null-padded)
    name: [u8; 64],
    /// Length of name in bytes (including null terminator)
    name_len: U16<LE>,
    entry_type: u8,
    node_color: u8,
    sid_left: I32<LE>,
    sid_right: I32<LE>,
    sid_child: I32<LE>,
    clsid: [u8; 16],
    state_bits: U32<LE>,
    creation_time: U64<LE>,
    modified_time: U64<LE>,
    start_sector: I32<LE>,
    /// Only the low half is meaningful for 512-byte sectors
    size: U32<LE>,
    size_high: U32<LE>,
}

/// Directory entry type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StorageType {
    Unallocated = 0,
    Storage = 1,
    Stream = 2,
    LockBytes = 3,
    Property = 4,
    Root = 5,
}

impl StorageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(StorageType::Unallocated),
            1 => Some(StorageType::Storage),
            2 => Some(StorageType::Stream),
            3 => Some(StorageType::LockBytes),
            4 => Some(StorageType::Property),
            5 => Some(StorageType::Root),
            _ => None,
        }
    }
}

/// Red-black tree color of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeColor {
    Red = 0,
    Black = 1,
}

/// Where a storage's bytes live.
#[derive(Debug, Clone, Default)]
pub enum SectorChain {
    /// No content
    #[default]
    Empty,
    /// Positions in the container's big-sector arena
    Big(Vec<usize>),
    /// Positions in the ministream
    Mini(Vec<usize>),
    /// Sectors built in memory, not backed by the source
    Owned(SectorKind, Vec<Sector>),
}

impl SectorChain {
    pub fn kind(&self) -> Option<SectorKind> {
        match self {
            SectorChain::Empty => None,
            SectorChain::Big(_) => Some(SectorKind::Big),
            SectorChain::Mini(_) => Some(SectorKind::Mini),
            SectorChain::Owned(kind, _) => Some(*kind),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            SectorChain::Empty => 0,
            SectorChain::Big(positions) | SectorChain::Mini(positions) => positions.len(),
            SectorChain::Owned(_, sectors) => sectors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One directory entry together with the chain holding its bytes.
#[derive(Debug, Clone)]
pub struct Storage {
    raw: RawDirectoryEntry,
    name: String,
    chain: SectorChain,
}

impl Storage {
    /// A detached entry with no links and no content.
    pub fn new(name: &str, storage_type: StorageType) -> Self {
        let mut storage = Self {
            raw: RawDirectoryEntry::new_zeroed(),
            name: String::new(),
            chain: SectorChain::Empty,
        };
        storage.set_name(name);
        storage.set_storage_type(storage_type);
        storage.set_color(NodeColor::Black);
        storage.set_previous(NOSTREAM);
        storage.set_next(NOSTREAM);
        storage.set_child(NOSTREAM);
        storage.set_start_sector(ENDOFCHAIN);
        storage
    }

    /// An unallocated record, used to pad the directory stream.
    pub fn unallocated() -> Self {
        let mut storage = Self::new("", StorageType::Unallocated);
        storage.set_color(NodeColor::Red);
        storage.set_start_sector(0);
        storage
    }

    /// Decode a 128-byte directory record.
    pub fn parse(record: &[u8]) -> Result<Self> {
        let record = record.get(..DIRENTRY_SIZE).ok_or_else(|| {
            Error::InvalidFormat(format!("directory record of {} bytes", record.len()))
        })?;
        let raw = RawDirectoryEntry::read_from_bytes(record)
            .map_err(|_| Error::InvalidFormat("Failed to parse directory entry".to_string()))?;

        let name_len = raw.name_len.get() as usize;
        let name = parse_utf16le_string(&raw.name[..name_len.saturating_sub(2).min(64)]);

        Ok(Self {
            raw,
            name,
            chain: SectorChain::Empty,
        })
    }

    /// Encode back to a 128-byte record, preserving fields this crate
    /// does not interpret (CLSID, state bits, timestamps).
    pub fn to_bytes(&self) -> [u8; DIRENTRY_SIZE] {
        let mut out = [0u8; DIRENTRY_SIZE];
        out.copy_from_slice(self.raw.as_bytes());
        out
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Rename, truncating to 31 UTF-16 code units.
    pub fn set_name(&mut self, name: &str) {
        let encoded = encode_utf16le(name, MAX_NAME_UNITS);
        self.raw.name = [0u8; 64];
        self.raw.name[..encoded.len()].copy_from_slice(&encoded);
        let name_len = if encoded.is_empty() {
            0
        } else {
            encoded.len() + 2
        };
        self.raw.name_len = U16::new(name_len as u16);
        self.name = parse_utf16le_string(&encoded);
    }

    /// Entry type; unknown type bytes read as unallocated.
    pub fn storage_type(&self) -> StorageType {
        StorageType::from_u8(self.raw.entry_type).unwrap_or(StorageType::Unallocated)
    }

    pub fn set_storage_type(&mut self, storage_type: StorageType) {
        self.raw.entry_type = storage_type as u8;
    }

    pub fn color(&self) -> NodeColor {
        if self.raw.node_color == 0 {
            NodeColor::Red
        } else {
            NodeColor::Black
        }
    }

    pub fn set_color(&mut self, color: NodeColor) {
        self.raw.node_color = color as u8;
    }

    /// Left sibling index, or -1.
    pub fn previous(&self) -> i32 {
        self.raw.sid_left.get()
    }

    pub fn set_previous(&mut self, id: i32) {
        self.raw.sid_left = I32::new(id);
    }

    /// Right sibling index, or -1.
    pub fn next(&self) -> i32 {
        self.raw.sid_right.get()
    }

    pub fn set_next(&mut self, id: i32) {
        self.raw.sid_right = I32::new(id);
    }

    /// First child index, or -1.
    pub fn child(&self) -> i32 {
        self.raw.sid_child.get()
    }

    pub fn set_child(&mut self, id: i32) {
        self.raw.sid_child = I32::new(id);
    }

    pub fn clsid(&self) -> &[u8; 16] {
        &self.raw.clsid
    }

    /// First sector of the chain, zero-based, in the table the length selects.
    pub fn start_sector(&self) -> i32 {
        self.raw.start_sector.get()
    }

    pub fn set_start_sector(&mut self, sector: i32) {
        self.raw.start_sector = I32::new(sector);
    }

    /// Declared length in bytes.
    pub fn size(&self) -> usize {
        self.raw.size.get() as usize
    }

    pub fn set_size(&mut self, size: usize) {
        self.raw.size = U32::new(size as u32);
        self.raw.size_high = U32::new(0);
    }

    pub fn chain(&self) -> &SectorChain {
        &self.chain
    }

    pub fn set_chain(&mut self, chain: SectorChain) {
        self.chain = chain;
    }

    /// Granularity of the resolved chain, `None` when it has no sectors.
    pub fn kind(&self) -> Option<SectorKind> {
        self.chain.kind()
    }

    pub fn is_mini(&self) -> bool {
        self.kind() == Some(SectorKind::Mini)
    }

    pub fn sector_count(&self) -> usize {
        self.chain.len()
    }

    /// Which table a stream of the declared length is allocated from.
    pub fn allocation(&self, cutoff: usize) -> Option<SectorKind> {
        match self.size() {
            0 => None,
            n if n < cutoff => Some(SectorKind::Mini),
            _ => Some(SectorKind::Big),
        }
    }

    /// Replace the content with `data`, split into mini sectors below the
    /// cutoff and big sectors otherwise.
    pub fn set_content(&mut self, data: &[u8], cutoff: usize) {
        self.set_size(data.len());
        self.chain = match data.len() {
            0 => SectorChain::Empty,
            n if n < cutoff => {
                SectorChain::Owned(SectorKind::Mini, Sector::from_bytes(data, SectorKind::Mini))
            },
            _ => SectorChain::Owned(SectorKind::Big, Sector::from_bytes(data, SectorKind::Big)),
        };
    }

    /// Resolve the chain through the FAT and claim its big sectors.
    pub fn resolve(
        &mut self,
        id: usize,
        arena: &mut [Sector],
        fat: &AllocationTable,
        keep_start: bool,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let opts = WalkOptions {
            storage: &self.name,
            keep_start,
            declared_len: self.size(),
            addressable: arena.len().saturating_sub(1),
        };
        let ids = fat.walk(self.start_sector(), &opts, diag)?;
        let positions = ids.into_iter().map(|s| s + 1);
        let positions = claim_sectors(arena, positions, Some(id), &self.name, diag);
        self.check_count(SectorKind::Big, positions.len(), diag);
        self.chain = SectorChain::Big(positions);
        Ok(())
    }

    /// Resolve the chain through the miniFAT and claim its mini sectors.
    pub fn resolve_from_mini_stream(
        &mut self,
        id: usize,
        mini: &mut [Sector],
        mini_fat: &AllocationTable,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let opts = WalkOptions {
            storage: &self.name,
            keep_start: false,
            declared_len: self.size(),
            addressable: mini.len(),
        };
        let ids = mini_fat.walk(self.start_sector(), &opts, diag)?;
        let positions = claim_sectors(mini, ids, Some(id), &self.name, diag);
        self.check_count(SectorKind::Mini, positions.len(), diag);
        self.chain = SectorChain::Mini(positions);
        Ok(())
    }

    fn check_count(&self, kind: SectorKind, actual: usize, diag: &mut Diagnostics) {
        let expected = kind.count_for(self.size());
        if actual != expected {
            diag.record(Anomaly::SectorCountMismatch {
                storage: self.name.clone(),
                expected,
                actual,
            });
        }
    }
}

/// Claim arena positions for `owner`, linking them in order.
///
/// Reserved sectors and sectors another chain already owns are skipped
/// and reported.
pub(crate) fn claim_sectors<I>(
    arena: &mut [Sector],
    positions: I,
    owner: Option<usize>,
    storage: &str,
    diag: &mut Diagnostics,
) -> Vec<usize>
where
    I: IntoIterator<Item = usize>,
{
    let mut claimed: Vec<usize> = Vec::new();
    for pos in positions {
        let Some(sector) = arena.get_mut(pos) else {
            continue;
        };
        if sector.is_special() {
            diag.record(Anomaly::SpecialSectorSkipped {
                storage: storage.to_string(),
                sector: pos,
            });
            continue;
        }
        if !sector.mark_initialized(owner) {
            diag.record(Anomaly::SectorReinitialized {
                storage: storage.to_string(),
                sector: pos,
                owner: sector.owner(),
            });
            continue;
        }
        if let Some(&prev) = claimed.last() {
            arena[prev].set_next(Some(pos));
        }
        claimed.push(pos);
    }
    claimed
}
