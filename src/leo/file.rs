//! The container: source sectors, header, FAT and directory table.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytes::Bytes;
use fixedbitset::FixedBitSet;

use super::config::LeoConfig;
use super::consts::*;
use super::diagnostics::{Anomaly, Diagnostics};
use super::fat::AllocationTable;
use super::header::Header;
use super::reader::SectorReader;
use super::sector::{Sector, SectorKind};
use super::storage::{Storage, StorageType};
use super::table::StorageTable;
use super::writer::{self, SectorList};
use crate::common::binary::read_i32_le;
use crate::common::error::{Error, Result};

/// Check whether `data` starts with the container signature.
pub fn is_leo_file(data: &[u8]) -> bool {
    data.len() >= SIGNATURE_LEN
        && &data[..8] == MAGIC
        && data[8..SIGNATURE_LEN].iter().all(|&b| b == 0)
}

/// A compound container held in memory.
///
/// Big sectors live in one arena: position 0 is the header and position
/// `n + 1` holds sector `n`. Every storage refers to its sectors by arena
/// position, so sector bytes are shared with the source buffer.
#[derive(Debug)]
pub struct LeoFile {
    config: LeoConfig,
    /// Source buffer every read-path sector slices into
    source: Bytes,
    /// `None` once the container is closed
    header: Option<Header>,
    sectors: Vec<Sector>,
    fat: AllocationTable,
    table: StorageTable,
    /// Trailing partial sector of an encrypted container
    overage: Option<Bytes>,
    diagnostics: Diagnostics,
}

impl LeoFile {
    /// Parse a container held in memory.
    pub fn from_bytes(data: impl Into<Bytes>, config: LeoConfig) -> Result<Self> {
        let source: Bytes = data.into();
        if source.is_empty() {
            return Err(Error::InvalidFormat("empty input".to_string()));
        }
        if source.len() < HEADER_SIZE {
            return Err(Error::InvalidFormat(format!(
                "input of {} bytes is shorter than one sector",
                source.len()
            )));
        }
        let header = Header::parse(&source)?;
        let mut diagnostics = Diagnostics::new();

        let whole = source.len() / BIG_SECTOR_SIZE;
        let remainder = source.len() % BIG_SECTOR_SIZE;
        let mut sectors = Vec::with_capacity(whole + 1);
        for i in 0..whole {
            let start = i * BIG_SECTOR_SIZE;
            sectors.push(Sector::new(
                SectorKind::Big,
                i,
                start as u64,
                source.slice(start..start + BIG_SECTOR_SIZE),
            ));
        }

        let mut overage = None;
        if remainder > 0 {
            let start = whole * BIG_SECTOR_SIZE;
            let tail = source.slice(start..);
            if config.encrypted {
                overage = Some(tail);
            } else {
                diagnostics.record(Anomaly::TruncatedSector {
                    index: whole,
                    len: remainder,
                });
                sectors.push(Sector::new(SectorKind::Big, whole, start as u64, tail));
            }
        }
        if let Some(first) = sectors.first_mut() {
            first.set_special();
        }

        let fat_positions = load_fat_positions(&header, &mut sectors)?;
        let fat = AllocationTable::from_sectors(fat_positions.iter().map(|&p| &sectors[p]));
        let table = StorageTable::init(&mut sectors, &header, &fat, &mut diagnostics)?;

        tracing::debug!(
            sectors = sectors.len(),
            fat_sectors = fat_positions.len(),
            storages = table.len(),
            anomalies = diagnostics.anomalies().len(),
            "container opened"
        );

        Ok(Self {
            config,
            source,
            header: Some(header),
            sectors,
            fat,
            table,
            overage,
            diagnostics,
        })
    }

    /// Parse a container file, memory-mapped when the configuration asks
    /// for it.
    pub fn open<P: AsRef<Path>>(path: P, config: LeoConfig) -> Result<Self> {
        let data = read_source(path.as_ref(), config.use_memory_map)?;
        Self::from_bytes(data, config)
    }

    /// An empty container holding the root and an empty primary entry.
    pub fn new(config: LeoConfig) -> Result<Self> {
        let header = Header::prototype(config.min_stream_size);
        let mut table = StorageTable::new(header.cutoff());
        let primary = config
            .primary_storage_names
            .first()
            .map_or(WORKBOOK, String::as_str);
        table.create_storage(primary, StorageType::Stream, None)?;

        Ok(Self {
            sectors: vec![header.to_sector()],
            header: Some(header),
            config,
            source: Bytes::new(),
            fat: AllocationTable::default(),
            table,
            overage: None,
            diagnostics: Diagnostics::new(),
        })
    }

    pub fn config(&self) -> &LeoConfig {
        &self.config
    }

    /// The parsed header, `None` after [`LeoFile::close`].
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    /// Length of the source buffer.
    pub fn source_len(&self) -> usize {
        self.source.len()
    }

    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    pub fn fat(&self) -> &AllocationTable {
        &self.fat
    }

    pub fn table(&self) -> &StorageTable {
        &self.table
    }

    /// Every directory entry in on-disk order.
    pub fn storages(&self) -> &[Storage] {
        self.table.entries()
    }

    /// Everything the reader had to tolerate.
    pub fn anomalies(&self) -> &[Anomaly] {
        self.diagnostics.anomalies()
    }

    /// Trailing bytes held aside for encrypted containers.
    pub fn encryption_overage(&self) -> Option<&Bytes> {
        self.overage.as_ref()
    }

    /// Minimum stream size in big sectors.
    pub fn min_blocks(&self) -> usize {
        self.header
            .as_ref()
            .map_or(self.table.cutoff() / BIG_SECTOR_SIZE, Header::min_blocks)
    }

    pub fn storage(&self, name: &str) -> Result<&Storage> {
        self.table.get(name)
    }

    pub fn storage_mut(&mut self, name: &str) -> Result<&mut Storage> {
        self.table.get_mut(name)
    }

    pub fn has_storage(&self, name: &str) -> bool {
        self.table.contains(name)
    }

    pub fn stream_id(&self, name: &str) -> Option<usize> {
        self.table.stream_id(name)
    }

    pub fn child(&self, name: &str) -> Result<Option<&Storage>> {
        self.table.child(name)
    }

    pub fn next_sibling(&self, name: &str) -> Result<Option<&Storage>> {
        self.table.next_sibling(name)
    }

    pub fn previous_sibling(&self, name: &str) -> Result<Option<&Storage>> {
        self.table.previous_sibling(name)
    }

    /// Byte-range reader over the named storage.
    ///
    /// Small storages in a container without a ministream cannot be read
    /// and fail with [`Error::UnsupportedLayout`].
    pub fn reader(&self, name: &str) -> Result<SectorReader<'_>> {
        let storage = self.table.get(name)?;
        if storage.allocation(self.table.cutoff()) == Some(SectorKind::Mini)
            && storage.chain().is_empty()
            && !self.table.has_mini_stream()
        {
            return Err(Error::UnsupportedLayout(format!(
                "{name} is below the {} byte cutoff but the container has no ministream",
                self.table.cutoff()
            )));
        }
        Ok(self.table.reader(storage, &self.sectors))
    }

    /// Full content of the named storage.
    pub fn storage_bytes(&self, name: &str) -> Result<Vec<u8>> {
        self.reader(name)?.to_vec()
    }

    /// `Workbook` or the legacy `Book` stream is present.
    pub fn has_workbook(&self) -> bool {
        self.has_storage(WORKBOOK) || self.has_storage(BOOK)
    }

    pub fn has_doc(&self) -> bool {
        self.has_storage(WORD_DOCUMENT)
    }

    pub fn has_pivot_cache(&self) -> bool {
        self.has_storage(PIVOT_CACHE)
    }

    /// Reader over `Workbook`, falling back to `Book`.
    pub fn workbook_reader(&self) -> Result<SectorReader<'_>> {
        match self.reader(WORKBOOK) {
            Err(Error::StorageNotFound(_)) => self.reader(BOOK),
            other => other,
        }
    }

    pub fn doc_reader(&self) -> Result<SectorReader<'_>> {
        self.reader(WORD_DOCUMENT)
    }

    /// Name of the first configured primary storage present.
    pub fn primary_storage_name(&self) -> Option<&str> {
        self.config
            .primary_storage_names
            .iter()
            .map(String::as_str)
            .find(|name| self.table.contains(name))
    }

    fn primary_id(&self) -> Result<usize> {
        self.primary_storage_name()
            .and_then(|name| self.table.stream_id(name))
            .ok_or_else(|| Error::StorageNotFound(self.config.primary_storage_names.join("/")))
    }

    /// Add a stream with `data` as content, or replace the content of an
    /// existing one. Returns its directory index.
    pub fn add_storage(&mut self, name: &str, data: &[u8]) -> Result<usize> {
        let id = match self.table.stream_id(name) {
            Some(id) => id,
            None => self.table.create_storage(name, StorageType::Stream, None)?,
        };
        let cutoff = self.table.cutoff();
        if let Some(storage) = self.table.by_id_mut(id) {
            storage.set_content(data, cutoff);
        }
        Ok(id)
    }

    /// Insert an empty entry at `insert_at`, appending when `None`.
    pub fn create_storage(
        &mut self,
        name: &str,
        storage_type: StorageType,
        insert_at: Option<usize>,
    ) -> Result<usize> {
        self.table.create_storage(name, storage_type, insert_at)
    }

    /// Lay the container out around primary content of `primary_len` bytes.
    ///
    /// Directory entries take their new start sectors; the returned list is
    /// streamed with the primary bytes by [`SectorList::write_to`].
    pub fn write_bytes(&mut self, primary_len: usize) -> Result<SectorList> {
        if self.header.is_none() {
            return Err(Error::InvalidFormat("header unset".to_string()));
        }
        let primary = self.primary_id()?;
        writer::layout(
            &mut self.table,
            &self.sectors,
            primary,
            primary_len,
            self.overage.clone(),
            &mut self.diagnostics,
        )
    }

    /// Serialize the container with `primary` as the primary content.
    pub fn write_to<W: Write + ?Sized>(&mut self, out: &mut W, primary: &[u8]) -> Result<()> {
        let mut list = self.write_bytes(primary.len())?;
        list.write_to(out, primary)
    }

    /// Serialize to a buffer.
    pub fn to_vec(&mut self, primary: &[u8]) -> Result<Vec<u8>> {
        let mut list = self.write_bytes(primary.len())?;
        list.to_vec(primary)
    }

    /// Serialize to a file.
    pub fn save<P: AsRef<Path>>(&mut self, path: P, primary: &[u8]) -> Result<()> {
        let mut list = self.write_bytes(primary.len())?;
        let mut out = BufWriter::new(File::create(path)?);
        list.write_to(&mut out, primary)
    }

    /// Release every sector, the table and the header.
    pub fn close(&mut self) {
        self.header = None;
        self.sectors.clear();
        self.fat = AllocationTable::default();
        self.table.close();
        self.overage = None;
        self.source = Bytes::new();
        tracing::debug!("container closed");
    }
}

/// Arena positions of every FAT sector: the header's inline list followed
/// by the extra DIFAT chain.
fn load_fat_positions(header: &Header, sectors: &mut [Sector]) -> Result<Vec<usize>> {
    let declared = header.num_fat_sectors() as usize;
    let mut positions = header.difat()?;

    let mut next = header.extra_difat_start();
    let mut remaining = header.num_extra_difat_sectors() as usize;
    let mut seen = FixedBitSet::with_capacity(sectors.len());
    while remaining > 0 && next >= 0 && positions.len() < declared {
        let pos = next as usize + 1;
        let Some(sector) = sectors.get_mut(pos) else {
            return Err(Error::InvalidFormat(format!(
                "extra DIFAT sector {next} is outside the file"
            )));
        };
        if seen.contains(pos) {
            return Err(Error::InvalidFormat(format!(
                "extra DIFAT chain loops at sector {next}"
            )));
        }
        seen.insert(pos);
        sector.set_extra_difat();

        let data = sector.padded_bytes();
        let wanted = (declared - positions.len()).min(DIFAT_ENTRIES_PER_SECTOR);
        for i in 0..wanted {
            let stored = read_i32_le(&data, i * 4)?;
            let location = usize::try_from(stored).map_err(|_| {
                Error::InvalidFormat(format!("invalid FAT sector location {stored} in DIFAT"))
            })?;
            positions.push(location + 1);
        }
        next = read_i32_le(&data, DIFAT_ENTRIES_PER_SECTOR * 4)?;
        remaining -= 1;
    }

    if positions.len() < declared {
        return Err(Error::InvalidFormat(format!(
            "header declares {declared} FAT sectors, found {}",
            positions.len()
        )));
    }
    for &pos in &positions {
        let sector = sectors.get_mut(pos).ok_or_else(|| {
            Error::InvalidFormat(format!("FAT sector {} is outside the file", pos - 1))
        })?;
        sector.set_depot();
    }
    Ok(positions)
}

#[cfg(feature = "mmap")]
fn read_source(path: &Path, map: bool) -> Result<Bytes> {
    let file = File::open(path)?;
    if map && file.metadata()?.len() >= HEADER_SIZE as u64 {
        // SAFETY: the map is read-only and owned by the returned buffer. The
        // file must not be truncated while the container is alive.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        return Ok(Bytes::from_owner(mmap));
    }
    Ok(Bytes::from(std::fs::read(path)?))
}

#[cfg(not(feature = "mmap"))]
fn read_source(path: &Path, _map: bool) -> Result<Bytes> {
    Ok(Bytes::from(std::fs::read(path)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_check() {
        let header = Header::prototype(4096);
        assert!(is_leo_file(header.as_bytes()));
        assert!(!is_leo_file(b"PK\x03\x04"));
        assert!(!is_leo_file(&[0u8; 16]));
    }

    #[test]
    fn test_rejects_short_and_empty_input() {
        assert!(matches!(
            LeoFile::from_bytes(Vec::new(), LeoConfig::default()),
            Err(Error::InvalidFormat(_))
        ));
        assert!(matches!(
            LeoFile::from_bytes(vec![0u8; 100], LeoConfig::default()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_magic_mismatch() {
        let mut data = vec![0u8; 1024];
        data[..16].copy_from_slice(b"not a container!");
        assert!(matches!(
            LeoFile::from_bytes(data, LeoConfig::default()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_new_container() {
        let file = LeoFile::new(LeoConfig::default()).unwrap();
        assert_eq!(file.storages().len(), 2);
        assert_eq!(file.primary_storage_name(), Some(WORKBOOK));
        assert!(file.has_workbook());
        assert!(!file.has_doc());
        assert_eq!(file.min_blocks(), 8);
    }

    #[test]
    fn test_presence_and_fallback() {
        let config = LeoConfig::default().with_primary_storage_names([BOOK]);
        let mut file = LeoFile::new(config).unwrap();
        assert!(file.has_workbook());
        assert!(!file.has_storage(WORKBOOK));
        file.add_storage(BOOK, &[5u8; 4096]).unwrap();
        assert_eq!(file.workbook_reader().unwrap().len(), 4096);
        assert!(matches!(file.doc_reader(), Err(Error::StorageNotFound(_))));

        assert!(!file.has_pivot_cache());
        file.create_storage(PIVOT_CACHE, StorageType::Storage, None).unwrap();
        assert!(file.has_pivot_cache());
    }

    #[test]
    fn test_add_storage_rejects_long_names() {
        let mut file = LeoFile::new(LeoConfig::default()).unwrap();
        let long = "L".repeat(40);
        assert!(matches!(file.add_storage(&long, &[1u8; 10]), Err(Error::InvalidFormat(_))));
        assert!(matches!(file.add_storage(&long, &[2u8; 10]), Err(Error::InvalidFormat(_))));
        assert_eq!(file.storages().len(), 2);

        let name = "L".repeat(MAX_NAME_UNITS);
        let first = file.add_storage(&name, &[1u8; 10]).unwrap();
        let second = file.add_storage(&name, &[2u8; 20]).unwrap();
        assert_eq!(first, second);
        assert_eq!(file.storage(&name).unwrap().size(), 20);

        let reread = LeoFile::from_bytes(file.to_vec(&[0u8; 4096]).unwrap(), LeoConfig::default())
            .unwrap();
        assert!(reread.anomalies().is_empty());
        assert_eq!(reread.storage_bytes(&name).unwrap(), vec![2u8; 20]);
    }

    #[test]
    fn test_small_storage_without_ministream() {
        let mut file = LeoFile::new(LeoConfig::default()).unwrap();
        let id = file.create_storage("Tiny", StorageType::Stream, None).unwrap();
        file.table.by_id_mut(id).unwrap().set_size(10);
        assert!(matches!(file.reader("Tiny"), Err(Error::UnsupportedLayout(_))));
    }

    #[test]
    fn test_missing_primary() {
        let config = LeoConfig::default().with_primary_storage_names([ENCRYPTED_PACKAGE]);
        let mut file = LeoFile::new(config).unwrap();
        file.config.primary_storage_names = vec!["Nope".to_string()];
        assert!(matches!(file.write_bytes(0), Err(Error::StorageNotFound(_))));
    }

    #[test]
    fn test_close_unsets_header() {
        let mut file = LeoFile::new(LeoConfig::default()).unwrap();
        file.close();
        assert!(file.header().is_none());
        assert!(file.storages().is_empty());
        match file.write_bytes(4096) {
            Err(Error::InvalidFormat(msg)) => assert_eq!(msg, "header unset"),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
