//! The directory table: every storage of a container, the ministream and
//! its allocator.
//!
//! Entries keep their on-disk order and link to each other by index.
//! Lookups go through a name index; the sibling tree is only rebuilt when
//! entries are added.

use std::collections::{HashMap, HashSet};

use super::consts::*;
use super::diagnostics::{Anomaly, Diagnostics};
use super::fat::{AllocationTable, WalkOptions};
use super::header::Header;
use super::reader::SectorReader;
use super::sector::{Sector, SectorKind};
use super::storage::{SectorChain, Storage, StorageType, claim_sectors};
use super::writer::directory::{children_of, link_children};
use crate::common::error::{Error, Result};

/// All directory entries of a container plus the mini allocator.
#[derive(Debug, Clone, Default)]
pub struct StorageTable {
    entries: Vec<Storage>,
    index: HashMap<String, usize>,
    mini_fat: Option<AllocationTable>,
    mini_sectors: Vec<Sector>,
    /// Sectors of the directory stream
    directory: SectorChain,
    /// Arena positions of the miniFAT
    mini_fat_positions: Vec<usize>,
    cutoff: usize,
    tree_dirty: bool,
}

impl StorageTable {
    /// A table holding only the root entry.
    pub fn new(cutoff: usize) -> Self {
        let mut table = Self {
            cutoff,
            ..Self::default()
        };
        let mut root = Storage::new(ROOT_ENTRY_NAME, StorageType::Root);
        root.set_start_sector(ENDOFCHAIN);
        table.append(root);
        table
    }

    /// Resolve the directory stream, the ministream and every storage.
    pub fn init(
        arena: &mut [Sector],
        header: &Header,
        fat: &AllocationTable,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let addressable = arena.len().saturating_sub(1);
        let opts = WalkOptions {
            storage: ROOT_ENTRY_NAME,
            keep_start: true,
            declared_len: 0,
            addressable,
        };
        let ids = fat.walk(header.root_start(), &opts, diag)?;
        let directory = claim_sectors(
            arena,
            ids.into_iter().map(|s| s + 1),
            Some(0),
            ROOT_ENTRY_NAME,
            diag,
        );
        if directory.is_empty() {
            return Err(Error::InvalidFormat(format!(
                "directory stream at sector {} is unreadable",
                header.root_start()
            )));
        }

        let mut data = Vec::with_capacity(directory.len() * BIG_SECTOR_SIZE);
        for &pos in &directory {
            data.extend_from_slice(&arena[pos].padded_bytes());
        }

        let mut table = Self::init_from_directory_stream(&data, header.cutoff(), diag)?;
        table.directory = SectorChain::Big(directory);
        table.init_mini_stream(arena, header, fat, diag)?;
        table.init_directories(arena, fat, diag)?;
        tracing::debug!(
            entries = table.entries.len(),
            mini_sectors = table.mini_sectors.len(),
            "directory loaded"
        );
        Ok(table)
    }

    /// Split a directory stream into 128-byte records.
    ///
    /// Record 0 is always the root, whatever it is called.
    pub fn init_from_directory_stream(
        data: &[u8],
        cutoff: usize,
        diag: &mut Diagnostics,
    ) -> Result<Self> {
        let mut table = Self {
            cutoff,
            ..Self::default()
        };

        for (i, record) in data.chunks_exact(DIRENTRY_SIZE).enumerate() {
            let mut storage = Storage::parse(record)?;
            if i == 0 {
                if storage.name() != ROOT_ENTRY_NAME {
                    diag.record(Anomaly::RootRenamed {
                        found: storage.name().to_string(),
                    });
                    storage.set_name(ROOT_ENTRY_NAME);
                }
                storage.set_storage_type(StorageType::Root);
            }
            table.push(storage, diag);
        }

        if table.entries.is_empty() {
            return Err(Error::InvalidFormat("directory stream is empty".to_string()));
        }
        Ok(table)
    }

    /// Load the miniFAT and slice the root's content into mini sectors.
    ///
    /// Containers without a miniFAT simply have no mini allocator.
    pub fn init_mini_stream(
        &mut self,
        arena: &mut [Sector],
        header: &Header,
        fat: &AllocationTable,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let start = header.mini_fat_start();
        if start < 0 {
            return Ok(());
        }

        let opts = WalkOptions {
            storage: "miniFAT",
            keep_start: true,
            declared_len: 0,
            addressable: arena.len().saturating_sub(1),
        };
        let ids = fat.walk(start, &opts, diag)?;
        let positions = claim_sectors(arena, ids.into_iter().map(|s| s + 1), None, "miniFAT", diag);
        let mini_fat = AllocationTable::from_sectors(positions.iter().map(|&p| &arena[p]));
        for &pos in &positions {
            arena[pos].set_depot();
        }
        self.mini_fat_positions = positions;
        self.mini_fat = Some(mini_fat);

        let Some(root) = self.entries.first_mut() else {
            return Ok(());
        };
        root.resolve(0, arena, fat, false, diag)?;
        let expected = root.size();
        let chain = match root.chain() {
            SectorChain::Big(positions) => positions.clone(),
            _ => Vec::new(),
        };

        let count = SectorKind::Mini.count_for(expected);
        let mut mini = Vec::with_capacity(count);
        for i in 0..count {
            let byte = i * MINI_SECTOR_SIZE;
            let Some(&pos) = chain.get(byte / BIG_SECTOR_SIZE) else {
                diag.record(Anomaly::MiniStreamShort {
                    expected,
                    actual: byte,
                });
                break;
            };
            let big = &arena[pos];
            let local = byte % BIG_SECTOR_SIZE;
            let data = big.shared();
            let end = (local + MINI_SECTOR_SIZE)
                .min(local + (expected - byte))
                .min(data.len());
            let begin = local.min(end);
            mini.push(Sector::new(
                SectorKind::Mini,
                i,
                big.offset() + local as u64,
                data.slice(begin..end),
            ));
        }
        self.mini_sectors = mini;
        Ok(())
    }

    /// Resolve every non-root entry against the table its length selects.
    pub fn init_directories(
        &mut self,
        arena: &mut [Sector],
        fat: &AllocationTable,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let cutoff = self.cutoff;
        for id in 1..self.entries.len() {
            let storage = &mut self.entries[id];
            if storage.storage_type() == StorageType::Unallocated {
                continue;
            }
            match storage.allocation(cutoff) {
                None => {},
                Some(SectorKind::Mini) => match &self.mini_fat {
                    Some(mini_fat) => storage.resolve_from_mini_stream(
                        id,
                        &mut self.mini_sectors,
                        mini_fat,
                        diag,
                    )?,
                    None => diag.record(Anomaly::MiniStreamMissing {
                        storage: storage.name().to_string(),
                    }),
                },
                Some(SectorKind::Big) => storage.resolve(id, arena, fat, false, diag)?,
            }
        }
        Ok(())
    }

    fn push(&mut self, storage: Storage, diag: &mut Diagnostics) -> usize {
        let name = storage.name().to_string();
        let (id, replaced) = self.append(storage);
        if replaced {
            diag.record(Anomaly::DuplicateName { name });
        }
        id
    }

    /// Append an entry; the index points at it even if the name was taken.
    fn append(&mut self, storage: Storage) -> (usize, bool) {
        let id = self.entries.len();
        let name = storage.name();
        let replaced = !name.is_empty() && self.index.insert(name.to_string(), id).is_some();
        self.entries.push(storage);
        (id, replaced)
    }

    fn rebuild_index(&mut self) {
        self.index.clear();
        for (id, storage) in self.entries.iter().enumerate() {
            if !storage.name().is_empty() {
                self.index.insert(storage.name().to_string(), id);
            }
        }
    }

    /// Add a new entry at `insert_at` (appended when `None`).
    ///
    /// Links pointing at or past the insertion point are shifted so the
    /// existing tree stays intact. The entry joins the root's children.
    pub fn create_storage(
        &mut self,
        name: &str,
        storage_type: StorageType,
        insert_at: Option<usize>,
    ) -> Result<usize> {
        let units = name.encode_utf16().count();
        if units == 0 || units > MAX_NAME_UNITS {
            return Err(Error::InvalidFormat(format!(
                "storage name {name:?} must be 1 to {MAX_NAME_UNITS} UTF-16 units, got {units}"
            )));
        }
        if self.index.contains_key(name) {
            return Err(Error::InvalidFormat(format!("storage {name} already exists")));
        }
        let storage = Storage::new(name, storage_type);

        let id = match insert_at {
            Some(at) if at >= 1 && at < self.entries.len() => {
                let at_link = at as i32;
                for entry in &mut self.entries {
                    let (previous, next, child) = (entry.previous(), entry.next(), entry.child());
                    if previous >= at_link {
                        entry.set_previous(previous + 1);
                    }
                    if next >= at_link {
                        entry.set_next(next + 1);
                    }
                    if child >= at_link {
                        entry.set_child(child + 1);
                    }
                }
                self.entries.insert(at, storage);
                self.rebuild_index();
                at
            },
            _ => self.append(storage).0,
        };

        self.tree_dirty = true;
        Ok(id)
    }

    /// Rebalance the root's children if entries were added.
    ///
    /// Entries already reachable from the root or from a nested storage
    /// keep their place; every other allocated entry joins the root.
    pub fn relink(&mut self) {
        if !self.tree_dirty {
            return;
        }
        let mut children = children_of(&self.entries, 0);
        let mut placed: HashSet<usize> = children.iter().copied().collect();
        for (id, entry) in self.entries.iter().enumerate().skip(1) {
            if entry.storage_type() == StorageType::Storage {
                placed.extend(children_of(&self.entries, id));
            }
        }
        for id in 1..self.entries.len() {
            let allocated = self.entries[id].storage_type() != StorageType::Unallocated;
            if allocated && !placed.contains(&id) {
                children.push(id);
            }
        }
        link_children(0, &children, &mut self.entries);
        self.tree_dirty = false;
    }

    /// Serialize the directory stream, padding with unallocated records to
    /// a whole number of sectors.
    pub fn rebuild_root_store(&mut self) -> Vec<u8> {
        while self.entries.len() % DIRENTRIES_PER_SECTOR != 0 {
            self.entries.push(Storage::unallocated());
        }
        let mut data = Vec::with_capacity(self.entries.len() * DIRENTRY_SIZE);
        for storage in &self.entries {
            data.extend_from_slice(&storage.to_bytes());
        }
        data
    }

    pub fn entries(&self) -> &[Storage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn root(&self) -> Option<&Storage> {
        self.entries.first()
    }

    pub fn root_mut(&mut self) -> Option<&mut Storage> {
        self.entries.first_mut()
    }

    pub fn by_id(&self, id: usize) -> Option<&Storage> {
        self.entries.get(id)
    }

    pub fn by_id_mut(&mut self, id: usize) -> Option<&mut Storage> {
        self.entries.get_mut(id)
    }

    /// Flat index of the entry called `name`.
    pub fn stream_id(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<&Storage> {
        self.stream_id(name)
            .and_then(|id| self.entries.get(id))
            .ok_or_else(|| Error::StorageNotFound(name.to_string()))
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Storage> {
        match self.stream_id(name) {
            Some(id) => self
                .entries
                .get_mut(id)
                .ok_or_else(|| Error::StorageNotFound(name.to_string())),
            None => Err(Error::StorageNotFound(name.to_string())),
        }
    }

    fn link(&self, id: i32) -> Option<&Storage> {
        usize::try_from(id).ok().and_then(|i| self.entries.get(i))
    }

    /// First child of the named entry.
    pub fn child(&self, name: &str) -> Result<Option<&Storage>> {
        Ok(self.link(self.get(name)?.child()))
    }

    /// Right sibling of the named entry.
    pub fn next_sibling(&self, name: &str) -> Result<Option<&Storage>> {
        Ok(self.link(self.get(name)?.next()))
    }

    /// Left sibling of the named entry.
    pub fn previous_sibling(&self, name: &str) -> Result<Option<&Storage>> {
        Ok(self.link(self.get(name)?.previous()))
    }

    pub fn cutoff(&self) -> usize {
        self.cutoff
    }

    /// Whether the container carries a mini allocator.
    pub fn has_mini_stream(&self) -> bool {
        self.mini_fat.is_some()
    }

    pub fn mini_fat(&self) -> Option<&AllocationTable> {
        self.mini_fat.as_ref()
    }

    pub fn mini_sectors(&self) -> &[Sector] {
        &self.mini_sectors
    }

    /// The root's own content: the directory stream.
    pub fn directory(&self) -> &SectorChain {
        &self.directory
    }

    /// Replace the directory stream with `data` re-sliced into big sectors.
    pub fn set_root_content_from_big_chain(&mut self, data: &[u8]) -> &[Sector] {
        let sectors = Sector::from_bytes(data, SectorKind::Big);
        self.directory = SectorChain::Owned(SectorKind::Big, sectors);
        match &self.directory {
            SectorChain::Owned(_, sectors) => sectors,
            _ => &[],
        }
    }

    pub fn mini_fat_positions(&self) -> &[usize] {
        &self.mini_fat_positions
    }

    /// Sectors of `storage` in chain order.
    pub fn sectors_of<'a>(&'a self, storage: &'a Storage, arena: &'a [Sector]) -> Vec<&'a Sector> {
        match storage.chain() {
            SectorChain::Empty => Vec::new(),
            SectorChain::Big(positions) => positions.iter().filter_map(|&p| arena.get(p)).collect(),
            SectorChain::Mini(positions) => positions
                .iter()
                .filter_map(|&p| self.mini_sectors.get(p))
                .collect(),
            SectorChain::Owned(_, sectors) => sectors.iter().collect(),
        }
    }

    /// Reader over `storage`'s declared length.
    pub fn reader<'a>(&'a self, storage: &'a Storage, arena: &'a [Sector]) -> SectorReader<'a> {
        SectorReader::new(
            self.sectors_of(storage, arena),
            storage.kind().unwrap_or(SectorKind::Big),
            storage.size(),
        )
    }

    /// Drop every entry and sector reference.
    pub fn close(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.mini_fat = None;
        self.mini_sectors.clear();
        self.directory = SectorChain::Empty;
        self.mini_fat_positions.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory(entries: &[Storage]) -> Vec<u8> {
        entries.iter().flat_map(|e| e.to_bytes()).collect()
    }

    fn sample() -> Vec<Storage> {
        let mut root = Storage::new(ROOT_ENTRY_NAME, StorageType::Root);
        root.set_child(2);
        let mut book = Storage::new("Workbook", StorageType::Stream);
        book.set_size(8192);
        let mut info = Storage::new("SummaryInformation", StorageType::Stream);
        info.set_previous(1);
        info.set_size(200);
        vec![root, book, info, Storage::unallocated()]
    }

    #[test]
    fn test_directory_stream_lookup() {
        let mut diag = Diagnostics::new();
        let table = StorageTable::init_from_directory_stream(&directory(&sample()), 4096, &mut diag)
            .unwrap();
        assert_eq!(table.len(), 4);
        assert_eq!(table.stream_id("Workbook"), Some(1));
        assert_eq!(table.get("Workbook").unwrap().size(), 8192);
        assert!(matches!(table.get("Nope"), Err(Error::StorageNotFound(_))));
        assert!(diag.is_empty());
    }

    #[test]
    fn test_navigation() {
        let mut diag = Diagnostics::new();
        let table = StorageTable::init_from_directory_stream(&directory(&sample()), 4096, &mut diag)
            .unwrap();
        let child = table.child(ROOT_ENTRY_NAME).unwrap().unwrap();
        assert_eq!(child.name(), "SummaryInformation");
        let prev = table.previous_sibling("SummaryInformation").unwrap().unwrap();
        assert_eq!(prev.name(), "Workbook");
        assert!(table.next_sibling("Workbook").unwrap().is_none());
    }

    #[test]
    fn test_renamed_root_and_duplicates() {
        let mut entries = sample();
        entries[0].set_name("R");
        entries[2].set_name("Workbook");
        let mut diag = Diagnostics::new();
        let table = StorageTable::init_from_directory_stream(&directory(&entries), 4096, &mut diag)
            .unwrap();
        assert_eq!(table.root().unwrap().name(), ROOT_ENTRY_NAME);
        assert_eq!(table.stream_id("Workbook"), Some(2));
        assert!(matches!(diag.anomalies()[0], Anomaly::RootRenamed { .. }));
        assert!(matches!(diag.anomalies()[1], Anomaly::DuplicateName { .. }));
    }

    #[test]
    fn test_empty_directory_stream() {
        let mut diag = Diagnostics::new();
        assert!(StorageTable::init_from_directory_stream(&[], 4096, &mut diag).is_err());
    }

    #[test]
    fn test_create_storage_shifts_links() {
        let mut diag = Diagnostics::new();
        let mut table =
            StorageTable::init_from_directory_stream(&directory(&sample()), 4096, &mut diag)
                .unwrap();
        let id = table
            .create_storage("Extra", StorageType::Stream, Some(1))
            .unwrap();
        assert_eq!(id, 1);
        assert_eq!(table.stream_id("Workbook"), Some(2));
        assert_eq!(table.root().unwrap().child(), 3);
        assert_eq!(table.get("SummaryInformation").unwrap().previous(), 2);
        assert!(table.create_storage("Extra", StorageType::Stream, None).is_err());
    }

    #[test]
    fn test_create_storage_rejects_bad_names() {
        let mut table = StorageTable::new(4096);
        let long = "L".repeat(MAX_NAME_UNITS + 9);
        assert!(matches!(
            table.create_storage(&long, StorageType::Stream, None),
            Err(Error::InvalidFormat(_))
        ));
        assert!(table.create_storage("", StorageType::Stream, None).is_err());
        assert_eq!(table.len(), 1);

        let longest = "L".repeat(MAX_NAME_UNITS);
        let id = table.create_storage(&longest, StorageType::Stream, None).unwrap();
        assert_eq!(table.stream_id(&longest), Some(id));
        assert!(table.create_storage(&longest, StorageType::Stream, None).is_err());
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_relink_adds_new_entries_to_root() {
        let mut table = StorageTable::new(4096);
        table.create_storage("Workbook", StorageType::Stream, None).unwrap();
        table.create_storage("Data", StorageType::Stream, None).unwrap();
        table.relink();

        let mut children = children_of(table.entries(), 0);
        children.sort_unstable();
        assert_eq!(children, vec![1, 2]);
    }

    #[test]
    fn test_rebuild_root_store_pads() {
        let mut table = StorageTable::new(4096);
        table.create_storage("Workbook", StorageType::Stream, None).unwrap();
        let data = table.rebuild_root_store();
        assert_eq!(data.len(), 4 * DIRENTRY_SIZE);
        assert_eq!(table.len(), 4);
        assert_eq!(table.entries()[3].storage_type(), StorageType::Unallocated);
    }
}
