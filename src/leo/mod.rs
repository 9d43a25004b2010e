//! LEO compound container engine
//!
//! Reads and writes the sector-chained container used by legacy office
//! documents: a header, a FAT with its DIFAT index, a miniFAT for small
//! streams and a flat directory of named storages.

/// Constants for the container format
pub mod consts;

/// Container configuration
pub mod config;

/// Soft anomaly reporting
pub mod diagnostics;

/// Fixed-size sectors
pub mod sector;

/// Logical byte-range reads over sector lists
pub mod reader;

/// Container header
pub mod header;

/// FAT and miniFAT decoding and chain walks
pub mod fat;

/// Directory entries and their chains
pub mod storage;

/// Directory table and mini allocator
pub mod table;

/// Top-level container
mod file;

/// Container writing
pub mod writer;

pub use config::LeoConfig;
pub use diagnostics::{Anomaly, Diagnostics};
pub use fat::AllocationTable;
pub use file::{LeoFile, is_leo_file};
pub use header::Header;
pub use reader::{ReadSpan, SectorCursor, SectorReader};
pub use sector::{Sector, SectorFlags, SectorKind};
pub use storage::{NodeColor, SectorChain, Storage, StorageType};
pub use table::StorageTable;
pub use writer::SectorList;
