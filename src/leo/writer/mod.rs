//! Container writing
//!
//! A write is a layout pass over the directory table followed by streaming
//! the resulting [`SectorList`]. Every allocation table is rebuilt from
//! scratch; nothing is patched in place.

/// FAT (File Allocation Table) generation
pub mod fat;

/// MiniFAT and ministream generation
pub mod minifat;

/// Extra DIFAT generation
pub mod difat;

/// Sibling tree ordering
pub mod directory;

/// Two-pass layout and output list
mod layout;


pub use difat::DifatBuilder;
pub use fat::{FatBuilder, difat_sector_count, fat_sector_count, table_sector_counts};
pub use layout::{SectorList, primary_sector_count};
pub use minifat::{MiniFatBuilder, MiniStreamLayout};

pub(crate) use layout::layout;
