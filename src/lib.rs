//! Leofile - A Rust library for reading and writing LEO compound containers
//!
//! LEO is the sector-chained container (CFBF/OLE2) that wraps legacy office
//! documents. This crate exposes the container layer only: named storages
//! come out as byte-range readers, and a rewritten container goes back out
//! as an ordered list of sectors.
//!
//! # Features
//!
//! - **Zero-copy reads**: sectors slice the source buffer, memory-mapped
//!   when opened from a path (`mmap` feature)
//! - **Tolerant parsing**: damaged chains are recovered where possible and
//!   every recovery is reported through [`leo::Anomaly`]
//! - **Full rewrite**: FAT, miniFAT, DIFAT, directory and header are
//!   recomputed on every write
//!
//! # Example - Reading a workbook stream
//!
//! ```no_run
//! use leofile::{LeoConfig, LeoFile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let file = LeoFile::open("report.xls", LeoConfig::default())?;
//! let workbook = file.workbook_reader()?;
//! let first_record = workbook.read(0, 4)?;
//! println!("{} bytes, first record header {:?}", workbook.len(), first_record);
//!
//! for anomaly in file.anomalies() {
//!     println!("tolerated: {anomaly}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Example - Building a container
//!
//! ```
//! use leofile::{LeoConfig, LeoFile};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut file = LeoFile::new(LeoConfig::default())?;
//! file.add_storage("SummaryInformation", &[0u8; 200])?;
//!
//! let workbook = vec![0u8; 8192];
//! let bytes = file.to_vec(&workbook)?;
//!
//! let reread = LeoFile::from_bytes(bytes, LeoConfig::default())?;
//! assert_eq!(reread.storage_bytes("Workbook")?, workbook);
//! # Ok(())
//! # }
//! ```

/// Shared binary helpers and the crate error type
pub mod common;

/// The container engine
pub mod leo;

pub use common::{Error, Result};
pub use leo::{LeoConfig, LeoFile};
