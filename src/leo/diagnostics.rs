//! Soft anomaly reporting.
//!
//! Container damage that can be worked around is never fatal. Each such
//! event is logged through `tracing` and kept in a [`Diagnostics`] list so
//! callers can inspect what the reader had to tolerate.

use std::fmt;

/// A recoverable irregularity found while reading or writing a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A chain continues somewhere other than the following sector
    ChainJump {
        storage: String,
        from: usize,
        to: usize,
    },
    /// A chain points past the allocation table or the file
    ChainOutOfRange { storage: String, sector: usize },
    /// A FAT-sector marker appeared inside a data chain
    TableSectorInChain { storage: String, sector: usize },
    /// A DIFAT-sector marker appeared inside a data chain
    DifatSectorInChain { storage: String, sector: usize },
    /// A chain reached a free entry
    FreeSectorInChain { storage: String, sector: usize },
    /// A chain reached a negative value that is not a known marker
    UnknownMarker {
        storage: String,
        sector: usize,
        value: i32,
    },
    /// The file length is not a multiple of the sector size
    TruncatedSector { index: usize, len: usize },
    /// Two directory entries carry the same name
    DuplicateName { name: String },
    /// A sector was claimed by more than one storage
    SectorReinitialized {
        storage: String,
        sector: usize,
        owner: Option<usize>,
    },
    /// A chain ran into a header, FAT or DIFAT sector
    SpecialSectorSkipped { storage: String, sector: usize },
    /// Directory entry 0 did not carry the root name
    RootRenamed { found: String },
    /// A small storage exists but the container has no mini allocator
    MiniStreamMissing { storage: String },
    /// The ministream holds fewer bytes than the root entry declares
    MiniStreamShort { expected: usize, actual: usize },
    /// A resolved chain does not cover the declared length
    SectorCountMismatch {
        storage: String,
        expected: usize,
        actual: usize,
    },
    /// Primary content shorter than the cutoff was padded on write
    PrimaryPadded { len: usize, padded: usize },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::ChainJump { storage, from, to } => {
                write!(f, "{storage}: chain jumps from sector {from} to {to}")
            },
            Anomaly::ChainOutOfRange { storage, sector } => {
                write!(f, "{storage}: chain points past the end at sector {sector}")
            },
            Anomaly::TableSectorInChain { storage, sector } => {
                write!(f, "{storage}: FAT marker inside chain at sector {sector}")
            },
            Anomaly::DifatSectorInChain { storage, sector } => {
                write!(f, "{storage}: DIFAT marker inside chain at sector {sector}")
            },
            Anomaly::FreeSectorInChain { storage, sector } => {
                write!(f, "{storage}: chain reached free sector {sector}")
            },
            Anomaly::UnknownMarker {
                storage,
                sector,
                value,
            } => write!(f, "{storage}: unknown marker {value} at sector {sector}"),
            Anomaly::TruncatedSector { index, len } => {
                write!(f, "sector {index} is truncated to {len} bytes")
            },
            Anomaly::DuplicateName { name } => write!(f, "duplicate directory name {name:?}"),
            Anomaly::SectorReinitialized {
                storage,
                sector,
                owner,
            } => write!(
                f,
                "{storage}: sector {sector} already belongs to entry {owner:?}"
            ),
            Anomaly::SpecialSectorSkipped { storage, sector } => {
                write!(f, "{storage}: skipped reserved sector {sector}")
            },
            Anomaly::RootRenamed { found } => {
                write!(f, "root entry named {found:?}, treating it as the root")
            },
            Anomaly::MiniStreamMissing { storage } => {
                write!(f, "{storage}: small storage without a mini allocator")
            },
            Anomaly::MiniStreamShort { expected, actual } => {
                write!(f, "ministream holds {actual} bytes, root declares {expected}")
            },
            Anomaly::SectorCountMismatch {
                storage,
                expected,
                actual,
            } => write!(
                f,
                "{storage}: declared length needs {expected} sectors, chain has {actual}"
            ),
            Anomaly::PrimaryPadded { len, padded } => {
                write!(f, "primary content of {len} bytes padded to {padded}")
            },
        }
    }
}

/// Collector for anomalies seen by one container.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    anomalies: Vec<Anomaly>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the anomaly and keep it.
    pub fn record(&mut self, anomaly: Anomaly) {
        tracing::warn!(%anomaly, "container anomaly");
        self.anomalies.push(anomaly);
    }

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    pub fn clear(&mut self) {
        self.anomalies.clear();
    }
}
