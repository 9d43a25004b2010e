//! Allocation tables (FAT and miniFAT) and chain resolution.
//!
//! Entry `i` names the sector that follows sector `i` in its chain, or one
//! of the negative markers. Sector numbers are zero-based; for big sectors
//! arena position `i + 1` holds sector `i` because the header occupies
//! position zero.

use fixedbitset::FixedBitSet;

use super::consts::*;
use super::diagnostics::{Anomaly, Diagnostics};
use super::sector::{Sector, SectorKind};
use crate::common::binary::read_i32_array;
use crate::common::error::{Error, Result};

/// How a chain walk treats its start and its bounds.
#[derive(Debug, Clone, Copy)]
pub struct WalkOptions<'a> {
    /// Name used when reporting anomalies
    pub storage: &'a str,
    /// Include the start sector even when its entry would end the chain
    pub keep_start: bool,
    /// Declared stream length; FAT markers are skipped over when non-zero
    pub declared_len: usize,
    /// Number of sectors that actually exist
    pub addressable: usize,
}

/// Decoded FAT or miniFAT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationTable {
    entries: Vec<i32>,
}

impl AllocationTable {
    pub fn new(entries: Vec<i32>) -> Self {
        Self { entries }
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self::new(read_i32_array(data))
    }

    /// Concatenate table sectors in order and decode them.
    pub fn from_sectors<'a, I>(sectors: I) -> Self
    where
        I: IntoIterator<Item = &'a Sector>,
    {
        let mut data = Vec::new();
        for sector in sectors {
            data.extend_from_slice(&sector.padded_bytes());
        }
        Self::from_bytes(&data)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn get(&self, sector: usize) -> Option<i32> {
        self.entries.get(sector).copied()
    }

    pub fn entries(&self) -> &[i32] {
        &self.entries
    }

    /// Follow the chain starting at `start` and return its sectors in order.
    ///
    /// Negative starts yield an empty chain. A chain that revisits a sector
    /// is rejected; every other irregularity is recorded in `diag` and the
    /// walk keeps whatever it resolved so far.
    pub fn walk(
        &self,
        start: i32,
        opts: &WalkOptions<'_>,
        diag: &mut Diagnostics,
    ) -> Result<Vec<usize>> {
        let mut chain = Vec::new();
        let Ok(mut current) = usize::try_from(start) else {
            return Ok(chain);
        };
        let mut visited = FixedBitSet::with_capacity(self.entries.len());
        let mut first = true;

        loop {
            let entry = match self.get(current) {
                Some(entry) if current < opts.addressable => entry,
                _ => {
                    diag.record(Anomaly::ChainOutOfRange {
                        storage: opts.storage.to_string(),
                        sector: current,
                    });
                    break;
                },
            };
            if visited.contains(current) {
                return Err(Error::InvalidFormat(format!(
                    "{}: chain revisits sector {current}",
                    opts.storage
                )));
            }
            visited.insert(current);
            let forced = first && opts.keep_start;
            first = false;

            match entry {
                ENDOFCHAIN => {
                    chain.push(current);
                    break;
                },
                FREESECT => {
                    if forced {
                        chain.push(current);
                    } else {
                        diag.record(Anomaly::FreeSectorInChain {
                            storage: opts.storage.to_string(),
                            sector: current,
                        });
                    }
                    break;
                },
                FATSECT => {
                    if opts.declared_len > 0 {
                        diag.record(Anomaly::TableSectorInChain {
                            storage: opts.storage.to_string(),
                            sector: current,
                        });
                        chain.push(current);
                        current += 1;
                        continue;
                    }
                    if forced {
                        chain.push(current);
                    }
                    break;
                },
                DIFSECT => {
                    diag.record(Anomaly::DifatSectorInChain {
                        storage: opts.storage.to_string(),
                        sector: current,
                    });
                    if forced {
                        chain.push(current);
                    }
                    break;
                },
                next if next >= 0 => {
                    chain.push(current);
                    let next = next as usize;
                    if next != current + 1 {
                        diag.record(Anomaly::ChainJump {
                            storage: opts.storage.to_string(),
                            from: current,
                            to: next,
                        });
                    }
                    current = next;
                },
                value => {
                    diag.record(Anomaly::UnknownMarker {
                        storage: opts.storage.to_string(),
                        sector: current,
                        value,
                    });
                    chain.push(current);
                    break;
                },
            }
        }

        Ok(chain)
    }

    /// Encode into whole big sectors, padding with free entries.
    pub fn to_sectors(&self) -> Vec<Sector> {
        let count = self.entries.len().div_ceil(ENTRIES_PER_SECTOR);
        let mut data = Vec::with_capacity(count * BIG_SECTOR_SIZE);
        for &entry in &self.entries {
            data.extend_from_slice(&entry.to_le_bytes());
        }
        while data.len() < count * BIG_SECTOR_SIZE {
            data.extend_from_slice(&FREESECT.to_le_bytes());
        }

        let mut sectors = Sector::from_bytes(&data, SectorKind::Big);
        for sector in &mut sectors {
            sector.set_depot();
        }
        sectors
    }
}
