//! Random access over a storage's non-contiguous sector chain.
//!
//! A storage's bytes are scattered across sectors in chain order. The
//! reader maps a logical `(offset, length)` request onto per-sector spans
//! and assembles the result, without copying sectors up front.

use std::fmt::Write as _;
use std::io::{self, Read, Seek, SeekFrom};

use smallvec::SmallVec;

use super::sector::{Sector, SectorKind};
use crate::common::error::{Error, Result};

/// The part of one sector touched by a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSpan {
    /// Position of the sector within the chain
    pub sector: usize,
    /// First byte within the sector
    pub start: usize,
    /// One past the last byte within the sector
    pub end: usize,
}

impl ReadSpan {
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }
}

/// Ordered spans covering one logical read.
pub type ReadPlan = SmallVec<[ReadSpan; 4]>;

/// Split the logical range `[start, start + len)` into per-sector spans.
///
/// ```
/// use leofile::leo::reader::{read_positions, ReadSpan};
/// let plan = read_positions(510, 8, 512);
/// assert_eq!(plan.as_slice(), &[
///     ReadSpan { sector: 0, start: 510, end: 512 },
///     ReadSpan { sector: 1, start: 0, end: 6 },
/// ]);
/// ```
pub fn read_positions(start: usize, len: usize, sector_size: usize) -> ReadPlan {
    let mut plan = ReadPlan::new();
    let end = start.saturating_add(len);
    let mut pos = start;

    while pos < end {
        let sector = pos / sector_size;
        let local = pos % sector_size;
        let take = (sector_size - local).min(end - pos);
        plan.push(ReadSpan {
            sector,
            start: local,
            end: local + take,
        });
        pos += take;
    }

    plan
}

/// Flatten a plan into `(sector, start, end)` triples.
pub fn flatten_plan(plan: &[ReadSpan]) -> Vec<usize> {
    plan.iter()
        .flat_map(|span| [span.sector, span.start, span.end])
        .collect()
}

/// Read-only view over the sectors of one storage.
#[derive(Debug, Clone)]
pub struct SectorReader<'a> {
    sectors: Vec<&'a Sector>,
    kind: SectorKind,
    length: usize,
}

impl<'a> SectorReader<'a> {
    /// Build a reader over `sectors` (in chain order) with a logical length.
    pub fn new(sectors: Vec<&'a Sector>, kind: SectorKind, length: usize) -> Self {
        Self {
            sectors,
            kind,
            length,
        }
    }

    /// Declared logical length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    #[inline]
    pub fn kind(&self) -> SectorKind {
        self.kind
    }

    #[inline]
    pub fn sector_size(&self) -> usize {
        self.kind.size()
    }

    #[inline]
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    pub fn sectors(&self) -> &[&'a Sector] {
        &self.sectors
    }

    /// Spans a read of `len` bytes at `start` would touch.
    pub fn read_positions(&self, start: usize, len: usize) -> ReadPlan {
        read_positions(start, len, self.sector_size())
    }

    fn sector(&self, index: usize, pos: usize) -> Result<&'a Sector> {
        self.sectors.get(index).copied().ok_or_else(|| match self.kind {
            SectorKind::Mini => Error::UnsupportedLayout(format!(
                "offset {pos} lies outside a mini-sector stream of {} sectors",
                self.sectors.len()
            )),
            SectorKind::Big => Error::InvalidFormat(format!(
                "offset {pos} lies outside a stream of {} sectors",
                self.sectors.len()
            )),
        })
    }

    /// Reject ranges that end past the logical length.
    fn check_range(&self, start: usize, len: usize) -> Result<()> {
        match start.checked_add(len) {
            Some(end) if end <= self.length => Ok(()),
            _ => Err(Error::InvalidFormat(format!(
                "read of {len} bytes at {start} runs past end of stream ({} bytes)",
                self.length
            ))),
        }
    }

    /// Read `len` bytes starting at logical offset `start`.
    ///
    /// The range must lie within the logical length. A truncated final
    /// sector yields a short result rather than an error.
    pub fn read(&self, start: usize, len: usize) -> Result<Vec<u8>> {
        self.check_range(start, len)?;
        let mut out = Vec::with_capacity(len);
        let mut pos = start;
        for span in self.read_positions(start, len) {
            let sector = self.sector(span.sector, pos)?;
            let bytes = sector.get_bytes(span.start, span.end);
            out.extend_from_slice(bytes);
            if bytes.len() < span.len() {
                tracing::debug!(
                    sector = sector.index(),
                    wanted = span.len(),
                    got = bytes.len(),
                    "short read from truncated sector"
                );
                break;
            }
            pos += span.len();
        }
        Ok(out)
    }

    /// The whole logical stream.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.read(0, self.length)
    }

    /// The 4-byte record header at `pos`.
    ///
    /// A header that would spill past the final sector is treated as junk
    /// at end of stream and comes back as zeros.
    pub fn header_bytes(&self, pos: usize) -> Result<[u8; 4]> {
        let size = self.sector_size();
        let block = pos / size;
        let check = pos % size;
        let first = self.sector(block, pos)?;

        let mut header = [0u8; 4];
        if check + 4 > size {
            if block + 1 >= self.sectors.len() {
                tracing::debug!(pos, "record header crosses end of stream");
                return Ok(header);
            }
            let head = first.get_bytes(check, size);
            let second = self.sector(block + 1, pos)?;
            let tail = second.get_bytes(0, 4 - head.len());
            header[..head.len()].copy_from_slice(head);
            header[head.len()..head.len() + tail.len()].copy_from_slice(tail);
        } else {
            let bytes = first.get_bytes(check, check + 4);
            header[..bytes.len()].copy_from_slice(bytes);
        }
        Ok(header)
    }

    /// `(logical offset, source offset)` pairs for the range, merging spans
    /// that are adjacent in the source.
    pub fn file_offsets(&self, start: usize, len: usize) -> Result<Vec<(usize, u64)>> {
        self.check_range(start, len)?;
        let mut offsets = Vec::new();
        let mut logical = start;
        let mut prev_end: Option<u64> = None;

        for span in self.read_positions(start, len) {
            let sector = self.sector(span.sector, logical)?;
            let source = sector.offset() + span.start as u64;
            if prev_end != Some(source) {
                offsets.push((logical, source));
            }
            prev_end = Some(sector.offset() + span.end as u64);
            logical += span.len();
        }

        Ok(offsets)
    }

    /// [`SectorReader::file_offsets`] as space separated `logical:source`
    /// hex pairs.
    pub fn file_offset_string(&self, start: usize, len: usize) -> Result<String> {
        let mut out = String::new();
        for (i, (logical, source)) in self.file_offsets(start, len)?.into_iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            let _ = write!(out, "{logical:X}:{source:X}");
        }
        Ok(out)
    }

    /// `Read + Seek` adapter positioned at the start of the stream.
    pub fn cursor(self) -> SectorCursor<'a> {
        SectorCursor {
            reader: self,
            pos: 0,
        }
    }
}

/// `std::io` view of a [`SectorReader`].
#[derive(Debug, Clone)]
pub struct SectorCursor<'a> {
    reader: SectorReader<'a>,
    pos: u64,
}

impl Read for SectorCursor<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = self.reader.len() as u64;
        if self.pos >= len || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((len - self.pos) as usize);
        let data = self
            .reader
            .read(self.pos as usize, want)
            .map_err(io::Error::other)?;
        buf[..data.len()].copy_from_slice(&data);
        self.pos += data.len() as u64;
        Ok(data.len())
    }
}

impl Seek for SectorCursor<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(p) => Some(p),
            SeekFrom::End(delta) => (self.reader.len() as u64).checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(p) => {
                self.pos = p;
                Ok(p)
            },
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn numbered(kind: SectorKind, count: usize, base_offset: u64) -> Vec<Sector> {
        (0..count)
            .map(|i| {
                let data: Vec<u8> = (0..kind.size()).map(|b| (i * 7 + b) as u8).collect();
                Sector::new(
                    kind,
                    i,
                    base_offset + (i * kind.size()) as u64,
                    Bytes::from(data),
                )
            })
            .collect()
    }

    #[test]
    fn test_boundary_plan() {
        let plan = read_positions(510, 8, 512);
        assert_eq!(flatten_plan(&plan), vec![0, 510, 512, 1, 0, 6]);
    }

    #[test]
    fn test_plan_ending_on_boundary() {
        let plan = read_positions(0, 1024, 512);
        assert_eq!(flatten_plan(&plan), vec![0, 0, 512, 1, 0, 512]);
        assert!(read_positions(100, 0, 512).is_empty());
    }

    #[test]
    fn test_read_across_sectors() {
        let sectors = numbered(SectorKind::Big, 3, 512);
        let reader = SectorReader::new(sectors.iter().collect(), SectorKind::Big, 1536);
        let data = reader.read(510, 8).unwrap();
        let mut expected = sectors[0].data()[510..].to_vec();
        expected.extend_from_slice(&sectors[1].data()[..6]);
        assert_eq!(data, expected);
    }

    #[test]
    fn test_header_sentinel_at_end() {
        let sectors = numbered(SectorKind::Big, 2, 512);
        let reader = SectorReader::new(sectors.iter().collect(), SectorKind::Big, 1024);
        assert_eq!(reader.header_bytes(1022).unwrap(), [0, 0, 0, 0]);

        let spanning = reader.header_bytes(510).unwrap();
        assert_eq!(&spanning[..2], &sectors[0].data()[510..]);
        assert_eq!(&spanning[2..], &sectors[1].data()[..2]);
    }

    #[test]
    fn test_header_outside_mini_stream() {
        let sectors = numbered(SectorKind::Mini, 2, 0);
        let reader = SectorReader::new(sectors.iter().collect(), SectorKind::Mini, 128);
        let err = reader.header_bytes(300).unwrap_err();
        assert!(matches!(err, Error::UnsupportedLayout(_)));
    }

    #[test]
    fn test_read_past_big_stream() {
        let sectors = numbered(SectorKind::Big, 1, 0);
        let reader = SectorReader::new(sectors.iter().collect(), SectorKind::Big, 512);
        assert!(matches!(
            reader.read(500, 100),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_read_stops_at_logical_length() {
        let sectors = numbered(SectorKind::Big, 10, 0);
        let reader = SectorReader::new(sectors.iter().collect(), SectorKind::Big, 5000);
        assert_eq!(reader.read(4990, 10).unwrap().len(), 10);
        assert!(matches!(reader.read(4990, 30), Err(Error::InvalidFormat(_))));
        assert!(matches!(reader.read(0, usize::MAX / 4), Err(Error::InvalidFormat(_))));
        assert!(matches!(reader.read(usize::MAX, 2), Err(Error::InvalidFormat(_))));
        assert!(reader.file_offsets(4999, 2).is_err());
        assert!(read_positions(usize::MAX - 1, 4, 512).len() <= 1);
    }

    #[test]
    fn test_file_offsets_coalesce() {
        let mut sectors = numbered(SectorKind::Big, 3, 512);
        // Third sector lives elsewhere in the file
        sectors[2] = Sector::new(SectorKind::Big, 2, 8192, sectors[2].shared());
        let reader = SectorReader::new(sectors.iter().collect(), SectorKind::Big, 1536);

        let offsets = reader.file_offsets(100, 1200).unwrap();
        assert_eq!(offsets, vec![(100, 612), (1024, 8192)]);
        assert_eq!(
            reader.file_offset_string(100, 1200).unwrap(),
            "64:264 400:2000"
        );
    }

    #[test]
    fn test_cursor_reads_and_seeks() {
        let sectors = numbered(SectorKind::Mini, 4, 0);
        let reader = SectorReader::new(sectors.iter().collect(), SectorKind::Mini, 200);
        let expected = reader.to_vec().unwrap();
        assert_eq!(expected.len(), 200);

        let mut cursor = reader.cursor();
        let mut all = Vec::new();
        cursor.read_to_end(&mut all).unwrap();
        assert_eq!(all, expected);

        cursor.seek(SeekFrom::Start(60)).unwrap();
        let mut buf = [0u8; 10];
        cursor.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, &expected[60..70]);
        assert!(cursor.seek(SeekFrom::Current(-100)).is_err());
    }

    proptest! {
        #[test]
        fn prop_plan_covers_range(start in 0usize..4096, len in 0usize..4096) {
            let plan = read_positions(start, len, 512);
            let total: usize = plan.iter().map(ReadSpan::len).sum();
            prop_assert_eq!(total, len);
            for span in &plan {
                prop_assert!(span.end <= 512);
                prop_assert!(!span.is_empty());
            }
            for pair in plan.windows(2) {
                prop_assert_eq!(pair[1].sector, pair[0].sector + 1);
                prop_assert_eq!(pair[1].start, 0);
                prop_assert_eq!(pair[0].end, 512);
            }
        }
    }
}
