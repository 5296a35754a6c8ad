//! Segment coverage tracking for PDU reassembly.
//!
//! A [`SegmentBuffer`] accumulates byte ranges of one PDU (or one SDU, in
//! the NR case) as segments arrive out of order, trimming overlaps so that
//! ranges never double-count. Completion means gap-free coverage of
//! `[0, total)` with the total fixed by the terminal segment.

use smallvec::SmallVec;

use crate::error::RlcError;
use crate::pool::ByteBuffer;

pub(crate) struct SegmentBuffer {
    buf: ByteBuffer,
    /// Covered ranges, half-open, sorted, non-overlapping.
    ranges: SmallVec<[(u32, u32); 4]>,
    total_len: Option<u32>,
}

impl SegmentBuffer {
    pub fn new(buf: ByteBuffer) -> Self {
        Self {
            buf,
            ranges: SmallVec::new(),
            total_len: None,
        }
    }

    pub fn total_len(&self) -> Option<u32> {
        self.total_len
    }

    /// Fixes the total length. Returns false when it conflicts with an
    /// earlier terminal segment; the earlier value wins.
    pub fn set_total(&mut self, total: u32) -> bool {
        match self.total_len {
            Some(existing) => existing == total,
            None => {
                self.total_len = Some(total);
                true
            }
        }
    }

    /// Writes the uncovered part of `[so, so + data.len())` and merges the
    /// range. Overlapping bytes keep their first-received value.
    pub fn insert(&mut self, so: u32, data: &[u8]) -> Result<(), RlcError> {
        let end = so + data.len() as u32;
        let mut cursor = so;
        for &(s, e) in self.ranges.iter() {
            if e <= cursor {
                continue;
            }
            if s >= end {
                break;
            }
            if cursor < s {
                let stop = s.min(end);
                self.buf.write_at(
                    cursor as usize,
                    &data[(cursor - so) as usize..(stop - so) as usize],
                )?;
            }
            cursor = cursor.max(e);
            if cursor >= end {
                break;
            }
        }
        if cursor < end {
            self.buf
                .write_at(cursor as usize, &data[(cursor - so) as usize..])?;
        }

        let mut merged: SmallVec<[(u32, u32); 4]> = SmallVec::new();
        let mut new = (so, end);
        let mut placed = false;
        for &(s, e) in self.ranges.iter() {
            if e < new.0 {
                merged.push((s, e));
            } else if s > new.1 {
                if !placed {
                    merged.push(new);
                    placed = true;
                }
                merged.push((s, e));
            } else {
                new = (new.0.min(s), new.1.max(e));
            }
        }
        if !placed {
            merged.push(new);
        }
        self.ranges = merged;
        Ok(())
    }

    pub fn is_complete(&self) -> bool {
        matches!(
            (self.total_len, self.ranges.as_slice()),
            (Some(total), [(0, end)]) if *end == total
        )
    }

    /// Gaps in coverage as inclusive byte pairs; the trailing gap uses
    /// `sentinel` while the total length is unknown.
    pub fn gaps(&self, sentinel: u16) -> SmallVec<[(u16, u16); 4]> {
        let mut gaps = SmallVec::new();
        let mut cursor = 0u32;
        for &(s, e) in self.ranges.iter() {
            if s > cursor {
                gaps.push((cursor as u16, (s - 1) as u16));
            }
            cursor = e;
        }
        match self.total_len {
            Some(total) if cursor < total => gaps.push((cursor as u16, (total - 1) as u16)),
            Some(_) => {}
            None => gaps.push((cursor as u16, sentinel)),
        }
        gaps
    }

    /// Hands the accumulated bytes out, trimmed to the total length.
    pub fn into_buf(self) -> ByteBuffer {
        let total = self.total_len.unwrap_or(0) as usize;
        let mut buf = self.buf;
        buf.truncate(total);
        buf
    }
}
