//! LTE receive side: PDU and PDU-segment reassembly, SDU extraction across
//! PDU boundaries, and status report generation.

use std::time::Instant;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::AmConfig;
use crate::packing::lte::{self, LteDataHeader, LteNack, LteStatusPdu, SO_END_OF_PDU};
use crate::pool::{BufferPool, ByteBuffer};
use crate::reassembly::SegmentBuffer;
use crate::sn::{Sn, SnSpace};
use crate::timers::Timer;
use crate::window::SnMap;

/// Reception state for one SN. A whole PDU is treated as a single segment
/// covering its full data field, so retransmitted segments and originals
/// share one path. SDU boundaries are re-derived from each segment's
/// framing info and length indicators.
struct LteRxPdu {
    seg: SegmentBuffer,
    /// Absolute offsets where an SDU starts.
    starts: SmallVec<[u32; 8]>,
    /// Absolute offsets (exclusive) where an SDU ends.
    ends: SmallVec<[u32; 8]>,
}

impl LteRxPdu {
    fn new(buf: ByteBuffer) -> Self {
        Self {
            seg: SegmentBuffer::new(buf),
            starts: SmallVec::new(),
            ends: SmallVec::new(),
        }
    }

    fn note_start(&mut self, off: u32) {
        if !self.starts.contains(&off) {
            self.starts.push(off);
        }
    }

    fn note_end(&mut self, off: u32) {
        if !self.ends.contains(&off) {
            self.ends.push(off);
        }
    }

    /// Adds one segment (or a whole PDU as the segment `[0, len)` with the
    /// last-segment flag set).
    fn add_segment(&mut self, header: &LteDataHeader, so: u32, lsf: bool, payload: &[u8]) -> bool {
        if lsf && !self.seg.set_total(so + payload.len() as u32) {
            warn!("conflicting total length for sn={}", header.sn);
        }
        if self.seg.insert(so, payload).is_err() {
            return false;
        }

        // Every length indicator marks an SDU boundary inside the segment;
        // the framing info says whether the edges are boundaries too.
        let mut cursor = so;
        for li in &header.li {
            cursor += u32::from(*li);
            self.note_start(cursor);
            self.note_end(cursor);
        }
        if !header.fi.starts_mid {
            self.note_start(so);
        }
        if !header.fi.ends_mid {
            self.note_end(so + payload.len() as u32);
        }
        true
    }

    /// Interior SDU boundaries, sorted.
    fn splits(&self, total: u32) -> Vec<u32> {
        let mut splits: Vec<u32> = self
            .starts
            .iter()
            .chain(self.ends.iter())
            .copied()
            .filter(|&o| o > 0 && o < total)
            .collect();
        splits.sort_unstable();
        splits.dedup();
        splits
    }
}

pub(crate) struct LteRx {
    space: SnSpace,
    pool: BufferPool,
    window: SnMap<LteRxPdu>,
    /// Next SN expected in order.
    vr_r: Sn,
    /// SN following the highest received.
    vr_h: Sn,
    /// Upper bound of the next status report.
    vr_x: Sn,
    reorder_anchor: Option<Sn>,
    status_triggered: bool,
    /// SDU being stitched across consecutive PDUs.
    partial_sdu: Option<ByteBuffer>,
    pub(crate) t_reordering: Timer,
    pub(crate) t_status_prohibit: Timer,
    pub(crate) num_out_of_window: u64,
}

impl LteRx {
    pub fn new(cfg: &AmConfig, space: SnSpace, pool: BufferPool) -> Self {
        Self {
            space,
            pool,
            window: SnMap::new(),
            vr_r: Sn(0),
            vr_h: Sn(0),
            vr_x: Sn(0),
            reorder_anchor: None,
            status_triggered: false,
            partial_sdu: None,
            t_reordering: Timer::new(cfg.t_reordering_ms),
            t_status_prohibit: Timer::new(cfg.t_status_prohibit_ms),
            num_out_of_window: 0,
        }
    }

    /// Processes one data PDU or PDU segment, returning any SDUs that
    /// became deliverable.
    pub fn handle_data(
        &mut self,
        header: &LteDataHeader,
        payload: &[u8],
        now: Instant,
    ) -> Vec<ByteBuffer> {
        let sn = header.sn;
        if !self.space.in_window(self.vr_r, sn) {
            self.num_out_of_window += 1;
            self.status_triggered = true;
            warn!("rx PDU sn={} outside window at {}", sn, self.vr_r);
            return Vec::new();
        }

        if header.poll {
            self.status_triggered = true;
        }

        if matches!(self.window.get(sn), Some(e) if e.seg.is_complete()) {
            debug!("duplicate PDU sn={}", sn);
            return Vec::new();
        }

        if self.window.get(sn).is_none() {
            match self.pool.allocate() {
                Some(buf) => {
                    self.window.insert(sn, LteRxPdu::new(buf));
                }
                None => {
                    warn!("pool exhausted, dropping PDU sn={}", sn);
                    return Vec::new();
                }
            }
        }
        let entry = self.window.get_mut(sn).expect("inserted above");

        let (so, lsf) = match header.resegment {
            Some(info) => (u32::from(info.so), info.lsf),
            None => (0, true),
        };
        if !entry.add_segment(header, so, lsf, payload) {
            warn!("segment for sn={} exceeds buffer capacity", sn);
            return Vec::new();
        }

        if self.space.distance(self.vr_r, sn) >= self.space.distance(self.vr_r, self.vr_h) {
            self.vr_h = self.space.add(sn, 1);
        }

        let delivered = self.deliver_in_order();

        if self.vr_r != self.vr_h {
            self.status_triggered = true;
        }

        self.manage_reordering(now);
        delivered
    }

    fn deliver_in_order(&mut self) -> Vec<ByteBuffer> {
        let mut out = Vec::new();
        while matches!(self.window.get(self.vr_r), Some(e) if e.seg.is_complete()) {
            let entry = self.window.remove(self.vr_r).expect("checked above");
            self.extract_sdus(entry, &mut out);
            self.vr_r = self.space.add(self.vr_r, 1);
        }
        if self.space.distance(self.vr_r, self.vr_x) >= self.space.window_size() {
            self.vr_x = self.vr_r;
        }
        out
    }

    /// Splits a complete PDU's data field at the reconstructed SDU
    /// boundaries and stitches edge fields onto the cross-PDU accumulator.
    fn extract_sdus(&mut self, entry: LteRxPdu, out: &mut Vec<ByteBuffer>) {
        let total = entry.seg.total_len().expect("complete implies total");
        let starts_mid = !entry.starts.contains(&0);
        let ends_mid = !entry.ends.contains(&total);
        let splits = entry.splits(total);
        let payload_buf = entry.seg.into_buf();
        let payload = payload_buf.as_slice();

        let mut bounds: Vec<u32> = Vec::with_capacity(splits.len() + 2);
        bounds.push(0);
        bounds.extend_from_slice(&splits);
        bounds.push(total);

        let n_fields = bounds.len() - 1;
        for i in 0..n_fields {
            let bytes = &payload[bounds[i] as usize..bounds[i + 1] as usize];
            let opens = !(i == 0 && starts_mid);
            let closes = !(i == n_fields - 1 && ends_mid);

            if opens {
                if self.partial_sdu.take().is_some() {
                    warn!("discarding stale partial SDU at sn={}", self.vr_r);
                }
                match self.pool.allocate() {
                    Some(buf) => self.partial_sdu = Some(buf),
                    None => {
                        warn!("pool exhausted, dropping SDU at sn={}", self.vr_r);
                        continue;
                    }
                }
            }
            match self.partial_sdu.as_mut() {
                Some(acc) => {
                    if acc.append(bytes).is_err() {
                        warn!("SDU exceeds buffer capacity, dropping");
                        self.partial_sdu = None;
                        continue;
                    }
                }
                None => {
                    warn!("orphan SDU continuation at sn={}, dropping", self.vr_r);
                    continue;
                }
            }
            if closes {
                let sdu = self.partial_sdu.take().expect("appended above");
                debug!("delivering SDU len={} from sn={}", sdu.len(), self.vr_r);
                out.push(sdu);
            }
        }
    }

    fn manage_reordering(&mut self, now: Instant) {
        if let Some(anchor) = self.reorder_anchor {
            let d = self.space.distance(self.vr_r, anchor);
            if d == 0 || d >= self.space.window_size() {
                self.t_reordering.stop();
                self.reorder_anchor = None;
            }
        }
        if self.reorder_anchor.is_none() && self.vr_r != self.vr_h {
            self.reorder_anchor = Some(self.vr_h);
            self.t_reordering.start(now);
        }
    }

    pub fn on_reordering_expiry(&mut self, now: Instant) {
        let Some(anchor) = self.reorder_anchor.take() else {
            return;
        };
        debug!("reordering expired, status bound advanced to {}", anchor);
        self.vr_x = anchor;
        self.status_triggered = true;
        if self.vr_r != self.vr_h {
            self.reorder_anchor = Some(self.vr_h);
            self.t_reordering.start(now);
        }
    }

    pub fn status_due(&self, now: Instant) -> bool {
        self.status_triggered && !self.t_status_prohibit.is_running(now)
    }

    fn full_status(&self) -> LteStatusPdu {
        let mut status = LteStatusPdu {
            ack_sn: self.vr_x,
            nacks: SmallVec::new(),
        };
        let span = self.space.distance(self.vr_r, self.vr_x);
        for i in 0..span {
            let sn = self.space.add(self.vr_r, i);
            match self.window.get(sn) {
                None => status.nacks.push(LteNack { sn, so: None }),
                Some(e) if !e.seg.is_complete() => {
                    for (start, end) in e.seg.gaps(SO_END_OF_PDU) {
                        status.nacks.push(LteNack {
                            sn,
                            so: Some((start, end)),
                        });
                    }
                }
                Some(_) => {}
            }
        }
        status
    }

    /// Builds a status PDU into `buf`, truncating the NACK list (and
    /// lowering ACK_SN) when the budget is short. Returns the bytes
    /// written, or `None` if not even the fixed part fits.
    pub fn build_status(&mut self, buf: &mut [u8], now: Instant) -> Option<usize> {
        let full = self.full_status();
        if buf.len() < lte::status_len(&LteStatusPdu::default()) {
            return None;
        }

        let mut status = LteStatusPdu {
            ack_sn: full.ack_sn,
            nacks: SmallVec::new(),
        };
        let mut i = 0;
        while i < full.nacks.len() {
            let sn = full.nacks[i].sn;
            let mut j = i;
            while j < full.nacks.len() && full.nacks[j].sn == sn {
                j += 1;
            }
            let mut tentative = status.clone();
            tentative.nacks.extend_from_slice(&full.nacks[i..j]);
            if lte::status_len(&tentative) > buf.len() {
                status.ack_sn = sn;
                break;
            }
            status = tentative;
            i = j;
        }

        let written = lte::write_status(&status, buf);
        self.status_triggered = false;
        self.t_status_prohibit.start(now);
        debug!("tx status ack_sn={} nacks={}", status.ack_sn, status.nacks.len());
        Some(written)
    }

    pub fn status_size(&self, now: Instant) -> usize {
        if self.status_due(now) {
            lte::status_len(&self.full_status())
        } else {
            0
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.vr_r = Sn(0);
        self.vr_h = Sn(0);
        self.vr_x = Sn(0);
        self.reorder_anchor = None;
        self.status_triggered = false;
        self.partial_sdu = None;
        self.t_reordering.stop();
        self.t_status_prohibit.stop();
    }
}
