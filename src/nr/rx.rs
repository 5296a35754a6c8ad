//! NR receive side: segment reassembly, in-order delivery, and status
//! report generation.

use std::time::Instant;

use smallvec::SmallVec;
use tracing::{debug, warn};

use crate::config::AmConfig;
use crate::packing::nr::{self, NrDataHeader, NrNack, NrSnSize, NrStatusPdu, SO_END_OF_SDU};
use crate::packing::SegmentInfo;
use crate::pool::{BufferPool, ByteBuffer};
use crate::reassembly::SegmentBuffer;
use crate::sn::{Sn, SnSpace};
use crate::timers::Timer;
use crate::window::SnMap;

pub(crate) struct NrRx {
    space: SnSpace,
    sn_size: NrSnSize,
    pool: BufferPool,
    window: SnMap<SegmentBuffer>,
    /// Next SN expected in order.
    rx_next: Sn,
    /// SN following the highest received.
    rx_next_highest: Sn,
    /// Upper bound of the next status report.
    rx_highest_status: Sn,
    reorder_anchor: Option<Sn>,
    status_triggered: bool,
    pub(crate) t_reordering: Timer,
    pub(crate) t_status_prohibit: Timer,
    pub(crate) num_out_of_window: u64,
}

impl NrRx {
    pub fn new(cfg: &AmConfig, space: SnSpace, sn_size: NrSnSize, pool: BufferPool) -> Self {
        Self {
            space,
            sn_size,
            pool,
            window: SnMap::new(),
            rx_next: Sn(0),
            rx_next_highest: Sn(0),
            rx_highest_status: Sn(0),
            reorder_anchor: None,
            status_triggered: false,
            t_reordering: Timer::new(cfg.t_reordering_ms),
            t_status_prohibit: Timer::new(cfg.t_status_prohibit_ms),
            num_out_of_window: 0,
        }
    }

    /// Processes one data PDU, returning any SDUs that became deliverable.
    pub fn handle_data(
        &mut self,
        header: &NrDataHeader,
        payload: &[u8],
        now: Instant,
    ) -> Vec<ByteBuffer> {
        let sn = header.sn;
        if !self.space.in_window(self.rx_next, sn) {
            // Outside the window: drop, but let the peer hear about our
            // state.
            self.num_out_of_window += 1;
            self.status_triggered = true;
            warn!("rx PDU sn={} outside window at {}", sn, self.rx_next);
            return Vec::new();
        }

        if header.poll {
            self.status_triggered = true;
        }

        if matches!(self.window.get(sn), Some(e) if e.is_complete()) {
            debug!("duplicate PDU sn={}", sn);
            return Vec::new();
        }

        if self.window.get(sn).is_none() {
            match self.pool.allocate() {
                Some(buf) => {
                    self.window.insert(sn, SegmentBuffer::new(buf));
                }
                None => {
                    warn!("pool exhausted, dropping PDU sn={}", sn);
                    return Vec::new();
                }
            }
        }
        let entry = self.window.get_mut(sn).expect("inserted above");

        let so = match header.si {
            SegmentInfo::Full | SegmentInfo::First => 0,
            _ => u32::from(header.so),
        };
        if matches!(header.si, SegmentInfo::Full | SegmentInfo::Last)
            && !entry.set_total(so + payload.len() as u32)
        {
            warn!("conflicting total length for sn={}", sn);
        }
        if entry.insert(so, payload).is_err() {
            warn!("segment for sn={} exceeds buffer capacity", sn);
            return Vec::new();
        }

        if self.space.distance(self.rx_next, sn)
            >= self.space.distance(self.rx_next, self.rx_next_highest)
        {
            self.rx_next_highest = self.space.add(sn, 1);
        }

        let delivered = self.deliver_in_order();

        // A hole below the highest received SN asks for a report.
        if self.rx_next != self.rx_next_highest {
            self.status_triggered = true;
        }

        self.manage_reordering(now);
        delivered
    }

    fn deliver_in_order(&mut self) -> Vec<ByteBuffer> {
        let mut out = Vec::new();
        while matches!(self.window.get(self.rx_next), Some(e) if e.is_complete()) {
            let entry = self.window.remove(self.rx_next).expect("checked above");
            let buf = entry.into_buf();
            debug!("delivering SDU sn={} len={}", self.rx_next, buf.len());
            out.push(buf);
            self.rx_next = self.space.add(self.rx_next, 1);
        }
        // The report bound can never trail the in-order edge.
        if self.space.distance(self.rx_next, self.rx_highest_status) >= self.space.window_size() {
            self.rx_highest_status = self.rx_next;
        }
        out
    }

    fn manage_reordering(&mut self, now: Instant) {
        if let Some(anchor) = self.reorder_anchor {
            let d = self.space.distance(self.rx_next, anchor);
            if d == 0 || d >= self.space.window_size() {
                self.t_reordering.stop();
                self.reorder_anchor = None;
            }
        }
        if self.reorder_anchor.is_none() && self.rx_next != self.rx_next_highest {
            self.reorder_anchor = Some(self.rx_next_highest);
            self.t_reordering.start(now);
        }
    }

    /// Reordering expiry: fix the report bound at the anchor and trigger a
    /// status report; re-arm while a gap remains.
    pub fn on_reordering_expiry(&mut self, now: Instant) {
        let Some(anchor) = self.reorder_anchor.take() else {
            return;
        };
        debug!("reordering expired, status bound advanced to {}", anchor);
        self.rx_highest_status = anchor;
        self.status_triggered = true;
        if self.rx_next != self.rx_next_highest {
            self.reorder_anchor = Some(self.rx_next_highest);
            self.t_reordering.start(now);
        }
    }

    pub fn status_due(&self, now: Instant) -> bool {
        self.status_triggered && !self.t_status_prohibit.is_running(now)
    }

    /// The report that would be emitted now, before budget truncation.
    fn full_status(&self) -> NrStatusPdu {
        let mut status = NrStatusPdu {
            ack_sn: self.rx_highest_status,
            nacks: SmallVec::new(),
        };
        let span = self.space.distance(self.rx_next, self.rx_highest_status);
        for i in 0..span {
            let sn = self.space.add(self.rx_next, i);
            match self.window.get(sn) {
                None => status.nacks.push(NrNack { sn, so: None }),
                Some(e) if !e.is_complete() => {
                    for (start, end) in e.gaps(SO_END_OF_SDU) {
                        status.nacks.push(NrNack {
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
    /// lowering ACK_SN accordingly) when the budget is short. Returns the
    /// bytes written, or `None` if not even the fixed part fits.
    pub fn build_status(&mut self, buf: &mut [u8], now: Instant) -> Option<usize> {
        let full = self.full_status();
        let base = nr::status_len(&NrStatusPdu::default(), self.sn_size);
        if buf.len() < base {
            return None;
        }

        let mut status = NrStatusPdu {
            ack_sn: full.ack_sn,
            nacks: SmallVec::new(),
        };
        let mut used = base;
        let mut i = 0;
        while i < full.nacks.len() {
            // All records for one SN go in together or not at all.
            let sn = full.nacks[i].sn;
            let mut j = i;
            let mut group = 0;
            while j < full.nacks.len() && full.nacks[j].sn == sn {
                group += nr::nack_len(full.nacks[j].so.is_some(), self.sn_size);
                j += 1;
            }
            if used + group > buf.len() {
                status.ack_sn = sn;
                break;
            }
            status.nacks.extend_from_slice(&full.nacks[i..j]);
            used += group;
            i = j;
        }

        let written = nr::write_status(&status, self.sn_size, buf);
        self.status_triggered = false;
        self.t_status_prohibit.start(now);
        debug!("tx status ack_sn={} nacks={}", status.ack_sn, status.nacks.len());
        Some(written)
    }

    /// Size the pending status report would occupy, if one is due.
    pub fn status_size(&self, now: Instant) -> usize {
        if self.status_due(now) {
            nr::status_len(&self.full_status(), self.sn_size)
        } else {
            0
        }
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.rx_next = Sn(0);
        self.rx_next_highest = Sn(0);
        self.rx_highest_status = Sn(0);
        self.reorder_anchor = None;
        self.status_triggered = false;
        self.t_reordering.stop();
        self.t_status_prohibit.stop();
    }
}
