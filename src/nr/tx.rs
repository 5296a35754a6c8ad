//! NR transmit side: SDU queue, transmit window, PDU assembly,
//! retransmission and resegmentation.

use std::collections::VecDeque;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::AmConfig;
use crate::packing::nr::{self, NrDataHeader, NrSnSize, NrStatusPdu, SO_END_OF_SDU};
use crate::packing::SegmentInfo;
use crate::pool::ByteBuffer;
use crate::sn::{Sn, SnSpace};
use crate::timers::Timer;
use crate::window::SnMap;

/// A transmitted SDU retained until acknowledged.
struct TxPdu {
    sdu: ByteBuffer,
    /// Bytes handed to the lower layer so far during initial transmission.
    so_next: usize,
    acked: bool,
    retx_count: u32,
}

/// A pending retransmission span over one SDU.
#[derive(Debug, Clone, Copy)]
struct Retx {
    sn: Sn,
    so: usize,
    len: usize,
}

/// Outcome of processing a status report.
#[derive(Debug, Default)]
pub(crate) struct StatusOutcome {
    pub max_retx_reached: bool,
}

pub(crate) struct NrTx {
    space: SnSpace,
    sn_size: NrSnSize,
    queue: VecDeque<ByteBuffer>,
    queue_bytes: usize,
    window: SnMap<TxPdu>,
    tx_next_ack: Sn,
    tx_next: Sn,
    /// SDU whose initial segmentation is still in progress.
    current_seg: Option<Sn>,
    /// Retransmissions; resegmentation holds go back to the front.
    retx_queue: VecDeque<Retx>,
    pdu_without_poll: u32,
    byte_without_poll: usize,
    poll_sn: Option<Sn>,
    force_poll: bool,
    poll_pdu: Option<u32>,
    poll_byte: Option<usize>,
    max_retx: u32,
    pub(crate) t_poll_retx: Timer,
    pub(crate) num_retx: u64,
}

impl NrTx {
    pub fn new(cfg: &AmConfig, space: SnSpace, sn_size: NrSnSize) -> Self {
        Self {
            space,
            sn_size,
            queue: VecDeque::new(),
            queue_bytes: 0,
            window: SnMap::new(),
            tx_next_ack: Sn(0),
            tx_next: Sn(0),
            current_seg: None,
            retx_queue: VecDeque::new(),
            pdu_without_poll: 0,
            byte_without_poll: 0,
            poll_sn: None,
            force_poll: false,
            poll_pdu: cfg.poll_pdu,
            poll_byte: cfg.poll_byte(),
            max_retx: cfg.max_retx_thresh,
            t_poll_retx: Timer::new(cfg.t_poll_retx_ms),
            num_retx: 0,
        }
    }

    pub fn tx_next_ack(&self) -> Sn {
        self.tx_next_ack
    }

    pub fn unacked_count(&self) -> usize {
        self.window.len()
    }

    pub fn enqueue_sdu(&mut self, sdu: ByteBuffer) {
        self.queue_bytes += sdu.len();
        self.queue.push_back(sdu);
    }

    /// Builds one data PDU into `buf`. Returns the bytes written, 0 when
    /// nothing is pending or the budget cannot hold a header plus one
    /// payload byte.
    pub fn read(&mut self, buf: &mut [u8], now: Instant) -> usize {
        if let Some(n) = self.read_retx(buf, now) {
            return n;
        }
        if let Some(n) = self.read_continuation(buf, now) {
            return n;
        }
        self.read_new(buf, now)
    }

    fn segment_info(&self, so: usize, len: usize, sdu_len: usize) -> SegmentInfo {
        if so == 0 && len == sdu_len {
            SegmentInfo::Full
        } else if so == 0 {
            SegmentInfo::First
        } else if so + len == sdu_len {
            SegmentInfo::Last
        } else {
            SegmentInfo::Middle
        }
    }

    fn read_retx(&mut self, buf: &mut [u8], now: Instant) -> Option<usize> {
        loop {
            let front = *self.retx_queue.front()?;
            let sdu_len = match self.window.get(front.sn) {
                Some(entry) if !entry.acked => entry.sdu.len(),
                _ => {
                    self.retx_queue.pop_front();
                    continue;
                }
            };

            let si = self.segment_info(front.so, front.len, sdu_len);
            let hdr = nr::data_header_len(si, self.sn_size);
            if buf.len() >= hdr + front.len {
                self.retx_queue.pop_front();
                return Some(self.emit(buf, front.sn, si, front.so, front.len, false, now));
            }

            // Resegment: the largest prefix whose header still fits.
            let prefix_si = if front.so == 0 {
                SegmentInfo::First
            } else {
                SegmentInfo::Middle
            };
            let hdr = nr::data_header_len(prefix_si, self.sn_size);
            if buf.len() < hdr + 1 {
                return Some(0);
            }
            let take = buf.len() - hdr;
            {
                let held = self.retx_queue.front_mut().expect("checked above");
                held.so += take;
                held.len -= take;
            }
            return Some(self.emit(buf, front.sn, prefix_si, front.so, take, false, now));
        }
    }

    fn read_continuation(&mut self, buf: &mut [u8], now: Instant) -> Option<usize> {
        let sn = self.current_seg?;
        let (so_next, sdu_len) = {
            let entry = self.window.get(sn).expect("segmented SDU stays in window");
            (entry.so_next, entry.sdu.len())
        };
        let remaining = sdu_len - so_next;
        let hdr = nr::data_header_len(SegmentInfo::Middle, self.sn_size);
        if buf.len() < hdr + 1 {
            return Some(0);
        }
        let take = remaining.min(buf.len() - hdr);
        let si = if take == remaining {
            SegmentInfo::Last
        } else {
            SegmentInfo::Middle
        };
        // Advance the segmentation state first so the poll decision sees
        // the buffer occupancy after this PDU.
        let entry = self.window.get_mut(sn).expect("segmented SDU stays in window");
        entry.so_next += take;
        if take == remaining {
            self.current_seg = None;
            self.tx_next = self.space.add(self.tx_next, 1);
        }
        Some(self.emit(buf, sn, si, so_next, take, true, now))
    }

    fn read_new(&mut self, buf: &mut [u8], now: Instant) -> usize {
        if self.queue.is_empty() {
            return 0;
        }
        if !self.space.in_window(self.tx_next_ack, self.tx_next) {
            debug!("tx window stalled at sn={}", self.tx_next);
            return 0;
        }
        let hdr_full = nr::data_header_len(SegmentInfo::Full, self.sn_size);
        if buf.len() < hdr_full + 1 {
            return 0;
        }

        let sdu = self.queue.pop_front().expect("checked non-empty");
        self.queue_bytes -= sdu.len();
        let sn = self.tx_next;
        let sdu_len = sdu.len();

        if sdu_len <= buf.len() - hdr_full {
            self.window.insert(
                sn,
                TxPdu {
                    sdu,
                    so_next: sdu_len,
                    acked: false,
                    retx_count: 0,
                },
            );
            self.tx_next = self.space.add(self.tx_next, 1);
            self.emit(buf, sn, SegmentInfo::Full, 0, sdu_len, true, now)
        } else {
            let take = buf.len() - hdr_full;
            self.window.insert(
                sn,
                TxPdu {
                    sdu,
                    so_next: take,
                    acked: false,
                    retx_count: 0,
                },
            );
            self.current_seg = Some(sn);
            self.emit(buf, sn, SegmentInfo::First, 0, take, true, now)
        }
    }

    /// Writes header and payload for one PDU and runs the polling decision.
    fn emit(
        &mut self,
        buf: &mut [u8],
        sn: Sn,
        si: SegmentInfo,
        so: usize,
        len: usize,
        new_data: bool,
        now: Instant,
    ) -> usize {
        let poll = self.poll_for_pdu(sn, len, new_data, now);
        let header = NrDataHeader {
            poll,
            si,
            sn,
            so: so as u16,
        };
        let hdr_len = nr::write_data_header(&header, self.sn_size, buf);
        let entry = self.window.get(sn).expect("emitting from window");
        buf[hdr_len..hdr_len + len].copy_from_slice(&entry.sdu.as_slice()[so..so + len]);
        debug!("tx PDU sn={} si={:?} so={} len={} poll={}", sn, si, so, len, poll);
        hdr_len + len
    }

    /// Decides the poll bit for the PDU about to leave, updating counters
    /// and the poll-retransmit timer.
    fn poll_for_pdu(&mut self, sn: Sn, payload_len: usize, new_data: bool, now: Instant) -> bool {
        let mut poll = self.force_poll;
        if new_data {
            self.pdu_without_poll += 1;
            self.byte_without_poll += payload_len;
            if let Some(limit) = self.poll_pdu {
                if self.pdu_without_poll >= limit {
                    poll = true;
                }
            }
            if let Some(limit) = self.poll_byte {
                if self.byte_without_poll >= limit {
                    poll = true;
                }
            }
        }
        // Both buffers drained by this PDU: request a report so the window
        // can close without waiting for a threshold.
        if self.queue.is_empty() && self.current_seg.is_none() && self.retx_queue.is_empty() {
            poll = true;
        }
        if poll {
            self.force_poll = false;
            self.pdu_without_poll = 0;
            self.byte_without_poll = 0;
            self.poll_sn = Some(sn);
            self.t_poll_retx.start(now);
        }
        poll
    }

    /// Applies a peer status report.
    pub fn handle_status(&mut self, status: &NrStatusPdu) -> StatusOutcome {
        let mut outcome = StatusOutcome::default();
        let base = self.tx_next_ack;
        // An SDU under initial segmentation is already visible to the peer
        // even though its SN is not yet consumed.
        let upper = if self.current_seg.is_some() {
            self.space.add(self.tx_next, 1)
        } else {
            self.tx_next
        };
        let ack_dist = self.space.distance(base, status.ack_sn);
        if ack_dist > self.space.distance(base, upper) {
            warn!("status ACK_SN={} outside [{}, {}]", status.ack_sn, base, upper);
            return outcome;
        }

        // Retransmissions first; a nacked SN must not be treated as acked.
        let mut counted: Vec<Sn> = Vec::new();
        for nack in &status.nacks {
            if self.space.distance(base, nack.sn) >= ack_dist {
                continue;
            }
            let (sdu_len, so_next) = match self.window.get(nack.sn) {
                Some(e) if !e.acked => (e.sdu.len(), e.so_next),
                _ => continue,
            };
            let (so, end) = match nack.so {
                None => (0, sdu_len),
                Some((s, e)) => {
                    let so = s as usize;
                    let end = if e == SO_END_OF_SDU {
                        sdu_len
                    } else {
                        (e as usize + 1).min(sdu_len)
                    };
                    (so, end)
                }
            };
            // Only bytes actually transmitted can be missing at the peer.
            let end = end.min(so_next);
            if end <= so {
                continue;
            }
            if self.overlaps_queued(nack.sn, so, end) {
                continue;
            }
            if !counted.contains(&nack.sn) {
                counted.push(nack.sn);
                let entry = self.window.get_mut(nack.sn).expect("checked above");
                entry.retx_count += 1;
                self.num_retx += 1;
                if entry.retx_count >= self.max_retx {
                    outcome.max_retx_reached = true;
                    return outcome;
                }
            }
            debug!("retx queued sn={} so={} len={}", nack.sn, so, end - so);
            self.retx_queue.push_back(Retx {
                sn: nack.sn,
                so,
                len: end - so,
            });
        }

        // Everything below ACK_SN that was not nacked is acknowledged.
        let nacked: Vec<Sn> = status.nacks.iter().map(|n| n.sn).collect();
        for sn in self.window.keys_sorted(&self.space, base) {
            if self.space.distance(base, sn) >= ack_dist {
                break;
            }
            if !nacked.contains(&sn) {
                if let Some(entry) = self.window.get_mut(sn) {
                    entry.acked = true;
                }
            }
        }

        self.advance_tx_next_ack();
        let window = &self.window;
        self.retx_queue
            .retain(|r| matches!(window.get(r.sn), Some(e) if !e.acked));

        if let Some(ps) = self.poll_sn {
            let poll_acked = match self.window.get(ps) {
                Some(e) => e.acked,
                // Advanced past and released.
                None => true,
            };
            if poll_acked {
                self.t_poll_retx.stop();
                self.poll_sn = None;
            }
        }

        outcome
    }

    fn overlaps_queued(&self, sn: Sn, so: usize, end: usize) -> bool {
        self.retx_queue
            .iter()
            .any(|r| r.sn == sn && so < r.so + r.len && r.so < end)
    }

    fn advance_tx_next_ack(&mut self) {
        while let Some(entry) = self.window.get(self.tx_next_ack) {
            if !entry.acked {
                break;
            }
            self.window.remove(self.tx_next_ack);
            self.tx_next_ack = self.space.add(self.tx_next_ack, 1);
        }
    }

    /// Poll-retransmit expiry: mark the highest unacked SN for
    /// retransmission with a forced poll.
    pub fn on_poll_retx_expiry(&mut self) -> StatusOutcome {
        let mut outcome = StatusOutcome::default();
        let mut highest: Option<(Sn, usize)> = None;
        for (sn, entry) in self.window.iter() {
            if entry.acked {
                continue;
            }
            let d = self.space.distance(self.tx_next_ack, sn) as usize;
            if highest.map_or(true, |(_, hd)| d > hd) {
                highest = Some((sn, d));
            }
        }
        let Some((sn, _)) = highest else {
            return outcome;
        };

        self.force_poll = true;
        let entry = self.window.get_mut(sn).expect("selected from window");
        entry.retx_count += 1;
        self.num_retx += 1;
        if entry.retx_count >= self.max_retx {
            outcome.max_retx_reached = true;
            return outcome;
        }
        let sent = entry.so_next;
        if !self.overlaps_queued(sn, 0, sent) && sent > 0 {
            debug!("poll retransmit expired, retx sn={}", sn);
            self.retx_queue.push_back(Retx {
                sn,
                so: 0,
                len: sent,
            });
        }
        outcome
    }

    /// Advisory byte demand of the transmit side.
    pub fn buffer_state(&self) -> usize {
        let mut total = 0;
        for r in &self.retx_queue {
            let sdu_len = match self.window.get(r.sn) {
                Some(e) if !e.acked => e.sdu.len(),
                _ => continue,
            };
            let si = self.segment_info(r.so, r.len, sdu_len);
            total += nr::data_header_len(si, self.sn_size) + r.len;
        }
        if let Some(sn) = self.current_seg {
            if let Some(entry) = self.window.get(sn) {
                let remaining = entry.sdu.len() - entry.so_next;
                total += nr::data_header_len(SegmentInfo::Middle, self.sn_size) + remaining;
            }
        }
        let hdr = nr::data_header_len(SegmentInfo::Full, self.sn_size);
        total += self.queue_bytes + self.queue.len() * hdr;
        total
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.queue_bytes = 0;
        self.window.clear();
        self.retx_queue.clear();
        self.tx_next_ack = Sn(0);
        self.tx_next = Sn(0);
        self.current_seg = None;
        self.pdu_without_poll = 0;
        self.byte_without_poll = 0;
        self.poll_sn = None;
        self.force_poll = false;
        self.t_poll_retx.stop();
    }

    /// Stops activity after an escalation; state is kept for inspection
    /// until `reset()`.
    pub fn fault(&mut self) {
        self.queue.clear();
        self.queue_bytes = 0;
        self.retx_queue.clear();
        self.current_seg = None;
        self.t_poll_retx.stop();
    }
}
